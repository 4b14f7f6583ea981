//! Ordered sets of resource users with O(1) push at either end, pop from
//! the front and removal from anywhere.

use std::collections::HashMap;

pub(crate) type UserId = u64;

/// The lists a quota keeps its users on. A user can be on several at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListKind {
    /// Waiting for the quota to cover an allocation.
    AwaitingAllocation = 0,
    /// Holding free bytes the quota can take back.
    NonEmptyFreePool = 1,
    /// Posted a benign reclaimer.
    ReclaimerBenign = 2,
    /// Posted a destructive reclaimer.
    ReclaimerDestructive = 3,
}

impl ListKind {
    pub(crate) const ALL: [ListKind; 4] = [
        ListKind::AwaitingAllocation,
        ListKind::NonEmptyFreePool,
        ListKind::ReclaimerBenign,
        ListKind::ReclaimerDestructive,
    ];

    pub(crate) fn reclaimer(destructive: bool) -> Self {
        if destructive {
            ListKind::ReclaimerDestructive
        } else {
            ListKind::ReclaimerBenign
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    prev: Option<UserId>,
    next: Option<UserId>,
}

#[derive(Debug, Default)]
pub(crate) struct UserList {
    head: Option<UserId>,
    tail: Option<UserId>,
    links: HashMap<UserId, Links>,
}

impl UserList {
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn contains(&self, id: UserId) -> bool {
        self.links.contains_key(&id)
    }

    /// Does nothing if `id` is already on the list.
    pub(crate) fn push_back(&mut self, id: UserId) {
        if self.contains(id) {
            return;
        }
        let links = Links {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(tail) => self.link_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.links.insert(id, links);
    }

    /// Does nothing if `id` is already on the list.
    pub(crate) fn push_front(&mut self, id: UserId) {
        if self.contains(id) {
            return;
        }
        let links = Links {
            prev: None,
            next: self.head,
        };
        match self.head {
            Some(head) => self.link_mut(head).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.links.insert(id, links);
    }

    pub(crate) fn pop_front(&mut self) -> Option<UserId> {
        let head = self.head?;
        self.remove(head);
        Some(head)
    }

    pub(crate) fn remove(&mut self, id: UserId) -> bool {
        let Some(links) = self.links.remove(&id) else {
            return false;
        };
        match links.prev {
            Some(prev) => self.link_mut(prev).next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(next) => self.link_mut(next).prev = links.prev,
            None => self.tail = links.prev,
        }
        true
    }

    fn link_mut(&mut self, id: UserId) -> &mut Links {
        self.links.entry(id).or_default()
    }
}
