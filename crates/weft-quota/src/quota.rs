//! The shared byte budget and the step that hands it out.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use tracing::debug;

use crate::{
    combiner::{lock, Combiner, CombinerCtx},
    error::QuotaError,
    exec_ctx::ExecCtx,
    list::{ListKind, UserId, UserList},
    user::UserShared,
};

/// A single-shot completion, told whether the operation went through.
pub(crate) type Callback = Box<dyn FnOnce(Result<(), QuotaError>) + Send>;

static NEXT_ANONYMOUS_POOL: AtomicU64 = AtomicU64::new(0);

/// A byte budget shared by many [`ResourceUser`](crate::ResourceUser)s.
///
/// Cloning yields another handle to the same quota. A new quota is
/// unlimited until [`ResourceQuota::resize`] is called.
#[derive(Clone)]
pub struct ResourceQuota {
    inner: Arc<QuotaInner>,
}

struct QuotaInner {
    name: Arc<str>,
    combiner: Combiner<QuotaState>,
}

impl fmt::Debug for ResourceQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceQuota")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Default for ResourceQuota {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ResourceQuota {
    pub fn new(name: Option<&str>) -> Self {
        let name: Arc<str> = match name {
            Some(name) => name.into(),
            None => format!(
                "anonymous_pool_{}",
                NEXT_ANONYMOUS_POOL.fetch_add(1, Ordering::Relaxed)
            )
            .into(),
        };
        debug!(quota = %name, "created resource quota");

        Self {
            inner: Arc::new(QuotaInner {
                combiner: Combiner::new(QuotaState::new(name.clone())),
                name,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Moves the budget to `size` bytes. Bytes already handed out stay
    /// handed out: shrinking below them leaves the free pool negative until
    /// users give bytes back.
    pub fn resize(&self, size: usize) {
        let _ctx = ExecCtx::enter();
        let size = i64::try_from(size).unwrap_or(i64::MAX);
        self.run(move |state, ctx| {
            let delta = size - state.size;
            state.size += delta;
            state.free_pool += delta;
            debug!(
                quota = %state.name,
                size,
                free_pool = state.free_pool,
                "resize"
            );
            state.step_sched(ctx);
        });
    }

    /// The budget, in bytes.
    pub fn size(&self) -> i64 {
        self.inner.combiner.with_state(|state| state.size)
    }

    /// Bytes of the budget not held by any user. Negative when
    /// overcommitted.
    pub fn free_pool(&self) -> i64 {
        self.inner.combiner.with_state(|state| state.free_pool)
    }

    /// Share of the budget held by users, from 0.0 to 1.0. An empty
    /// budget is under full pressure; an overcommitted one saturates.
    pub fn memory_pressure(&self) -> f64 {
        self.inner.combiner.with_state(|state| {
            if state.size == 0 {
                return 1.0;
            }
            (1.0 - state.free_pool as f64 / state.size as f64).clamp(0.0, 1.0)
        })
    }

    pub(crate) fn run(
        &self,
        job: impl FnOnce(&mut QuotaState, &mut CombinerCtx<QuotaState>) + Send + 'static,
    ) {
        self.inner.combiner.run(job)
    }
}

struct UserEntry {
    user: Weak<UserShared>,
    /// Benign, then destructive.
    reclaimers: [Option<Callback>; 2],
}

/// Everything only the combiner touches.
pub(crate) struct QuotaState {
    name: Arc<str>,
    size: i64,
    free_pool: i64,
    step_scheduled: bool,
    reclaiming: bool,
    lists: [UserList; 4],
    users: HashMap<UserId, UserEntry>,
}

impl QuotaState {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            size: i64::MAX,
            free_pool: i64::MAX,
            step_scheduled: false,
            reclaiming: false,
            lists: Default::default(),
            users: HashMap::new(),
        }
    }

    fn list(&self, kind: ListKind) -> &UserList {
        &self.lists[kind as usize]
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut UserList {
        &mut self.lists[kind as usize]
    }

    fn user(&self, id: UserId) -> Option<Arc<UserShared>> {
        self.users.get(&id).and_then(|entry| entry.user.upgrade())
    }

    pub(crate) fn register_user(&mut self, id: UserId, user: Weak<UserShared>) {
        self.users.insert(
            id,
            UserEntry {
                user,
                reclaimers: [None, None],
            },
        );
    }

    /// The user's free pool went negative.
    pub(crate) fn enqueue_allocation(&mut self, id: UserId, ctx: &mut CombinerCtx<Self>) {
        if self.list(ListKind::AwaitingAllocation).is_empty() {
            self.step_sched(ctx);
        }
        self.list_mut(ListKind::AwaitingAllocation).push_back(id);
    }

    /// The user's free pool went positive.
    pub(crate) fn add_to_free_pool(&mut self, id: UserId, ctx: &mut CombinerCtx<Self>) {
        if !self.list(ListKind::AwaitingAllocation).is_empty()
            && self.list(ListKind::NonEmptyFreePool).is_empty()
        {
            self.step_sched(ctx);
        }
        self.list_mut(ListKind::NonEmptyFreePool).push_back(id);
    }

    pub(crate) fn post_reclaimer(
        &mut self,
        id: UserId,
        destructive: bool,
        reclaimer: Callback,
        ctx: &mut CombinerCtx<Self>,
    ) {
        let Some(entry) = self.users.get_mut(&id) else {
            ExecCtx::schedule(move || reclaimer(Err(QuotaError::Cancelled)));
            return;
        };
        entry.reclaimers[destructive as usize] = Some(reclaimer);

        let starved = !self.list(ListKind::AwaitingAllocation).is_empty()
            && self.list(ListKind::NonEmptyFreePool).is_empty()
            && self.list(ListKind::ReclaimerBenign).is_empty();
        let first_of_kind = !destructive || self.list(ListKind::ReclaimerDestructive).is_empty();
        if starved && first_of_kind {
            self.step_sched(ctx);
        }
        self.list_mut(ListKind::reclaimer(destructive)).push_back(id);
    }

    /// Cancels whatever reclaimers the user still has posted.
    pub(crate) fn cancel_reclaimers(&mut self, id: UserId) {
        self.list_mut(ListKind::ReclaimerBenign).remove(id);
        self.list_mut(ListKind::ReclaimerDestructive).remove(id);
        if let Some(entry) = self.users.get_mut(&id) {
            for reclaimer in entry.reclaimers.iter_mut().filter_map(Option::take) {
                ExecCtx::schedule(move || reclaimer(Err(QuotaError::Cancelled)));
            }
        }
    }

    /// Drops every trace of a user, returning the `held` bytes it still
    /// had to the pool.
    pub(crate) fn forget_user(&mut self, id: UserId, held: i64, ctx: &mut CombinerCtx<Self>) {
        self.cancel_reclaimers(id);
        for kind in ListKind::ALL {
            self.list_mut(kind).remove(id);
        }
        self.users.remove(&id);

        if held != 0 {
            self.free_pool += held;
            self.step_sched(ctx);
        }
    }

    pub(crate) fn reclamation_done(&mut self, ctx: &mut CombinerCtx<Self>) {
        self.reclaiming = false;
        self.step_sched(ctx);
    }

    pub(crate) fn step_sched(&mut self, ctx: &mut CombinerCtx<Self>) {
        if self.step_scheduled {
            return;
        }
        self.step_scheduled = true;
        ctx.finally(|state, _| state.step());
    }

    fn step(&mut self) {
        self.step_scheduled = false;
        loop {
            if self.alloc() {
                return;
            }
            if !self.scavenge() {
                break;
            }
        }

        if !self.reclaim(false) {
            self.reclaim(true);
        }
    }

    /// Serves waiting users in order. Returns false if one could not be
    /// covered: it goes back to the head of the line.
    fn alloc(&mut self) -> bool {
        while let Some(id) = self.list_mut(ListKind::AwaitingAllocation).pop_front() {
            let Some(user) = self.user(id) else {
                continue;
            };
            let mut state = lock(&user.state);

            if state.free_pool < 0 && -state.free_pool <= self.free_pool {
                let amount = -state.free_pool;
                state.free_pool = 0;
                self.free_pool -= amount;
                debug!(
                    quota = %self.name,
                    user = %user.name,
                    amount,
                    free_pool = self.free_pool,
                    "grant alloc"
                );
            } else if state.free_pool >= 0 {
                debug!(
                    quota = %self.name,
                    user = %user.name,
                    "discard already satisfied alloc request"
                );
            }

            if state.free_pool < 0 {
                drop(state);
                self.list_mut(ListKind::AwaitingAllocation).push_front(id);
                return false;
            }

            state.allocating = false;
            for on_done in state.on_allocated.drain(..) {
                ExecCtx::schedule(move || on_done(Ok(())));
            }
        }
        true
    }

    /// Takes back the idle bytes of one user. Returns false if no user had
    /// any.
    fn scavenge(&mut self) -> bool {
        while let Some(id) = self.list_mut(ListKind::NonEmptyFreePool).pop_front() {
            let Some(user) = self.user(id) else {
                continue;
            };
            let mut state = lock(&user.state);
            state.added_to_free_pool = false;
            if state.free_pool > 0 {
                let amount = state.free_pool;
                state.free_pool = 0;
                self.free_pool += amount;
                debug!(
                    quota = %self.name,
                    user = %user.name,
                    amount,
                    free_pool = self.free_pool,
                    "reclaim_from_per_user_free_pool"
                );
                return true;
            }
        }
        false
    }

    /// Starts one reclaimer of the given kind. Returns true if one is
    /// running, whether it was started now or earlier.
    fn reclaim(&mut self, destructive: bool) -> bool {
        if self.reclaiming {
            return true;
        }

        let kind = ListKind::reclaimer(destructive);
        while let Some(id) = self.list_mut(kind).pop_front() {
            let Some(entry) = self.users.get_mut(&id) else {
                continue;
            };
            // a dropped user's reclaimers are cancelled when it's forgotten
            let Some(user) = entry.user.upgrade() else {
                continue;
            };
            let Some(reclaimer) = entry.reclaimers[destructive as usize].take() else {
                continue;
            };
            lock(&user.state).reclaimer_posted[destructive as usize] = false;

            debug!(
                quota = %self.name,
                user = %user.name,
                "initiate {} reclamation",
                if destructive { "destructive" } else { "benign" }
            );
            self.reclaiming = true;
            ExecCtx::schedule(move || reclaimer(Ok(())));
            return true;
        }
        false
    }
}
