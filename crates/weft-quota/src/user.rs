//! A client of a [`ResourceQuota`], typically one per connection.

use std::{
    fmt,
    future::Future,
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::{
    combiner::lock,
    error::QuotaError,
    exec_ctx::ExecCtx,
    list::UserId,
    quota::{Callback, ResourceQuota},
    slice::QuotaSliceMut,
};

static NEXT_USER_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) struct UserShared {
    pub(crate) id: UserId,
    pub(crate) name: String,
    quota: ResourceQuota,
    pub(crate) state: Mutex<UserState>,
}

#[derive(Default)]
pub(crate) struct UserState {
    /// Bytes taken from the quota and not allocated. Negative while an
    /// allocation waits on the quota.
    pub(crate) free_pool: i64,
    allocated: u64,
    pub(crate) allocating: bool,
    pub(crate) on_allocated: Vec<Callback>,
    pub(crate) added_to_free_pool: bool,
    pub(crate) reclaimer_posted: [bool; 2],
    shutdown: bool,
    destroy_submitted: bool,
    destroyed: bool,
    on_destroyed: Vec<Box<dyn FnOnce() + Send>>,
}

/// Accounts allocations against a quota. Cloning yields another handle to
/// the same user.
///
/// Allocating never blocks: if the quota can't cover a request right away,
/// its callback runs once the quota has found the bytes, possibly on
/// another thread. Callbacks never run while a lock is held, they run when
/// the outermost [`ExecCtx`] of the thread that completed them is dropped.
#[derive(Clone)]
pub struct ResourceUser {
    shared: Arc<UserShared>,
}

impl fmt::Debug for ResourceUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceUser")
            .field("name", &self.shared.name)
            .field("quota", &self.shared.quota.name())
            .finish_non_exhaustive()
    }
}

impl ResourceUser {
    pub fn new(quota: &ResourceQuota, name: Option<&str>) -> Self {
        let _ctx = ExecCtx::enter();
        let id = NEXT_USER_ID.fetch_add(1, Ordering::Relaxed);
        let name = match name {
            Some(name) => name.to_owned(),
            None => format!("anonymous_resource_user_{id}"),
        };
        debug!(quota = %quota.name(), user = %name, "created resource user");

        let shared = Arc::new(UserShared {
            id,
            name,
            quota: quota.clone(),
            state: Mutex::new(UserState::default()),
        });
        let weak = Arc::downgrade(&shared);
        quota.run(move |state, _| state.register_user(id, weak));

        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn quota(&self) -> &ResourceQuota {
        &self.shared.quota
    }

    /// Bytes allocated and not freed yet, granted or not.
    pub fn allocated(&self) -> u64 {
        lock(&self.shared.state).allocated
    }

    /// Bytes this user holds from the quota beyond what it allocated.
    /// Negative while an allocation is waiting.
    pub fn free_pool(&self) -> i64 {
        lock(&self.shared.state).free_pool
    }

    /// Accounts `size` bytes against this user. `on_done` gets `Ok` once the
    /// quota covers them, which may be right away, or
    /// [`QuotaError::UserShutdown`] if this user was shut down.
    pub fn alloc(
        &self,
        size: usize,
        on_done: impl FnOnce(Result<(), QuotaError>) + Send + 'static,
    ) {
        let _ctx = ExecCtx::enter();
        // the error went to the callback
        let _ = self.alloc_inner(size, Some(Box::new(on_done)));
    }

    /// Like [`ResourceUser::alloc`], as a future. The bytes are accounted
    /// when this is called, not when the future is first polled.
    pub fn alloc_async(
        &self,
        size: usize,
    ) -> impl Future<Output = Result<(), QuotaError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.alloc(size, move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(QuotaError::Cancelled)) }
    }

    /// Accounts `size` bytes and returns a zeroed buffer of that size right
    /// away, even if the quota can't cover it yet. The buffer credits this
    /// user when dropped.
    pub fn slice_malloc(&self, size: usize) -> Result<QuotaSliceMut, QuotaError> {
        let _ctx = ExecCtx::enter();
        self.alloc_inner(size, None)?;
        Ok(QuotaSliceMut::new(self.clone(), size))
    }

    fn alloc_inner(&self, size: usize, on_done: Option<Callback>) -> Result<(), QuotaError> {
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            drop(state);
            if let Some(on_done) = on_done {
                ExecCtx::schedule(move || on_done(Err(QuotaError::UserShutdown)));
            }
            return Err(QuotaError::UserShutdown);
        }

        state.allocated += size as u64;
        state.free_pool -= size as i64;
        trace!(
            quota = %self.shared.quota.name(),
            user = %self.shared.name,
            size,
            free_pool = state.free_pool,
            "alloc"
        );

        if state.free_pool >= 0 {
            if let Some(on_done) = on_done {
                ExecCtx::schedule(move || on_done(Ok(())));
            }
            return Ok(());
        }

        state.on_allocated.extend(on_done);
        if mem::replace(&mut state.allocating, true) {
            return Ok(());
        }
        drop(state);

        let id = self.shared.id;
        self.shared
            .quota
            .run(move |state, ctx| state.enqueue_allocation(id, ctx));
        Ok(())
    }

    /// Gives back `size` previously allocated bytes.
    ///
    /// Panics if that's more than is allocated.
    pub fn free(&self, size: usize) {
        let _ctx = ExecCtx::enter();
        let mut state = lock(&self.shared.state);
        assert!(
            size as u64 <= state.allocated,
            "freeing {size} bytes, only {} allocated",
            state.allocated
        );
        state.allocated -= size as u64;

        let was_negative = state.free_pool < 0;
        let was_zero_or_negative = state.free_pool <= 0;
        state.free_pool += size as i64;
        trace!(
            quota = %self.shared.quota.name(),
            user = %self.shared.name,
            size,
            free_pool = state.free_pool,
            "free"
        );

        let publish = was_zero_or_negative && state.free_pool > 0 && !state.added_to_free_pool;
        if publish {
            state.added_to_free_pool = true;
        }
        let destroy = state.shutdown && state.allocated == 0 && !state.destroy_submitted;
        if destroy {
            state.destroy_submitted = true;
        }
        // the waiting request is covered by this user's own bytes now
        let wake = was_negative && state.free_pool == 0 && state.allocating && !destroy;
        drop(state);

        if wake {
            self.shared.quota.run(|state, ctx| state.step_sched(ctx));
        }
        if publish {
            let id = self.shared.id;
            self.shared
                .quota
                .run(move |state, ctx| state.add_to_free_pool(id, ctx));
        }
        if destroy {
            self.submit_destroy();
        }
    }

    /// Offers a way to free memory when the quota runs short. Benign
    /// reclaimers are tried before destructive ones, one at a time; each
    /// runs at most once and must call [`ResourceUser::finish_reclamation`]
    /// when it's done. A reclaimer that's never run gets
    /// [`QuotaError::Cancelled`] when this user shuts down.
    ///
    /// Panics if a reclaimer of the same kind is already posted.
    pub fn post_reclaimer(
        &self,
        destructive: bool,
        reclaimer: impl FnOnce(Result<(), QuotaError>) + Send + 'static,
    ) {
        let _ctx = ExecCtx::enter();
        let slot = destructive as usize;
        let reclaimer: Callback = Box::new(reclaimer);

        {
            let mut state = lock(&self.shared.state);
            if state.shutdown {
                drop(state);
                ExecCtx::schedule(move || reclaimer(Err(QuotaError::Cancelled)));
                return;
            }
            assert!(
                !state.reclaimer_posted[slot],
                "a {} reclaimer is already posted",
                if destructive { "destructive" } else { "benign" }
            );
            state.reclaimer_posted[slot] = true;
        }

        let user = self.shared.clone();
        self.shared.quota.run(move |quota, ctx| {
            // shutdown may have landed between the check above and now
            let shut_down = {
                let mut state = lock(&user.state);
                if state.shutdown {
                    state.reclaimer_posted[slot] = false;
                }
                state.shutdown
            };
            if shut_down {
                ExecCtx::schedule(move || reclaimer(Err(QuotaError::Cancelled)));
                return;
            }
            quota.post_reclaimer(user.id, destructive, reclaimer, ctx);
        });
    }

    /// Tells the quota the running reclaimer is done, so it can look at
    /// waiting allocations again.
    pub fn finish_reclamation(&self) {
        let _ctx = ExecCtx::enter();
        debug!(
            quota = %self.shared.quota.name(),
            user = %self.shared.name,
            "reclamation complete"
        );
        self.shared
            .quota
            .run(|state, ctx| state.reclamation_done(ctx));
    }

    /// Stops this user: posted reclaimers are cancelled, later allocations
    /// fail, and allocations still waiting on the quota when the user is
    /// destroyed get [`QuotaError::Cancelled`]. The user is destroyed, and its idle bytes returned to the
    /// quota, once everything it allocated is freed. `on_done` runs then.
    pub fn shutdown(&self, on_done: impl FnOnce() + Send + 'static) {
        let _ctx = ExecCtx::enter();
        let mut state = lock(&self.shared.state);
        if state.destroyed {
            drop(state);
            ExecCtx::schedule(on_done);
            return;
        }

        state.on_destroyed.push(Box::new(on_done));
        let first = !mem::replace(&mut state.shutdown, true);
        let destroy = state.allocated == 0 && !state.destroy_submitted;
        if destroy {
            state.destroy_submitted = true;
        }
        drop(state);

        if first {
            debug!(
                quota = %self.shared.quota.name(),
                user = %self.shared.name,
                "shutdown"
            );
            let id = self.shared.id;
            self.shared
                .quota
                .run(move |state, _| state.cancel_reclaimers(id));
        }
        if destroy {
            self.submit_destroy();
        }
    }

    fn submit_destroy(&self) {
        let user = self.shared.clone();
        self.shared.quota.run(move |quota, ctx| {
            let (held, on_allocated, on_destroyed) = {
                let mut state = lock(&user.state);
                state.destroyed = true;
                state.allocating = false;
                (
                    mem::take(&mut state.free_pool),
                    mem::take(&mut state.on_allocated),
                    mem::take(&mut state.on_destroyed),
                )
            };
            quota.forget_user(user.id, held, ctx);
            // freed before the quota got to them
            for on_done in on_allocated {
                ExecCtx::schedule(move || on_done(Err(QuotaError::Cancelled)));
            }
            debug!(
                quota = %user.quota.name(),
                user = %user.name,
                returned = held,
                "destroyed resource user"
            );
            for on_done in on_destroyed {
                ExecCtx::schedule(on_done);
            }
        });
    }
}

impl Drop for UserShared {
    // The last handle went away without a completed shutdown: whatever the
    // user still held goes back to the quota.
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.destroy_submitted {
            return;
        }

        let _ctx = ExecCtx::enter();
        for on_done in state.on_allocated.drain(..) {
            ExecCtx::schedule(move || on_done(Err(QuotaError::Cancelled)));
        }
        for on_done in state.on_destroyed.drain(..) {
            ExecCtx::schedule(on_done);
        }

        let held = state.free_pool + state.allocated as i64;
        let id = self.id;
        debug!(
            quota = %self.quota.name(),
            user = %self.name,
            returned = held,
            "dropped resource user"
        );
        self.quota
            .run(move |quota, ctx| quota.forget_user(id, held, ctx));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use pretty_assertions::assert_eq;

    use super::ResourceUser;
    use crate::{error::QuotaError, quota::ResourceQuota};

    #[test]
    fn test_alloc_within_free_pool_completes_inline() {
        let quota = ResourceQuota::new(Some("q"));
        quota.resize(100);
        let user = ResourceUser::new(&quota, Some("u"));

        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        user.alloc(60, move |result| {
            assert_eq!(result, Ok(()));
            done2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(user.allocated(), 60);
        assert_eq!(user.free_pool(), 0);
        assert_eq!(quota.free_pool(), 40);
    }

    #[test]
    #[should_panic(expected = "freeing 2 bytes, only 1 allocated")]
    fn test_over_free_panics() {
        let quota = ResourceQuota::new(None);
        let user = ResourceUser::new(&quota, None);
        user.alloc(1, |_| {});
        user.free(2);
    }

    #[test]
    #[should_panic(expected = "a benign reclaimer is already posted")]
    fn test_second_reclaimer_in_slot_panics() {
        let quota = ResourceQuota::new(None);
        let user = ResourceUser::new(&quota, None);
        user.post_reclaimer(false, |_| {});
        user.post_reclaimer(false, |_| {});
    }

    #[test]
    fn test_dropping_a_user_returns_its_bytes() {
        let quota = ResourceQuota::new(None);
        quota.resize(10);
        let user = ResourceUser::new(&quota, None);
        assert!(user.name().starts_with("anonymous_resource_user_"));

        user.alloc(4, |_| {});
        user.free(1);
        assert_eq!(quota.free_pool(), 6);
        drop(user);
        assert_eq!(quota.free_pool(), 10);
    }

    #[test]
    fn test_shutdown_after_destroy_still_calls_back() {
        let quota = ResourceQuota::new(None);
        let user = ResourceUser::new(&quota, None);
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            user.shutdown(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let err = Arc::new(std::sync::Mutex::new(None));
        let err2 = err.clone();
        user.alloc(1, move |result| *err2.lock().unwrap() = Some(result));
        assert_eq!(*err.lock().unwrap(), Some(Err(QuotaError::UserShutdown)));
    }
}
