//! A per-thread queue of deferred callbacks.
//!
//! Callbacks scheduled while an [`ExecCtx`] is active run when the
//! outermost one is dropped, after every lock taken by the code that
//! scheduled them has been released. Callbacks may schedule more
//! callbacks; they run in the same flush.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    marker::PhantomData,
};

type Closure = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Closure>> = const { RefCell::new(VecDeque::new()) };
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Guard marking the current thread as inside an execution context.
pub struct ExecCtx {
    // tied to the thread it was entered on
    _not_send: PhantomData<*const ()>,
}

impl ExecCtx {
    pub fn enter() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        Self {
            _not_send: PhantomData,
        }
    }

    /// Defers `f` until the outermost context on this thread is dropped.
    /// Outside of any context, `f` runs right away.
    pub fn schedule(f: impl FnOnce() + 'static) {
        if DEPTH.with(|d| d.get()) == 0 {
            let _ctx = ExecCtx::enter();
            Self::schedule(f);
            return;
        }
        QUEUE.with(|q| q.borrow_mut().push_back(Box::new(f)));
    }

    fn flush() {
        loop {
            let next = QUEUE.with(|q| q.borrow_mut().pop_front());
            match next {
                Some(f) => f(),
                None => break,
            }
        }
    }
}

impl Drop for ExecCtx {
    fn drop(&mut self) {
        if DEPTH.with(|d| d.get()) == 1 {
            Self::flush();
        }
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::ExecCtx;

    #[test]
    fn test_callbacks_run_when_outermost_ctx_drops() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let outer = ExecCtx::enter();
        {
            let log = log.clone();
            ExecCtx::schedule(move || log.borrow_mut().push(1));
        }
        {
            let _inner = ExecCtx::enter();
            let log = log.clone();
            ExecCtx::schedule(move || log.borrow_mut().push(2));
        }
        assert!(log.borrow().is_empty());

        drop(outer);
        assert_eq!(*log.borrow(), [1, 2]);
    }

    #[test]
    fn test_callbacks_scheduled_while_flushing_run_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let _ctx = ExecCtx::enter();
            let log2 = log.clone();
            ExecCtx::schedule(move || {
                log2.borrow_mut().push("first");
                let _nested = ExecCtx::enter();
                let log3 = log2.clone();
                ExecCtx::schedule(move || log3.borrow_mut().push("third"));
            });
            let log2 = log.clone();
            ExecCtx::schedule(move || log2.borrow_mut().push("second"));
        }
        assert_eq!(*log.borrow(), ["first", "second", "third"]);
    }

    #[test]
    fn test_schedule_outside_ctx_runs_immediately() {
        let ran = Rc::new(RefCell::new(false));
        let ran2 = ran.clone();
        ExecCtx::schedule(move || *ran2.borrow_mut() = true);
        assert!(*ran.borrow());
    }
}
