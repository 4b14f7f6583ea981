//! Serializes access to a piece of state without making callers wait on
//! each other's work.
//!
//! Jobs submitted with [`Combiner::run`] execute one at a time, in
//! submission order. Whoever submits while the combiner is idle drains the
//! queue on their own thread, including jobs other threads push meanwhile.
//! Jobs scheduled with [`CombinerCtx::finally`] run once no regular job is
//! left.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

pub type Job<S> = Box<dyn FnOnce(&mut S, &mut CombinerCtx<S>) + Send>;

/// Handed to every job, to queue follow-up work.
pub struct CombinerCtx<S> {
    later: Vec<Job<S>>,
    finally: Vec<Job<S>>,
}

impl<S> CombinerCtx<S> {
    /// Runs `job` after the jobs already queued.
    pub fn later(&mut self, job: impl FnOnce(&mut S, &mut CombinerCtx<S>) + Send + 'static) {
        self.later.push(Box::new(job));
    }

    /// Runs `job` once the queue is empty.
    pub fn finally(&mut self, job: impl FnOnce(&mut S, &mut CombinerCtx<S>) + Send + 'static) {
        self.finally.push(Box::new(job));
    }
}

struct Queue<S> {
    jobs: VecDeque<Job<S>>,
    finally: VecDeque<Job<S>>,
    running: bool,
}

pub struct Combiner<S> {
    queue: Mutex<Queue<S>>,
    state: Mutex<S>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S> Combiner<S> {
    pub fn new(state: S) -> Self {
        Self {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                finally: VecDeque::new(),
                running: false,
            }),
            state: Mutex::new(state),
        }
    }

    pub fn run(&self, job: impl FnOnce(&mut S, &mut CombinerCtx<S>) + Send + 'static) {
        {
            let mut queue = lock(&self.queue);
            queue.jobs.push_back(Box::new(job));
            if queue.running {
                return;
            }
            queue.running = true;
        }
        self.drain();
    }

    fn drain(&self) {
        let mut ctx = CombinerCtx {
            later: Vec::new(),
            finally: Vec::new(),
        };

        loop {
            let job = {
                let mut queue = lock(&self.queue);
                queue.jobs.extend(ctx.later.drain(..));
                queue.finally.extend(ctx.finally.drain(..));
                match queue.jobs.pop_front().or_else(|| queue.finally.pop_front()) {
                    Some(job) => job,
                    None => {
                        queue.running = false;
                        return;
                    }
                }
            };

            let mut state = lock(&self.state);
            job(&mut state, &mut ctx);
        }
    }

    /// Reads the state. Must not be called from a job.
    pub fn with_state<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&lock(&self.state))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    use pretty_assertions::assert_eq;

    use super::Combiner;

    #[test]
    fn test_jobs_run_in_order_and_finally_last() {
        let combiner = Combiner::new(Vec::new());
        combiner.run(|log: &mut Vec<&str>, ctx| {
            log.push("a");
            ctx.finally(|log, _| log.push("finally"));
            ctx.later(|log, _| log.push("c"));
        });
        combiner.run(|log, _| log.push("b"));

        combiner.with_state(|log| assert_eq!(*log, ["a", "c", "finally", "b"]));
    }

    #[test]
    fn test_finally_waits_for_queued_jobs() {
        let combiner = Combiner::new(Vec::new());
        combiner.run(|log: &mut Vec<&str>, ctx| {
            ctx.finally(|log, _| log.push("finally"));
            ctx.later(|log, ctx| {
                log.push("later");
                ctx.later(|log, _| log.push("later again"));
            });
        });

        combiner.with_state(|log| assert_eq!(*log, ["later", "later again", "finally"]));
    }

    #[test]
    fn test_many_threads() {
        let combiner = Arc::new(Combiner::new(0u64));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let combiner = combiner.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..1000 {
                        combiner.run(|n, _| *n += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        combiner.with_state(|n| assert_eq!(*n, 8000));
    }
}
