//! Single-threaded cooperative scheduler.
//!
//! Exactly one task executes at any instant; tasks hand control back at
//! suspension points (timer waits, channel reads/writes, explicit yields).
//! A task that never suspends starves every other task — that is a caller
//! obligation, not enforced here. There is no task-level cancellation: a
//! task always runs to its next suspension point.

use std::future::Future;
use std::time::Duration;

use crate::context::Context;
use crate::error::CoreError;

/// Drives the task queue owned by a [`Context`] on the calling native
/// thread. Built on a current-thread reactor so timers and I/O readiness
/// wake tasks without introducing parallelism.
#[derive(Debug)]
pub struct Scheduler {
    rt: tokio::runtime::Runtime,
}

impl Scheduler {
    pub fn new() -> Result<Self, CoreError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { rt })
    }

    /// Run ready tasks and sleep for the next timer/I/O event, repeatedly,
    /// until some task calls [`Context::stop`]. Outstanding tasks are
    /// abandoned when this returns.
    pub fn run(&self, ctx: &Context) {
        tracing::info!("scheduler running");
        ctx.tasks.block_on(&self.rt, ctx.stopped());
        tracing::info!("scheduler stopped");
    }

    /// Drive the task queue until `main` completes, returning its output.
    /// Setup and test harness entry point; `run` is the steady-state loop.
    pub fn block_on<F: Future>(&self, ctx: &Context, main: F) -> F::Output {
        ctx.tasks.block_on(&self.rt, main)
    }
}

/// Suspend the calling task until at least `duration` has elapsed on the
/// monotonic clock; other tasks run in the meantime.
pub async fn wait_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Suspend the calling task for exactly one scheduler turn. No time
/// guarantee; ready tasks ahead in the queue run first.
pub async fn yield_now() {
    tokio::task::yield_now().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn run_returns_after_stop() {
        let ctx = Context::new();
        let sched = Scheduler::new().unwrap();

        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let c = ctx.clone();
        ctx.spawn(async move {
            h.set(h.get() + 1);
            c.stop();
        });

        sched.run(&ctx);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn spawn_before_run_is_deferred() {
        let ctx = Context::new();
        let sched = Scheduler::new().unwrap();

        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let o = order.clone();
        ctx.spawn(async move {
            o.borrow_mut().push("task");
        });
        order.borrow_mut().push("caller");

        let c = ctx.clone();
        ctx.spawn(async move {
            yield_now().await;
            c.stop();
        });

        sched.run(&ctx);
        assert_eq!(*order.borrow(), vec!["caller", "task"]);
    }

    #[test]
    fn post_defers_out_of_current_stack() {
        let ctx = Context::new();
        let sched = Scheduler::new().unwrap();

        let flag = Rc::new(Cell::new(false));
        let f = flag.clone();
        ctx.post(move || f.set(true));
        assert!(!flag.get());

        sched.block_on(&ctx, yield_now());
        assert!(flag.get());
    }

    #[test]
    fn wait_for_lets_other_tasks_run() {
        let ctx = Context::new();
        let sched = Scheduler::new().unwrap();

        let counter = Rc::new(Cell::new(0));

        // Task A sleeps, then records what it observed.
        let seen = Rc::new(Cell::new(-1));
        {
            let counter = counter.clone();
            let seen = seen.clone();
            let c = ctx.clone();
            ctx.spawn(async move {
                wait_for(Duration::from_millis(20)).await;
                seen.set(counter.get());
                c.stop();
            });
        }

        // Posted increment runs on an earlier turn than A's resume.
        {
            let counter = counter.clone();
            ctx.post(move || counter.set(counter.get() + 1));
        }

        sched.run(&ctx);
        assert_eq!(seen.get(), 1);
    }
}
