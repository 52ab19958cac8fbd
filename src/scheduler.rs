//! Deferred-call schedulers.
//!
//! The runner never blocks and never spawns tasks of its own: everything it
//! does after a suspension happens inside a callback handed to a
//! [`Scheduler`]. All callbacks must fire on the thread that drives the
//! event loop, which is why callbacks are `!Send` boxes.
//!
//! Two implementations are provided:
//!
//! - [`ManualScheduler`]: a virtual clock advanced explicitly by the caller.
//!   Deterministic, so tests and dry runs do not depend on wall time.
//! - [`LocalScheduler`]: real timers on a tokio `LocalSet`, for embedding in
//!   an application event loop.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

/// Handle to a scheduled callback, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// An event loop's deferred-call primitive.
pub trait Scheduler {
    /// Run `callback` once, `delay` from now, on the event-loop thread.
    fn schedule_after(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Cancel a scheduled callback. Returns `false` if it already fired or
    /// was already cancelled.
    fn cancel(&self, id: TimerId) -> bool;
}

// =============================================================================
// ManualScheduler
// =============================================================================

/// Scheduler driven by a virtual clock.
///
/// Callbacks run only from [`advance`](Self::advance),
/// [`step`](Self::step) or [`run_until_idle`](Self::run_until_idle), in
/// due-time order with ties broken by scheduling order.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = Rc::new(ManualScheduler::new());
/// let runner = ScriptRunner::builder("demo", scheduler.clone()).build_fn(|sr| async move {
///     sr.wait_ms(500)?.await;
///     Ok(Value::Null)
/// });
/// runner.start()?;
/// scheduler.advance(Duration::from_millis(500));
/// assert!(runner.is_done());
/// ```
#[derive(Default)]
pub struct ManualScheduler {
    now: Cell<Duration>,
    next_id: Cell<u64>,
    queue: RefCell<BTreeMap<(Duration, u64), Box<dyn FnOnce()>>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now.get())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualScheduler {
    /// Create a scheduler with its clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Number of callbacks waiting to fire.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run the earliest callback, moving the clock to its due time.
    ///
    /// Returns the due time of the callback that ran, or `None` when idle.
    pub fn step(&self) -> Option<Duration> {
        self.pop_due(None)
    }

    /// Move the clock forward by `by`, running every callback that becomes
    /// due, including ones scheduled by callbacks along the way.
    ///
    /// Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now.get() + by;
        let mut ran = 0;
        while self.pop_due(Some(target)).is_some() {
            ran += 1;
        }
        self.now.set(target);
        ran
    }

    /// Run callbacks until none remain. Returns the number run.
    ///
    /// Never returns while something keeps rescheduling itself (an
    /// unfinished background-task poll, for instance); use
    /// [`advance`](Self::advance) for those.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.step().is_some() {
            ran += 1;
        }
        ran
    }

    fn pop_due(&self, limit: Option<Duration>) -> Option<Duration> {
        let (due, callback) = {
            let mut queue = self.queue.borrow_mut();
            let key = *queue.keys().next()?;
            if limit.is_some_and(|limit| key.0 > limit) {
                return None;
            }
            let callback = queue.remove(&key)?;
            (key.0, callback)
        };
        if due > self.now.get() {
            self.now.set(due);
        }
        callback();
        Some(due)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let due = self.now.get() + delay;
        self.queue.borrow_mut().insert((due, id), callback);
        trace!(id, ?due, "Scheduled callback");
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) -> bool {
        let removed = {
            let mut queue = self.queue.borrow_mut();
            let key = queue.keys().find(|(_, seq)| *seq == id.0).copied();
            key.and_then(|key| queue.remove(&key))
        };
        // Callback is dropped here, outside the queue borrow
        removed.is_some()
    }
}

// =============================================================================
// LocalScheduler
// =============================================================================

/// Scheduler backed by tokio timers on the current `LocalSet`.
///
/// `schedule_after` must be called from within a `LocalSet` (it uses
/// `tokio::task::spawn_local`).
#[derive(Debug, Default)]
pub struct LocalScheduler {
    next_id: Cell<u64>,
    tasks: Rc<RefCell<HashMap<TimerId, tokio::task::JoinHandle<()>>>>,
}

impl LocalScheduler {
    /// Create a scheduler with no outstanding timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have not fired or been cancelled.
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl Scheduler for LocalScheduler {
    fn schedule_after(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);

        let tasks = Rc::clone(&self.tasks);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            tasks.borrow_mut().remove(&id);
            callback();
        });
        // The task cannot run before this insert: spawn_local only queues it
        self.tasks.borrow_mut().insert(id, handle);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let handle = self.tasks.borrow_mut().remove(&id);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(label)) as Box<dyn FnOnce()>
        };
        (log, make)
    }

    #[test]
    fn manual_scheduler_runs_in_due_order() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();

        scheduler.schedule_after(Duration::from_millis(20), make("late"));
        scheduler.schedule_after(Duration::from_millis(10), make("early"));
        scheduler.schedule_after(Duration::from_millis(10), make("early-second"));

        assert_eq!(scheduler.advance(Duration::from_millis(15)), 2);
        assert_eq!(*log.borrow(), vec!["early", "early-second"]);
        assert_eq!(scheduler.now(), Duration::from_millis(15));

        assert_eq!(scheduler.run_until_idle(), 1);
        assert_eq!(*log.borrow(), vec!["early", "early-second", "late"]);
        assert_eq!(scheduler.now(), Duration::from_millis(20));
    }

    #[test]
    fn manual_scheduler_cancel() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();

        let id = scheduler.schedule_after(Duration::from_millis(5), make("never"));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));

        scheduler.run_until_idle();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn callbacks_may_schedule_more_work() {
        let scheduler = Rc::new(ManualScheduler::new());
        let hits = Rc::new(Cell::new(0));

        let inner_sched = scheduler.clone();
        let inner_hits = hits.clone();
        scheduler.schedule_after(
            Duration::ZERO,
            Box::new(move || {
                inner_hits.set(inner_hits.get() + 1);
                let hits = inner_hits.clone();
                inner_sched.schedule_after(
                    Duration::ZERO,
                    Box::new(move || hits.set(hits.get() + 1)),
                );
            }),
        );

        assert_eq!(scheduler.advance(Duration::ZERO), 2);
        assert_eq!(hits.get(), 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn local_scheduler_fires_and_cancels() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let (log, make) = recorder();

                scheduler.schedule_after(Duration::from_millis(10), make("fired"));
                let cancelled = scheduler.schedule_after(Duration::from_millis(10), make("cancelled"));
                assert!(scheduler.cancel(cancelled));
                assert_eq!(scheduler.pending(), 1);

                tokio::time::sleep(Duration::from_millis(20)).await;

                assert_eq!(*log.borrow(), vec!["fired"]);
                assert_eq!(scheduler.pending(), 0);
            })
            .await;
    }
}
