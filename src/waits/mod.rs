//! Wait primitives.
//!
//! Each wait method on [`crate::ScriptHandle`] builds one of the types in
//! this module, registers it with the runner as a pending cancel hook, arms
//! it against its collaborator (scheduler, thread, command handles, value
//! source, or the user), and hands the script a [`Suspension`] to await.
//!
//! # Resolution contract
//!
//! A wait is armed exactly once and resolved at most once:
//!
//! - `resume` delivers a value, releases the wait's callbacks, and advances
//!   the runner. A second `resume` (or `resume` after `cancel`) is an error.
//! - `cancel` releases callbacks and aborts the underlying operation. It is
//!   idempotent in effect: later calls have no side effect and report
//!   [`ConcurrencyViolation::WaitAlreadyResolved`].
//! - `fail` hands a reason to the runner, which fails the run and then
//!   cancels every pending wait (including this one).
//!
//! Collaborator callbacks check [`WaitCore::is_armed`] first, so an event
//! arriving after the wait was resolved is silently dropped.

mod commands;
mod thread;
mod timer;
mod user;
mod value;

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::ConcurrencyViolation;
use crate::runner::{RunnerShared, WaitToken};

pub(crate) use commands::CommandSetWait;
pub(crate) use thread::ThreadWait;
pub(crate) use timer::TimerWait;
pub(crate) use user::UserWait;
pub(crate) use value::ValueWait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitStatus {
    Armed,
    Resumed,
    Cancelled,
}

/// Bookkeeping shared by every wait primitive.
pub(crate) struct WaitCore {
    runner: Rc<RunnerShared>,
    token: WaitToken,
    kind: &'static str,
    status: Cell<WaitStatus>,
}

impl WaitCore {
    pub(crate) fn new(runner: Rc<RunnerShared>, token: WaitToken, kind: &'static str) -> Self {
        Self {
            runner,
            token,
            kind,
            status: Cell::new(WaitStatus::Armed),
        }
    }

    pub(crate) fn runner(&self) -> &Rc<RunnerShared> {
        &self.runner
    }

    pub(crate) fn token(&self) -> WaitToken {
        self.token
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.status.get() == WaitStatus::Armed
    }

    /// The future the script awaits for this wait.
    pub(crate) fn suspension(&self) -> Suspension {
        Suspension {
            runner: Rc::downgrade(&self.runner),
            token: self.token,
        }
    }
}

/// A pending wait, as seen by the runner.
pub(crate) trait Wait {
    fn core(&self) -> &WaitCore;

    /// Release every callback this wait registered. Must be idempotent.
    fn cleanup(&self);

    /// Stop the underlying operation. Defaults to `cleanup`.
    fn abort(&self) {
        self.cleanup();
    }

    /// Deliver `value` to the script and advance the runner.
    fn resume(&self, value: Value) -> Result<(), ConcurrencyViolation> {
        let core = self.core();
        if !core.is_armed() || !core.runner.take_pending(core.token) {
            return Err(ConcurrencyViolation::WaitAlreadyResolved);
        }
        core.status.set(WaitStatus::Resumed);
        self.cleanup();
        trace!(runner = %core.runner.name(), token = %core.token, kind = core.kind, "Wait resumed");
        core.runner.continue_run(core.token, value)
    }

    /// Abort without resuming. Called by the runner when the run ends.
    fn cancel(&self) -> Result<(), ConcurrencyViolation> {
        let core = self.core();
        if !core.is_armed() {
            return Err(ConcurrencyViolation::WaitAlreadyResolved);
        }
        core.status.set(WaitStatus::Cancelled);
        debug!(runner = %core.runner.name(), token = %core.token, kind = core.kind, "Wait cancelled");
        self.abort();
        Ok(())
    }

    /// Fail the run on behalf of this wait.
    fn fail(&self, reason: String) {
        let core = self.core();
        if core.is_armed() {
            core.runner.fail_run(reason);
        }
    }
}

/// Future returned by every wait method; resolves to the resume value.
///
/// It only completes when its runner delivers a value for exactly this
/// wait, so polling it from anywhere other than the runner's own script
/// body just stays pending.
/// While the runner is paused it stays pending even if its value has
/// already arrived.
#[must_use = "a wait does nothing unless it is awaited"]
#[derive(Debug)]
pub struct Suspension {
    runner: Weak<RunnerShared>,
    token: WaitToken,
}

impl Suspension {
    /// The token identifying this wait.
    pub fn token(&self) -> WaitToken {
        self.token
    }
}

impl Future for Suspension {
    type Output = Value;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Value> {
        match self.runner.upgrade() {
            Some(runner) => match runner.take_delivered(self.token) {
                Some(value) => Poll::Ready(value),
                None => Poll::Pending,
            },
            None => Poll::Pending,
        }
    }
}
