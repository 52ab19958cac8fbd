//! Script runner: drives one script through its lifecycle.
//!
//! The runner owns the script's future and polls it itself. It never
//! blocks and never spawns: after every suspension the script only moves
//! again when the wait it issued is resolved (from a scheduler callback, a
//! command or value callback, or `resume_user()`), or when `resume()`
//! releases a value delivered while paused.
//!
//! # Suspension protocol
//!
//! 1. The script calls a wait method on its [`ScriptHandle`]. The runner
//!    allocates a fresh [`WaitToken`], records it as the one expected
//!    resume, and registers the wait as a pending cancel hook.
//! 2. The script awaits the returned [`crate::Suspension`]; the poll
//!    returns `Pending` and control goes back to the event loop.
//! 3. The wait resolves: its token is checked against the expected one,
//!    the value is stored, and the script is polled again.
//!
//! A stale or duplicate resume is rejected with
//! [`ConcurrencyViolation::StaleToken`] and never advances the script.
//!
//! # Termination
//!
//! Finishing, failing and cancelling all go through the same sequence:
//! state and reason are set, pending waits are cancelled most recent
//! first, the script future is dropped, the end-of-run hooks run exactly
//! once, and finally state subscribers are notified.

mod builder;
mod handle;
mod script;
mod state;

pub use builder::ScriptRunnerBuilder;
pub use handle::ScriptHandle;
pub use script::{script_fn, FnScript, Script, ScriptFuture};
pub use state::{DebugRecord, FullState, RunnerState, WaitToken};

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::callbacks::{callback, panic_message, Callback, CallbackRegistry};
use crate::collaborators::{
    Command, CommandDispatcher, CommandHandle, CommandSpec, CommandState, StatusSink,
};
use crate::error::{ConcurrencyViolation, ScriptFailure, ScriptResult};
use crate::scheduler::Scheduler;
use crate::waits::{UserWait, Wait, WaitCore};

pub(crate) type Hook = Box<dyn Fn(&ScriptHandle) -> ScriptResult<()>>;

/// A command started with `check_fail`, watched for the rest of the run.
struct StartedCommand {
    handle: Rc<dyn CommandHandle>,
    on_state: Callback<CommandState>,
}

#[derive(Default)]
struct RunnerInner {
    state: RunnerState,
    reason: String,
    /// Most recent resume value, or the last sub-script result
    value: Value,
    /// Frame names, outermost first
    stack: Vec<String>,
    /// Cancel hooks in registration order
    pending: Vec<Rc<dyn Wait>>,
    started: Vec<StartedCommand>,
    user_wait: Option<Weak<UserWait>>,
    /// Bumped by every start(); stale deferred callbacks compare against it
    generation: u64,
    seq: u64,
    expected: Option<WaitToken>,
    delivered: Option<WaitToken>,
    advancing: bool,
    start_deferred: bool,
    end_hook_ran: bool,
    in_end_hook: bool,
    end_hook_waited: bool,
    debug_log: Vec<DebugRecord>,
}

pub(crate) struct RunnerShared {
    name: String,
    debug_mode: bool,
    thread_poll_interval: Duration,
    scheduler: Rc<dyn Scheduler>,
    dispatcher: Option<Rc<dyn CommandDispatcher>>,
    status: Rc<dyn StatusSink>,
    script: Rc<dyn Script>,
    on_init: Option<Hook>,
    on_end: Option<Hook>,
    inner: RefCell<RunnerInner>,
    future: RefCell<Option<ScriptFuture>>,
    state_callbacks: CallbackRegistry<ScriptRunner>,
}

impl RunnerShared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub(crate) fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn status(&self) -> &Rc<dyn StatusSink> {
        &self.status
    }

    pub(crate) fn thread_poll_interval(&self) -> Duration {
        self.thread_poll_interval
    }

    fn state(&self) -> RunnerState {
        self.inner.borrow().state
    }

    fn handle(self: &Rc<Self>) -> ScriptHandle {
        ScriptHandle::new(Rc::downgrade(self))
    }

    fn runner(self: &Rc<Self>) -> ScriptRunner {
        ScriptRunner {
            shared: Rc::clone(self),
        }
    }

    // -------------------------------------------------------------------------
    // Wait bookkeeping
    // -------------------------------------------------------------------------

    /// Check that the script may issue a wait right now.
    pub(crate) fn check_can_wait(&self) -> Result<(), ConcurrencyViolation> {
        let mut inner = self.inner.borrow_mut();
        if inner.in_end_hook {
            inner.end_hook_waited = true;
            return Err(ConcurrencyViolation::WaitInEndHook);
        }
        if !inner.state.is_executing() {
            return Err(ConcurrencyViolation::NotRunning { state: inner.state });
        }
        if !inner.advancing {
            return Err(ConcurrencyViolation::OutsideScript);
        }
        if inner.expected.is_some() || inner.delivered.is_some() {
            return Err(ConcurrencyViolation::WaitOutstanding);
        }
        Ok(())
    }

    /// Allocate the token for a new wait and make it the expected resume.
    pub(crate) fn begin_wait(
        self: &Rc<Self>,
        kind: &'static str,
    ) -> Result<WaitCore, ConcurrencyViolation> {
        self.check_can_wait()?;
        let mut inner = self.inner.borrow_mut();
        inner.seq += 1;
        let token = WaitToken {
            depth: inner.stack.len(),
            seq: inner.seq,
        };
        inner.expected = Some(token);
        trace!(runner = %self.name, %token, kind, "Wait issued");
        Ok(WaitCore::new(Rc::clone(self), token, kind))
    }

    pub(crate) fn register_wait(&self, wait: Rc<dyn Wait>) {
        self.inner.borrow_mut().pending.push(wait);
    }

    /// Remove the pending hook for `token`. Returns `false` if absent.
    pub(crate) fn take_pending(&self, token: WaitToken) -> bool {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let index = inner
                .pending
                .iter()
                .position(|wait| wait.core().token() == token);
            index.map(|index| inner.pending.remove(index))
        };
        removed.is_some()
    }

    /// Hand the stored value to the suspension for `token`, once.
    ///
    /// While paused the value stays put; `resume()` re-polls for it.
    pub(crate) fn take_delivered(&self, token: WaitToken) -> Option<Value> {
        let mut inner = self.inner.borrow_mut();
        if inner.delivered == Some(token) && inner.state == RunnerState::Running {
            inner.delivered = None;
            Some(inner.value.clone())
        } else {
            None
        }
    }

    pub(crate) fn record_debug(&self, record: DebugRecord) {
        debug!(runner = %self.name, ?record, "Debug mode: wait short-circuited");
        self.inner.borrow_mut().debug_log.push(record);
    }

    pub(crate) fn set_user_wait(&self, wait: &Rc<UserWait>) {
        self.inner.borrow_mut().user_wait = Some(Rc::downgrade(wait));
    }

    pub(crate) fn clear_user_wait(&self, token: WaitToken) {
        let mut inner = self.inner.borrow_mut();
        let current = inner
            .user_wait
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|wait| wait.core().token());
        if current.is_none() || current == Some(token) {
            inner.user_wait = None;
        }
    }

    /// Deliver `value` for `token` and advance the script unless paused.
    pub(crate) fn continue_run(
        self: &Rc<Self>,
        token: WaitToken,
        value: Value,
    ) -> Result<(), ConcurrencyViolation> {
        let advance_now = {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_executing() {
                return Err(ConcurrencyViolation::NotRunning { state: inner.state });
            }
            if inner.expected != Some(token) {
                return Err(ConcurrencyViolation::StaleToken {
                    got: token,
                    expected: inner.expected,
                });
            }
            inner.expected = None;
            inner.delivered = Some(token);
            inner.value = value;
            if inner.state == RunnerState::Paused {
                debug!(runner = %self.name, %token, "Resume deferred while paused");
            }
            inner.state == RunnerState::Running && !inner.advancing
        };
        if advance_now {
            self.advance();
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Driving the script
    // -------------------------------------------------------------------------

    fn advance(self: &Rc<Self>) {
        loop {
            let Some(mut future) = self.future.borrow_mut().take() else {
                return;
            };
            let delivered_before = {
                let mut inner = self.inner.borrow_mut();
                inner.advancing = true;
                inner.delivered
            };

            let waker = futures::task::noop_waker();
            let mut cx = Context::from_waker(&waker);
            let polled = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

            let (state, expected, delivered) = {
                let mut inner = self.inner.borrow_mut();
                inner.advancing = false;
                (inner.state, inner.expected, inner.delivered)
            };
            if state.is_done() {
                // Ended from inside the body (cancelled, or a wait failed)
                return;
            }

            match polled {
                Ok(Poll::Pending) => {
                    *self.future.borrow_mut() = Some(future);
                    match (delivered, expected) {
                        (Some(token), _) if delivered_before == Some(token) => {
                            self.end_run(
                                RunnerState::Failed,
                                format!("script did not await wait {token}"),
                            );
                            return;
                        }
                        (Some(_), _) if state == RunnerState::Running => continue,
                        (Some(_), _) | (None, Some(_)) => return,
                        (None, None) => {
                            error!(runner = %self.name, "Script suspended without a pending wait");
                            self.end_run(
                                RunnerState::Failed,
                                "script suspended on something other than a runner wait".to_string(),
                            );
                            return;
                        }
                    }
                }
                Ok(Poll::Ready(Ok(value))) => {
                    drop(future);
                    if let Some(token) = expected.or(delivered) {
                        error!(runner = %self.name, %token, "Script finished with a wait it never awaited");
                        self.end_run(
                            RunnerState::Failed,
                            format!("script finished without awaiting wait {token}"),
                        );
                        return;
                    }
                    self.inner.borrow_mut().value = value;
                    self.end_run(RunnerState::Done, String::new());
                    return;
                }
                Ok(Poll::Ready(Err(failure))) => {
                    drop(future);
                    self.fail_with(failure);
                    return;
                }
                Err(payload) => {
                    drop(future);
                    self.fail_panicked("script", payload);
                    return;
                }
            }
        }
    }

    /// Fail the run on behalf of a collaborator (a wait or a started command).
    pub(crate) fn fail_run(self: &Rc<Self>, reason: String) {
        if !self.state().is_executing() {
            return;
        }
        warn!(runner = %self.name, %reason, "Script failed");
        self.end_run(RunnerState::Failed, reason);
    }

    fn fail_with(self: &Rc<Self>, failure: ScriptFailure) {
        if !failure.is_unexpected() {
            warn!(runner = %self.name, reason = %failure, "Script failed");
        } else if let ScriptFailure::Violation(err) = &failure {
            error!(runner = %self.name, error = %err, "Script failed: concurrency violation");
        } else {
            error!(runner = %self.name, error = ?failure, "Script failed with an unexpected error");
        }
        self.end_run(RunnerState::Failed, failure.to_string());
    }

    fn fail_panicked(self: &Rc<Self>, what: &str, payload: Box<dyn Any + Send>) {
        let message = panic_message(payload.as_ref());
        error!(runner = %self.name, panic = %message, "{what} panicked");
        self.end_run(RunnerState::Failed, format!("{what} panicked: {message}"));
    }

    fn end_run(self: &Rc<Self>, state: RunnerState, reason: String) {
        let (pending, started) = {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_executing() {
                return;
            }
            inner.state = state;
            inner.reason = reason;
            inner.expected = None;
            inner.delivered = None;
            inner.start_deferred = false;
            inner.user_wait = None;
            inner.stack.clear();
            (
                std::mem::take(&mut inner.pending),
                std::mem::take(&mut inner.started),
            )
        };

        for started in &started {
            started.handle.remove_callback(&started.on_state);
        }
        for wait in pending.iter().rev() {
            if let Err(err) = wait.cancel() {
                trace!(runner = %self.name, error = %err, "Pending wait already resolved");
            }
        }
        drop(pending);
        drop(started);

        let future = self.future.borrow_mut().take();
        drop(future);

        self.run_end_hooks();

        let (state, reason) = {
            let inner = self.inner.borrow();
            (inner.state, inner.reason.clone())
        };
        info!(runner = %self.name, %state, %reason, "Script ended");
        self.notify_state();
    }

    fn run_end_hooks(self: &Rc<Self>) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.end_hook_ran {
                return;
            }
            inner.end_hook_ran = true;
            inner.in_end_hook = true;
            inner.end_hook_waited = false;
        }

        let handle = self.handle();
        let outcome = catch_unwind(AssertUnwindSafe(|| -> ScriptResult<()> {
            self.script.end(&handle)?;
            if let Some(on_end) = &self.on_end {
                on_end(&handle)?;
            }
            Ok(())
        }));

        let mut inner = self.inner.borrow_mut();
        inner.in_end_hook = false;
        let waited = std::mem::take(&mut inner.end_hook_waited);
        let problem = if waited {
            Some("end-of-run hook attempted to wait".to_string())
        } else {
            match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("end-of-run hook failed: {err}")),
                Err(payload) => Some(format!(
                    "end-of-run hook panicked: {}",
                    panic_message(payload.as_ref())
                )),
            }
        };
        if let Some(problem) = problem {
            error!(runner = %self.name, %problem, "End-of-run hook failed");
            inner.reason = if inner.reason.is_empty() {
                problem
            } else {
                format!("{}; {problem}", inner.reason)
            };
            if waited || inner.state == RunnerState::Done {
                inner.state = RunnerState::Failed;
            }
        }
    }

    fn notify_state(self: &Rc<Self>) {
        self.state_callbacks.notify(&self.runner());
    }

    // -------------------------------------------------------------------------
    // Sub-scripts and commands
    // -------------------------------------------------------------------------

    pub(crate) fn push_frame(&self, name: String) {
        let mut inner = self.inner.borrow_mut();
        inner.stack.push(name);
        debug!(runner = %self.name, depth = inner.stack.len(), "Entered sub-script");
    }

    pub(crate) fn pop_frame(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.stack.len() > 1 {
            inner.stack.pop();
        }
    }

    pub(crate) fn set_value(&self, value: Value) {
        self.inner.borrow_mut().value = value;
    }

    pub(crate) fn dispatch(
        &self,
        spec: CommandSpec,
    ) -> Result<Rc<dyn CommandHandle>, ConcurrencyViolation> {
        let dispatcher = self
            .dispatcher
            .as_ref()
            .ok_or(ConcurrencyViolation::MissingDispatcher)?;
        debug!(runner = %self.name, command = %spec, "Dispatching command");
        Ok(dispatcher.dispatch(spec))
    }

    pub(crate) fn start_cmd(
        self: &Rc<Self>,
        spec: CommandSpec,
        check_fail: bool,
    ) -> Result<Rc<dyn CommandHandle>, ConcurrencyViolation> {
        let state = self.state();
        if !state.is_executing() {
            return Err(ConcurrencyViolation::NotRunning { state });
        }
        if self.debug_mode {
            self.record_debug(DebugRecord::StartCmd(spec.clone()));
            let cmd = Command::new(spec);
            cmd.finish();
            let cmd: Rc<dyn CommandHandle> = cmd;
            return Ok(cmd);
        }

        let handle = self.dispatch(spec)?;
        if !check_fail || (handle.is_done() && !handle.did_fail()) {
            return Ok(handle);
        }

        let describe = handle.describe();
        if let Some(text) = handle.failure_text() {
            let weak = Rc::downgrade(self);
            let generation = self.inner.borrow().generation;
            self.scheduler.schedule_after(
                Duration::ZERO,
                Box::new(move || {
                    if let Some(runner) = weak.upgrade() {
                        if runner.inner.borrow().generation == generation {
                            runner.fail_run(format!("command {describe} failed: {text}"));
                        }
                    }
                }),
            );
            return Ok(handle);
        }

        let weak = Rc::downgrade(self);
        let on_state = callback(move |state: &CommandState| {
            if let (CommandState::Failed(text), Some(runner)) = (state, weak.upgrade()) {
                runner.fail_run(format!("command {describe} failed: {text}"));
            }
            Ok(())
        });
        handle.add_callback(on_state.clone());
        self.inner.borrow_mut().started.push(StartedCommand {
            handle: Rc::clone(&handle),
            on_state,
        });
        Ok(handle)
    }
}

/// Drives one script cooperatively on the event-loop thread.
///
/// Cheap to clone; clones share the same run.
#[derive(Clone)]
pub struct ScriptRunner {
    shared: Rc<RunnerShared>,
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.borrow();
        f.debug_struct("ScriptRunner")
            .field("name", &self.shared.name)
            .field("state", &inner.state)
            .field("reason", &inner.reason)
            .field("debug_mode", &self.shared.debug_mode)
            .field("stack_depth", &inner.stack.len())
            .field("pending_waits", &inner.pending.len())
            .finish()
    }
}

impl ScriptRunner {
    /// Start building a runner.
    pub fn builder(name: impl Into<String>, scheduler: Rc<dyn Scheduler>) -> ScriptRunnerBuilder {
        ScriptRunnerBuilder::new(name.into(), scheduler)
    }

    /// Start the script.
    ///
    /// Runs the init hooks, then the script body up to its first wait.
    /// Errors if the runner is executing or has finished (use
    /// [`reset`](Self::reset) first).
    pub fn start(&self) -> Result<(), ConcurrencyViolation> {
        let shared = &self.shared;
        {
            let mut inner = shared.inner.borrow_mut();
            match inner.state {
                RunnerState::Running | RunnerState::Paused => {
                    return Err(ConcurrencyViolation::AlreadyExecuting)
                }
                RunnerState::Done | RunnerState::Cancelled | RunnerState::Failed => {
                    return Err(ConcurrencyViolation::Finished { state: inner.state })
                }
                RunnerState::Ready => {}
            }
            inner.state = RunnerState::Running;
            inner.reason.clear();
            inner.value = Value::Null;
            inner.stack = vec![shared.name.clone()];
            inner.generation += 1;
            inner.end_hook_ran = false;
        }
        info!(runner = %shared.name, debug_mode = shared.debug_mode, "Script started");
        shared.notify_state();
        if !shared.state().is_executing() {
            return Ok(());
        }

        let handle = shared.handle();
        let prepared = catch_unwind(AssertUnwindSafe(|| -> ScriptResult<ScriptFuture> {
            shared.script.init(&handle)?;
            if let Some(on_init) = &shared.on_init {
                on_init(&handle)?;
            }
            Ok(Rc::clone(&shared.script).run(handle.clone()))
        }));
        let future = match prepared {
            Ok(Ok(future)) => future,
            Ok(Err(failure)) => {
                shared.fail_with(failure);
                return Ok(());
            }
            Err(payload) => {
                shared.fail_panicked("init hook", payload);
                return Ok(());
            }
        };

        let state = shared.state();
        if !state.is_executing() {
            return Ok(());
        }
        *shared.future.borrow_mut() = Some(future);
        if state == RunnerState::Paused {
            shared.inner.borrow_mut().start_deferred = true;
        } else {
            shared.advance();
        }
        Ok(())
    }

    /// Pause the script. Ignored unless Running.
    ///
    /// A wait that resolves while paused keeps its value until `resume()`.
    pub fn pause(&self) {
        {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.state != RunnerState::Running {
                debug!(runner = %self.shared.name, state = %inner.state, "Pause ignored");
                return;
            }
            inner.state = RunnerState::Paused;
        }
        info!(runner = %self.shared.name, "Script paused");
        self.shared.notify_state();
    }

    /// Resume a paused script. Ignored unless Paused.
    pub fn resume(&self) {
        let owed = {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.state != RunnerState::Paused {
                debug!(runner = %self.shared.name, state = %inner.state, "Resume ignored");
                return;
            }
            inner.state = RunnerState::Running;
            let start_deferred = std::mem::take(&mut inner.start_deferred);
            !inner.advancing && (inner.delivered.is_some() || start_deferred)
        };
        info!(runner = %self.shared.name, "Script resumed");
        self.shared.notify_state();
        if owed && self.shared.state() == RunnerState::Running {
            self.shared.advance();
        }
    }

    /// Cancel the script. Ignored unless executing.
    pub fn cancel(&self) {
        if !self.shared.state().is_executing() {
            return;
        }
        info!(runner = %self.shared.name, "Cancelling script");
        self.shared.end_run(RunnerState::Cancelled, String::new());
    }

    /// Return a finished runner to Ready so it can be started again.
    pub fn reset(&self) -> Result<(), ConcurrencyViolation> {
        {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.state.is_executing() {
                return Err(ConcurrencyViolation::AlreadyExecuting);
            }
            if inner.in_end_hook {
                return Err(ConcurrencyViolation::Finished { state: inner.state });
            }
            if inner.state == RunnerState::Ready {
                return Ok(());
            }
            inner.state = RunnerState::Ready;
            inner.reason.clear();
            inner.value = Value::Null;
            inner.debug_log.clear();
            inner.end_hook_ran = false;
        }
        info!(runner = %self.shared.name, "Script reset");
        self.shared.notify_state();
        Ok(())
    }

    /// Cancel if executing and drop every state subscriber.
    pub fn dispose(&self) {
        self.cancel();
        self.shared.state_callbacks.clear();
    }

    /// Resume the outstanding user wait with `null`.
    pub fn resume_user(&self) -> Result<(), ConcurrencyViolation> {
        let wait = self
            .shared
            .inner
            .borrow()
            .user_wait
            .as_ref()
            .and_then(Weak::upgrade);
        match wait {
            Some(wait) => wait.resume(Value::Null),
            None => Err(ConcurrencyViolation::NoUserWait),
        }
    }

    /// Resolve the pending wait identified by `token` with `value`.
    ///
    /// This is the entry point every wait uses internally. A token that
    /// does not name the outstanding wait is rejected and the script does
    /// not move.
    pub fn continue_with(&self, token: WaitToken, value: Value) -> Result<(), ConcurrencyViolation> {
        let (wait, expected) = {
            let inner = self.shared.inner.borrow();
            let wait = inner
                .pending
                .iter()
                .find(|wait| wait.core().token() == token)
                .cloned();
            (wait, inner.expected)
        };
        match wait {
            Some(wait) => wait.resume(value),
            None => Err(ConcurrencyViolation::StaleToken {
                got: token,
                expected,
            }),
        }
    }

    /// Subscribe to state changes. With `call_now`, the new subscriber is
    /// called once immediately.
    pub fn add_state_callback(&self, cb: Callback<ScriptRunner>, call_now: bool) -> bool {
        if call_now {
            self.shared.state_callbacks.subscribe(cb, Some(self))
        } else {
            self.shared.state_callbacks.subscribe(cb, None)
        }
    }

    /// Unsubscribe from state changes.
    pub fn remove_state_callback(
        &self,
        cb: &Callback<ScriptRunner>,
        raise_on_missing: bool,
    ) -> Result<bool, ConcurrencyViolation> {
        self.shared.state_callbacks.unsubscribe(cb, raise_on_missing)
    }

    /// Handle the script (or test code) uses for script-facing calls.
    pub fn handle(&self) -> ScriptHandle {
        self.shared.handle()
    }

    /// Runner name, used in logs.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state.
    pub fn state(&self) -> RunnerState {
        self.shared.state()
    }

    /// Reason attached to the current state.
    pub fn reason(&self) -> String {
        self.shared.inner.borrow().reason.clone()
    }

    /// State, display name and reason in one snapshot.
    pub fn full_state(&self) -> FullState {
        let inner = self.shared.inner.borrow();
        FullState {
            state: inner.state,
            state_name: inner.state.name().to_string(),
            reason: inner.reason.clone(),
        }
    }

    /// Running or Paused.
    pub fn is_executing(&self) -> bool {
        self.state().is_executing()
    }

    /// Done, Cancelled or Failed.
    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    /// Whether the runner is Paused.
    pub fn is_paused(&self) -> bool {
        self.state() == RunnerState::Paused
    }

    /// Whether the run ended in Failed.
    pub fn did_fail(&self) -> bool {
        self.state() == RunnerState::Failed
    }

    /// Whether waits are short-circuited.
    pub fn debug_mode(&self) -> bool {
        self.shared.debug_mode
    }

    /// Most recent resume value, sub-script result, or final result.
    pub fn value(&self) -> Value {
        self.shared.inner.borrow().value.clone()
    }

    /// Number of active frames; 1 while the top-level body runs.
    pub fn stack_depth(&self) -> usize {
        self.shared.inner.borrow().stack.len()
    }

    /// Frame names, outermost first.
    pub fn stack(&self) -> Vec<String> {
        self.shared.inner.borrow().stack.clone()
    }

    /// Number of registered cancel hooks.
    pub fn pending_waits(&self) -> usize {
        self.shared.inner.borrow().pending.len()
    }

    /// Token of the wait the runner expects to be resumed next.
    pub fn current_token(&self) -> Option<WaitToken> {
        self.shared.inner.borrow().expected
    }

    /// Waits short-circuited in debug mode, in order.
    pub fn debug_log(&self) -> Vec<DebugRecord> {
        self.shared.inner.borrow().debug_log.clone()
    }
}
