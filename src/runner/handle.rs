//! Script-facing API.

use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::Value;

use super::{RunnerShared, Script, ScriptRunner};
use crate::collaborators::{CommandHandle, CommandSpec, Severity, ValueSource};
use crate::error::{ConcurrencyViolation, ScriptError, ScriptResult};
use crate::runner::DebugRecord;
use crate::waits::{CommandSetWait, Suspension, ThreadWait, TimerWait, UserWait, ValueWait};

/// What a script uses to talk to its runner.
///
/// Every `wait_*` method registers its wait immediately and returns a
/// [`Suspension`] that must be awaited before any other wait is issued:
///
/// ```rust,ignore
/// let pos = sr.wait_key_var(tcc_pos.clone(), None, true)?.await;
/// ```
///
/// The handle holds only a weak reference, so a script keeping it alive
/// does not keep its runner alive.
#[derive(Clone)]
pub struct ScriptHandle {
    runner: Weak<RunnerShared>,
}

impl std::fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.runner.upgrade() {
            Some(runner) => f.debug_tuple("ScriptHandle").field(&runner.name()).finish(),
            None => f.write_str("ScriptHandle(<gone>)"),
        }
    }
}

impl ScriptHandle {
    pub(crate) fn new(runner: Weak<RunnerShared>) -> Self {
        Self { runner }
    }

    fn shared(&self) -> Result<Rc<RunnerShared>, ConcurrencyViolation> {
        self.runner.upgrade().ok_or(ConcurrencyViolation::RunnerGone)
    }

    /// The owning runner, for lifecycle calls such as `pause()`.
    pub fn runner(&self) -> Result<ScriptRunner, ConcurrencyViolation> {
        Ok(ScriptRunner {
            shared: self.shared()?,
        })
    }

    /// Whether waits are short-circuited.
    pub fn is_debug(&self) -> bool {
        self.runner
            .upgrade()
            .is_some_and(|runner| runner.debug_mode())
    }

    /// Suspend for `ms` milliseconds; resumes with `null`.
    pub fn wait_ms(&self, ms: u64) -> Result<Suspension, ConcurrencyViolation> {
        TimerWait::start(&self.shared()?, Duration::from_millis(ms))
    }

    /// Run `task` on a background thread; resumes with its result.
    ///
    /// An `Err` from the task, or a panic, fails the run. The task must not
    /// touch the runner.
    pub fn wait_thread<F>(&self, task: F) -> Result<Suspension, ConcurrencyViolation>
    where
        F: FnOnce() -> anyhow::Result<Value> + Send + 'static,
    {
        ThreadWait::start(&self.shared()?, task)
    }

    /// Dispatch `spec` and wait for it to finish; resumes with `null`.
    ///
    /// With `check_fail`, a command failure fails the run.
    pub fn wait_cmd(
        &self,
        spec: CommandSpec,
        check_fail: bool,
    ) -> Result<Suspension, ConcurrencyViolation> {
        let runner = self.shared()?;
        runner.check_can_wait()?;
        let handles = if runner.debug_mode() {
            Vec::new()
        } else {
            vec![runner.dispatch(spec.clone())?]
        };
        CommandSetWait::start(&runner, handles, check_fail, Value::Null, DebugRecord::WaitCmd(spec))
    }

    /// Wait for already-started commands to finish; resumes with `ret_val`.
    pub fn wait_cmd_vars(
        &self,
        handles: Vec<Rc<dyn CommandHandle>>,
        check_fail: bool,
        ret_val: Value,
    ) -> Result<Suspension, ConcurrencyViolation> {
        let record = DebugRecord::WaitCmdVars(handles.iter().map(|h| h.describe()).collect());
        CommandSetWait::start(&self.shared()?, handles, check_fail, ret_val, record)
    }

    /// Wait for `source` to hold a valid value; resumes with that value.
    ///
    /// Without `wait_next`, a value that is already valid resumes
    /// immediately. If the source reports an invalid value, `default` is
    /// used when given; otherwise the run fails.
    pub fn wait_key_var(
        &self,
        source: Rc<dyn ValueSource>,
        default: Option<Value>,
        wait_next: bool,
    ) -> Result<Suspension, ConcurrencyViolation> {
        ValueWait::start(&self.shared()?, source, default, wait_next)
    }

    /// Wait until the runner's `resume_user()` is called.
    pub fn wait_user(&self) -> Result<Suspension, ConcurrencyViolation> {
        UserWait::start(&self.shared()?)
    }

    /// Dispatch a command without waiting for it.
    ///
    /// With `check_fail`, a later failure of the command fails the run.
    /// In debug mode nothing is dispatched and an already-finished command
    /// is returned.
    pub fn start_cmd(
        &self,
        spec: CommandSpec,
        check_fail: bool,
    ) -> Result<Rc<dyn CommandHandle>, ConcurrencyViolation> {
        self.shared()?.start_cmd(spec, check_fail)
    }

    /// Read the current value of `source` without waiting.
    pub fn get_current_value(
        &self,
        source: &dyn ValueSource,
        default: Option<Value>,
    ) -> Result<Value, ScriptError> {
        source
            .current_value()
            .or(default)
            .ok_or_else(|| ScriptError::new(format!("{} value is invalid", source.describe())))
    }

    /// Show a status message through the runner's status sink.
    pub fn show_message(&self, text: &str, severity: Severity) {
        if let Some(runner) = self.runner.upgrade() {
            runner.status().show(text, severity);
        }
    }

    /// Run `body` as a sub-script in a new frame.
    ///
    /// The result becomes the runner's value; an error propagates to the
    /// caller like any other.
    pub async fn call<F>(&self, name: impl Into<String>, body: F) -> ScriptResult
    where
        F: Future<Output = ScriptResult>,
    {
        self.shared()?.push_frame(name.into());
        let result = body.await;
        if let Some(runner) = self.runner.upgrade() {
            runner.pop_frame();
        }
        let value = result?;
        if let Some(runner) = self.runner.upgrade() {
            runner.set_value(value.clone());
        }
        Ok(value)
    }

    /// Run another [`Script`] as a sub-script, sharing this runner.
    pub async fn call_script(&self, name: impl Into<String>, script: Rc<dyn Script>) -> ScriptResult {
        self.call(name, script.run(self.clone())).await
    }
}
