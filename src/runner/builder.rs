use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tracing::warn;

use super::{Hook, RunnerInner, RunnerShared, Script, ScriptHandle, ScriptRunner};
use crate::callbacks::{Callback, CallbackRegistry};
use crate::collaborators::{CommandDispatcher, LogStatusSink, StatusSink};
use crate::config::RunnerConfig;
use crate::error::ScriptResult;
use crate::runner::script_fn;
use crate::scheduler::Scheduler;

/// Builder for [`ScriptRunner`].
///
/// ```rust,ignore
/// let runner = ScriptRunner::builder("focus", scheduler.clone())
///     .dispatcher(dispatcher.clone())
///     .on_end(|sr| {
///         sr.show_message("focus sweep finished", Severity::Normal);
///         Ok(())
///     })
///     .build(Rc::new(FocusSweep::default()));
/// ```
pub struct ScriptRunnerBuilder {
    name: String,
    scheduler: Rc<dyn Scheduler>,
    dispatcher: Option<Rc<dyn CommandDispatcher>>,
    status: Option<Rc<dyn StatusSink>>,
    on_init: Option<Hook>,
    on_end: Option<Hook>,
    state_callbacks: Vec<Callback<ScriptRunner>>,
    debug_mode: bool,
    start_immediately: bool,
    thread_poll_interval: Duration,
}

impl ScriptRunnerBuilder {
    pub(crate) fn new(name: String, scheduler: Rc<dyn Scheduler>) -> Self {
        let defaults = RunnerConfig::default();
        Self {
            name,
            scheduler,
            dispatcher: None,
            status: None,
            on_init: None,
            on_end: None,
            state_callbacks: Vec::new(),
            debug_mode: defaults.debug_mode,
            start_immediately: false,
            thread_poll_interval: defaults.thread_poll_interval(),
        }
    }

    /// Dispatcher used by `wait_cmd` and `start_cmd`.
    pub fn dispatcher(mut self, dispatcher: Rc<dyn CommandDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Sink for `show_message`. Defaults to [`LogStatusSink`].
    pub fn status(mut self, status: Rc<dyn StatusSink>) -> Self {
        self.status = Some(status);
        self
    }

    /// Hook run by `start()` after the script's own `init`.
    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ScriptHandle) -> ScriptResult<()> + 'static,
    {
        self.on_init = Some(Box::new(hook));
        self
    }

    /// Hook run once at the end of the run, after the script's own `end`.
    pub fn on_end<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ScriptHandle) -> ScriptResult<()> + 'static,
    {
        self.on_end = Some(Box::new(hook));
        self
    }

    /// Subscribe to state changes from construction on.
    pub fn on_state_change(mut self, cb: Callback<ScriptRunner>) -> Self {
        self.state_callbacks.push(cb);
        self
    }

    /// Short-circuit every wait (dry run).
    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Call `start()` from `build()`.
    pub fn start_immediately(mut self, enabled: bool) -> Self {
        self.start_immediately = enabled;
        self
    }

    /// How often a background-task wait checks for its result.
    pub fn thread_poll_interval(mut self, interval: Duration) -> Self {
        self.thread_poll_interval = interval;
        self
    }

    /// Apply the runner settings from a loaded configuration.
    pub fn config(mut self, config: &RunnerConfig) -> Self {
        self.debug_mode = config.debug_mode;
        self.thread_poll_interval = config.thread_poll_interval();
        self
    }

    /// Build the runner for `script`.
    pub fn build(self, script: Rc<dyn Script>) -> ScriptRunner {
        let state_callbacks = CallbackRegistry::new(format!("runner {} state", self.name));
        for cb in self.state_callbacks {
            state_callbacks.subscribe(cb, None);
        }
        let runner = ScriptRunner {
            shared: Rc::new(RunnerShared {
                name: self.name,
                debug_mode: self.debug_mode,
                thread_poll_interval: self.thread_poll_interval,
                scheduler: self.scheduler,
                dispatcher: self.dispatcher,
                status: self.status.unwrap_or_else(|| Rc::new(LogStatusSink)),
                script,
                on_init: self.on_init,
                on_end: self.on_end,
                inner: RefCell::new(RunnerInner::default()),
                future: RefCell::new(None),
                state_callbacks,
            }),
        };
        if self.start_immediately {
            if let Err(err) = runner.start() {
                warn!(runner = %runner.name(), error = %err, "Could not start script");
            }
        }
        runner
    }

    /// Build the runner for an async closure; see [`script_fn`].
    pub fn build_fn<F, Fut>(self, body: F) -> ScriptRunner
    where
        F: Fn(ScriptHandle) -> Fut + 'static,
        Fut: Future<Output = ScriptResult> + 'static,
    {
        self.build(script_fn(body))
    }
}
