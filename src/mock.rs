//! Mock Command Dispatcher
//!
//! Simulated command execution for tests, dry runs and the demo binary.
//!
//! # Behavior
//!
//! - Manual mode ([`MockDispatcher::new`]): commands stay running until the
//!   caller finishes or fails them through [`MockDispatcher::dispatched`].
//! - Timed mode ([`MockDispatcher::timed`]): each command completes after a
//!   fixed duration on the given scheduler. Commands whose text starts with
//!   `fail` complete with a simulated failure.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::collaborators::{Command, CommandDispatcher, CommandHandle, CommandSpec};
use crate::scheduler::Scheduler;

/// Text of the failure reported by timed `fail…` commands
pub const SIMULATED_FAILURE: &str = "simulated failure";

/// Mock dispatcher that records every command it starts.
///
/// # Example
///
/// ```rust,ignore
/// let dispatcher = Rc::new(MockDispatcher::timed(scheduler.clone(), Duration::from_millis(200)));
/// let runner = ScriptRunner::builder("slew", scheduler.clone())
///     .dispatcher(dispatcher.clone())
///     .build_fn(|sr| async move {
///         sr.wait_cmd(CommandSpec::new("tcc", "track 10,20"), true)?.await;
///         Ok(Value::Null)
///     });
/// ```
#[derive(Default)]
pub struct MockDispatcher {
    timing: Option<(Rc<dyn Scheduler>, Duration)>,
    dispatched: RefCell<Vec<Rc<Command>>>,
}

impl MockDispatcher {
    /// Dispatcher whose commands never complete on their own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher whose commands complete `duration` after dispatch.
    pub fn timed(scheduler: Rc<dyn Scheduler>, duration: Duration) -> Self {
        Self {
            timing: Some((scheduler, duration)),
            dispatched: RefCell::new(Vec::new()),
        }
    }

    /// Every command dispatched so far, oldest first.
    pub fn dispatched(&self) -> Vec<Rc<Command>> {
        self.dispatched.borrow().clone()
    }

    /// The most recently dispatched command.
    pub fn last(&self) -> Option<Rc<Command>> {
        self.dispatched.borrow().last().cloned()
    }
}

impl CommandDispatcher for MockDispatcher {
    fn dispatch(&self, spec: CommandSpec) -> Rc<dyn CommandHandle> {
        debug!(command = %spec, "Mock dispatch");
        let cmd = Command::new(spec);
        self.dispatched.borrow_mut().push(Rc::clone(&cmd));

        if let Some((scheduler, duration)) = &self.timing {
            let pending = Rc::clone(&cmd);
            scheduler.schedule_after(
                *duration,
                Box::new(move || {
                    if pending.spec().text.starts_with("fail") {
                        pending.fail(SIMULATED_FAILURE);
                    } else {
                        pending.finish();
                    }
                }),
            );
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CommandState;
    use crate::scheduler::ManualScheduler;

    #[test]
    fn manual_commands_stay_running() {
        let dispatcher = MockDispatcher::new();
        let handle = dispatcher.dispatch(CommandSpec::new("tcc", "slew"));
        assert!(!handle.is_done());

        let cmd = dispatcher.last().unwrap();
        cmd.finish();
        assert!(handle.is_done());
        assert_eq!(dispatcher.dispatched().len(), 1);
    }

    #[test]
    fn timed_commands_complete_on_schedule() {
        let scheduler = Rc::new(ManualScheduler::new());
        let dispatcher = MockDispatcher::timed(scheduler.clone(), Duration::from_millis(50));

        let ok = dispatcher.dispatch(CommandSpec::new("tcc", "track 10,20"));
        let bad = dispatcher.dispatch(CommandSpec::new("dis", "fail expose"));

        scheduler.advance(Duration::from_millis(49));
        assert!(!ok.is_done());

        scheduler.advance(Duration::from_millis(1));
        assert!(ok.is_done() && !ok.did_fail());
        assert!(bad.did_fail());
        assert_eq!(bad.failure_text().as_deref(), Some(SIMULATED_FAILURE));
        assert_eq!(
            dispatcher.dispatched()[1].state(),
            CommandState::Failed(SIMULATED_FAILURE.to_string())
        );
    }
}
