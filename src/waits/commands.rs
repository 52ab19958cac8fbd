use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::{Suspension, Wait, WaitCore};
use crate::callbacks::{callback, Callback};
use crate::collaborators::{CommandHandle, CommandState};
use crate::error::ConcurrencyViolation;
use crate::runner::{DebugRecord, RunnerShared};
use crate::scheduler::TimerId;

/// Waits for a set of commands to finish.
///
/// With `check_fail`, the first failure fails the run. If the outcome is
/// already decided when the wait is created, resolution is deferred to the
/// next scheduler tick so the script always observes an asynchronous
/// resume.
pub(crate) struct CommandSetWait {
    core: WaitCore,
    handles: Vec<Rc<dyn CommandHandle>>,
    check_fail: bool,
    ret_val: Value,
    on_state: RefCell<Option<Callback<CommandState>>>,
    deferred: Cell<Option<TimerId>>,
}

impl CommandSetWait {
    pub(crate) fn start(
        runner: &Rc<RunnerShared>,
        handles: Vec<Rc<dyn CommandHandle>>,
        check_fail: bool,
        ret_val: Value,
        record: DebugRecord,
    ) -> Result<Suspension, ConcurrencyViolation> {
        let core = runner.begin_wait("commands")?;
        let suspension = core.suspension();
        let wait = Rc::new(Self {
            core,
            handles,
            check_fail,
            ret_val,
            on_state: RefCell::new(None),
            deferred: Cell::new(None),
        });
        runner.register_wait(wait.clone());

        if runner.debug_mode() {
            runner.record_debug(record);
            if wait.first_failure().is_some() {
                Self::defer(&wait);
            } else {
                wait.resume(wait.ret_val.clone())?;
            }
            return Ok(suspension);
        }

        if wait.first_failure().is_some() || wait.handles.iter().all(|h| h.is_done()) {
            Self::defer(&wait);
            return Ok(suspension);
        }

        let weak: Weak<Self> = Rc::downgrade(&wait);
        let on_state = callback(move |_: &CommandState| {
            if let Some(wait) = weak.upgrade() {
                wait.check();
            }
            Ok(())
        });
        for handle in wait.handles.iter().filter(|h| !h.is_done()) {
            handle.add_callback(on_state.clone());
        }
        *wait.on_state.borrow_mut() = Some(on_state);
        Ok(suspension)
    }

    fn defer(wait: &Rc<Self>) {
        let next = wait.clone();
        let id = wait
            .core
            .runner()
            .scheduler()
            .schedule_after(Duration::ZERO, Box::new(move || {
                next.deferred.set(None);
                next.check();
            }));
        wait.deferred.set(Some(id));
    }

    fn first_failure(&self) -> Option<String> {
        if !self.check_fail {
            return None;
        }
        self.handles.iter().find(|h| h.did_fail()).map(|h| {
            format!(
                "command {} failed: {}",
                h.describe(),
                h.failure_text().unwrap_or_default()
            )
        })
    }

    fn check(&self) {
        if !self.core.is_armed() {
            return;
        }
        if let Some(reason) = self.first_failure() {
            self.fail(reason);
        } else if self.handles.iter().all(|h| h.is_done()) {
            if let Err(err) = self.resume(self.ret_val.clone()) {
                warn!(error = %err, "Command wait could not resume");
            }
        }
    }
}

impl Wait for CommandSetWait {
    fn core(&self) -> &WaitCore {
        &self.core
    }

    fn cleanup(&self) {
        if let Some(id) = self.deferred.take() {
            self.core.runner().scheduler().cancel(id);
        }
        let on_state = self.on_state.borrow_mut().take();
        if let Some(on_state) = on_state {
            for handle in &self.handles {
                handle.remove_callback(&on_state);
            }
        }
    }

    fn abort(&self) {
        self.cleanup();
        for handle in self.handles.iter().filter(|h| !h.is_done()) {
            debug!(command = %handle.describe(), "Aborting command");
            handle.abort();
        }
    }
}
