use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use super::{Suspension, Wait, WaitCore};
use crate::error::ConcurrencyViolation;
use crate::runner::{DebugRecord, RunnerShared};
use crate::scheduler::TimerId;

/// Resumes with `null` after a delay.
pub(crate) struct TimerWait {
    core: WaitCore,
    timer: Cell<Option<TimerId>>,
}

impl TimerWait {
    pub(crate) fn start(
        runner: &Rc<RunnerShared>,
        delay: Duration,
    ) -> Result<Suspension, ConcurrencyViolation> {
        let core = runner.begin_wait("timer")?;
        let suspension = core.suspension();
        let wait = Rc::new(Self {
            core,
            timer: Cell::new(None),
        });
        runner.register_wait(wait.clone());

        if runner.debug_mode() {
            runner.record_debug(DebugRecord::WaitMs(delay));
            wait.resume(Value::Null)?;
            return Ok(suspension);
        }

        let fired = wait.clone();
        let id = runner.scheduler().schedule_after(
            delay,
            Box::new(move || {
                fired.timer.set(None);
                if fired.core.is_armed() {
                    if let Err(err) = fired.resume(Value::Null) {
                        warn!(error = %err, "Timer wait could not resume");
                    }
                }
            }),
        );
        wait.timer.set(Some(id));
        Ok(suspension)
    }
}

impl Wait for TimerWait {
    fn core(&self) -> &WaitCore {
        &self.core
    }

    fn cleanup(&self) {
        if let Some(id) = self.timer.take() {
            self.core.runner().scheduler().cancel(id);
        }
    }
}
