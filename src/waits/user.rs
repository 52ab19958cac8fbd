use std::rc::Rc;

use serde_json::Value;

use super::{Suspension, Wait, WaitCore};
use crate::error::ConcurrencyViolation;
use crate::runner::{DebugRecord, RunnerShared};

/// Resumed only by an explicit `resume_user()` on the runner.
pub(crate) struct UserWait {
    core: WaitCore,
}

impl UserWait {
    pub(crate) fn start(runner: &Rc<RunnerShared>) -> Result<Suspension, ConcurrencyViolation> {
        let core = runner.begin_wait("user")?;
        let suspension = core.suspension();
        let wait = Rc::new(Self { core });
        runner.register_wait(wait.clone());

        if runner.debug_mode() {
            runner.record_debug(DebugRecord::WaitUser);
            wait.resume(Value::Null)?;
        } else {
            runner.set_user_wait(&wait);
        }
        Ok(suspension)
    }
}

impl Wait for UserWait {
    fn core(&self) -> &WaitCore {
        &self.core
    }

    fn cleanup(&self) {
        self.core.runner().clear_user_wait(self.core.token());
    }
}
