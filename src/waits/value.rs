use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::warn;

use super::{Suspension, Wait, WaitCore};
use crate::callbacks::{callback, Callback};
use crate::collaborators::ValueSource;
use crate::error::ConcurrencyViolation;
use crate::runner::{DebugRecord, RunnerShared};

/// Waits for a value source to hold a valid value.
pub(crate) struct ValueWait {
    core: WaitCore,
    source: Rc<dyn ValueSource>,
    default: Option<Value>,
    on_value: RefCell<Option<Callback<Option<Value>>>>,
}

impl ValueWait {
    pub(crate) fn start(
        runner: &Rc<RunnerShared>,
        source: Rc<dyn ValueSource>,
        default: Option<Value>,
        wait_next: bool,
    ) -> Result<Suspension, ConcurrencyViolation> {
        let core = runner.begin_wait("value")?;
        let suspension = core.suspension();
        let wait = Rc::new(Self {
            core,
            source,
            default,
            on_value: RefCell::new(None),
        });
        runner.register_wait(wait.clone());

        let current = wait.source.current_value();
        if runner.debug_mode() {
            runner.record_debug(DebugRecord::WaitKeyVar(wait.source.describe()));
            let value = current.or_else(|| wait.default.clone()).unwrap_or(Value::Null);
            wait.resume(value)?;
            return Ok(suspension);
        }

        if let (Some(value), false) = (current, wait_next) {
            wait.resume(value)?;
            return Ok(suspension);
        }

        let weak: Weak<Self> = Rc::downgrade(&wait);
        let on_value = callback(move |value: &Option<Value>| {
            if let Some(wait) = weak.upgrade() {
                wait.on_update(value.clone());
            }
            Ok(())
        });
        wait.source.add_callback(on_value.clone());
        *wait.on_value.borrow_mut() = Some(on_value);
        Ok(suspension)
    }

    fn on_update(&self, value: Option<Value>) {
        if !self.core.is_armed() {
            return;
        }
        match value.or_else(|| self.default.clone()) {
            Some(value) => {
                if let Err(err) = self.resume(value) {
                    warn!(error = %err, "Value wait could not resume");
                }
            }
            None => self.fail(format!("{} value is invalid", self.source.describe())),
        }
    }
}

impl Wait for ValueWait {
    fn core(&self) -> &WaitCore {
        &self.core
    }

    fn cleanup(&self) {
        let on_value = self.on_value.borrow_mut().take();
        if let Some(on_value) = on_value {
            self.source.remove_callback(&on_value);
        }
    }
}
