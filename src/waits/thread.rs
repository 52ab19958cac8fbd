use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use serde_json::Value;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, warn};

use super::{Suspension, Wait, WaitCore};
use crate::callbacks::panic_message;
use crate::error::ConcurrencyViolation;
use crate::runner::{DebugRecord, RunnerShared};
use crate::scheduler::TimerId;

type TaskResult = anyhow::Result<Value>;

/// Runs a function on a background thread and resumes with its result.
///
/// The thread reports through a oneshot channel that the event-loop side
/// polls on the runner's scheduler; the thread itself never touches the
/// runner. Once the wait is resolved the receiver is dropped, so a late
/// result is discarded.
pub(crate) struct ThreadWait {
    core: WaitCore,
    rx: RefCell<Option<oneshot::Receiver<TaskResult>>>,
    poll_timer: Cell<Option<TimerId>>,
}

impl ThreadWait {
    pub(crate) fn start<F>(runner: &Rc<RunnerShared>, task: F) -> Result<Suspension, ConcurrencyViolation>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let core = runner.begin_wait("thread")?;
        let suspension = core.suspension();
        let wait = Rc::new(Self {
            core,
            rx: RefCell::new(None),
            poll_timer: Cell::new(None),
        });
        runner.register_wait(wait.clone());

        if runner.debug_mode() {
            runner.record_debug(DebugRecord::WaitThread);
            wait.resume(Value::Null)?;
            return Ok(suspension);
        }

        let (tx, rx) = oneshot::channel();
        *wait.rx.borrow_mut() = Some(rx);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-wait", runner.name()))
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())))
                });
                if tx.send(result).is_err() {
                    debug!("Background task finished after its wait was resolved");
                }
            });
        // A failed spawn drops the sender; the first poll reports it
        if let Err(err) = spawned {
            warn!(runner = %runner.name(), error = %err, "Could not spawn background task");
        }

        Self::schedule_poll(&wait);
        Ok(suspension)
    }

    fn schedule_poll(wait: &Rc<Self>) {
        let runner = wait.core.runner();
        let interval = runner.thread_poll_interval();
        let next = wait.clone();
        let id = runner
            .scheduler()
            .schedule_after(interval, Box::new(move || Self::poll(&next)));
        wait.poll_timer.set(Some(id));
    }

    fn poll(wait: &Rc<Self>) {
        wait.poll_timer.set(None);
        if !wait.core.is_armed() {
            return;
        }
        let received = match wait.rx.borrow_mut().as_mut() {
            Some(rx) => rx.try_recv(),
            None => return,
        };
        match received {
            Ok(Ok(value)) => {
                if let Err(err) = wait.resume(value) {
                    warn!(error = %err, "Background task wait could not resume");
                }
            }
            Ok(Err(err)) => wait.fail(format!("background task failed: {err:#}")),
            Err(TryRecvError::Empty) => Self::schedule_poll(wait),
            Err(TryRecvError::Closed) => {
                wait.fail("background task ended without a result".to_string());
            }
        }
    }
}

impl Wait for ThreadWait {
    fn core(&self) -> &WaitCore {
        &self.core
    }

    fn cleanup(&self) {
        if let Some(id) = self.poll_timer.take() {
            self.core.runner().scheduler().cancel(id);
        }
        self.rx.borrow_mut().take();
    }
}
