//! The `Script` contract.
//!
//! A script is a value whose `run` method returns a single-threaded future.
//! Every `.await` on a wait issued through its [`ScriptHandle`] is a
//! suspension point; a future that is ready on its first poll is treated as
//! instantly complete.
//!
//! The implementing struct doubles as the script's typed per-run context:
//! `init`, `run` and `end` all see the same value, so shared state lives in
//! its fields (use `Cell`/`RefCell` for anything mutated across awaits).
//!
//! ```rust,ignore
//! struct FocusSweep {
//!     best: Cell<Option<f64>>,
//! }
//!
//! impl Script for FocusSweep {
//!     fn run(self: Rc<Self>, sr: ScriptHandle) -> ScriptFuture {
//!         async move {
//!             for step in 0..5 {
//!                 sr.wait_cmd(CommandSpec::new("tcc", format!("set focus={step}")), true)?.await;
//!             }
//!             Ok(Value::Null)
//!         }
//!         .boxed_local()
//!     }
//! }
//! ```

use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};

use super::handle::ScriptHandle;
use crate::error::ScriptResult;

/// Boxed future returned by [`Script::run`].
pub type ScriptFuture = LocalBoxFuture<'static, ScriptResult>;

/// A unit of work driven by a [`crate::ScriptRunner`].
pub trait Script: 'static {
    /// Produce the script body.
    fn run(self: Rc<Self>, sr: ScriptHandle) -> ScriptFuture;

    /// Called once by `start()`, before the body first runs.
    fn init(&self, _sr: &ScriptHandle) -> ScriptResult<()> {
        Ok(())
    }

    /// Called once when the run first reaches a terminal state.
    ///
    /// Must not wait; an attempt fails the run.
    fn end(&self, _sr: &ScriptHandle) -> ScriptResult<()> {
        Ok(())
    }
}

/// Script built from a closure; see [`script_fn`].
pub struct FnScript<F> {
    body: F,
}

impl<F, Fut> Script for FnScript<F>
where
    F: Fn(ScriptHandle) -> Fut + 'static,
    Fut: Future<Output = ScriptResult> + 'static,
{
    fn run(self: Rc<Self>, sr: ScriptHandle) -> ScriptFuture {
        (self.body)(sr).boxed_local()
    }
}

/// Wrap an async closure as a context-free [`Script`].
pub fn script_fn<F, Fut>(body: F) -> Rc<dyn Script>
where
    F: Fn(ScriptHandle) -> Fut + 'static,
    Fut: Future<Output = ScriptResult> + 'static,
{
    Rc::new(FnScript { body })
}
