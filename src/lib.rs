//! # ro-script
//!
//! A cooperative script runner for telescope and instrument control
//! clients. Scripts are written as plain async Rust; every `.await` on a
//! wait issued through the script's [`ScriptHandle`] hands control back to
//! the application's event loop until the wait resolves. Nothing ever
//! blocks the event-loop thread, and everything the runner does happens on
//! that thread.
//!
//! ```rust,ignore
//! let runner = ScriptRunner::builder("slew", scheduler.clone())
//!     .dispatcher(dispatcher.clone())
//!     .build_fn(|sr| async move {
//!         sr.wait_cmd(CommandSpec::new("tcc", "track 10,20"), true)?.await;
//!         sr.wait_ms(500)?.await;
//!         let pos = sr.wait_key_var(tcc_pos.clone(), None, true)?.await;
//!         Ok(pos)
//!     });
//! runner.start()?;
//! ```
//!
//! ## Crate Structure
//!
//! - **`runner`**: [`ScriptRunner`] (lifecycle and the drive loop), its
//!   builder, the [`Script`] trait and the script-facing [`ScriptHandle`].
//! - **`waits`**: the wait primitives (timer, background task, commands,
//!   value, user) and the [`Suspension`] future scripts await.
//! - **`callbacks`**: [`CallbackRegistry`], the ordered, failure-isolating
//!   subscriber list used for state-change and collaborator notification.
//! - **`scheduler`**: the [`Scheduler`] contract plus a virtual-clock and a
//!   tokio `LocalSet` implementation.
//! - **`collaborators`**: command, value and status-sink contracts, with
//!   in-memory [`Command`] and [`KeyVar`].
//! - **`mock`**: [`MockDispatcher`] for tests and dry runs.
//! - **`config`** / **`logging`**: figment-backed settings and `tracing`
//!   subscriber setup.
//! - **`error`**: [`ConcurrencyViolation`], [`ScriptError`] and
//!   [`ScriptFailure`].

pub mod callbacks;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod mock;
pub mod runner;
pub mod scheduler;
pub mod waits;

pub use callbacks::{callback, Callback, CallbackRegistry};
pub use collaborators::{
    Command, CommandDispatcher, CommandHandle, CommandSpec, CommandState, KeyVar, LogStatusSink,
    Severity, StatusSink, ValueSource,
};
pub use config::RunnerConfig;
pub use error::{ConcurrencyViolation, ConfigError, ScriptError, ScriptFailure, ScriptResult};
pub use mock::MockDispatcher;
pub use runner::{
    script_fn, DebugRecord, FullState, RunnerState, Script, ScriptFuture, ScriptHandle,
    ScriptRunner, ScriptRunnerBuilder, WaitToken,
};
pub use scheduler::{LocalScheduler, ManualScheduler, Scheduler, TimerId};
pub use waits::Suspension;
