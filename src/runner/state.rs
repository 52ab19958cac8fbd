//! Runner state machine types.
//!
//! # State Machine
//!
//! ```text
//! ┌───────┐  start()  ┌─────────┐  pause()  ┌────────┐
//! │ Ready │──────────▶│ Running │──────────▶│ Paused │
//! └───────┘           └────┬────┘◀──────────└───┬────┘
//!     ▲                    │       resume()     │
//!     │ reset()            │ finished / cancel() / failure
//!     │                    ▼                    ▼
//!     │        ┌──────┐ ┌───────────┐ ┌────────┐
//!     └────────│ Done │ │ Cancelled │ │ Failed │
//!              └──────┘ └───────────┘ └────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collaborators::CommandSpec;

/// Lifecycle state of a [`crate::ScriptRunner`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunnerState {
    /// Constructed, not yet started
    #[default]
    Ready,
    /// Executing; the script is either being advanced or waiting
    Running,
    /// Executing, but resumption is deferred until `resume()`
    Paused,
    /// Script finished successfully
    Done,
    /// Cancelled by its owner
    Cancelled,
    /// Script or one of its waits failed
    Failed,
}

impl RunnerState {
    /// Running or Paused.
    pub fn is_executing(&self) -> bool {
        matches!(self, RunnerState::Running | RunnerState::Paused)
    }

    /// Done, Cancelled or Failed.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            RunnerState::Done | RunnerState::Cancelled | RunnerState::Failed
        )
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            RunnerState::Ready => "Ready",
            RunnerState::Running => "Running",
            RunnerState::Paused => "Paused",
            RunnerState::Done => "Done",
            RunnerState::Cancelled => "Cancelled",
            RunnerState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// State, its display name, and the reason attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullState {
    /// Current state
    pub state: RunnerState,
    /// `state.name()`, for display
    pub state_name: String,
    /// Human-readable reason; empty unless failed or explicitly set
    pub reason: String,
}

/// Identifies one suspension of a runner.
///
/// `depth` is the execution-stack depth the wait was issued at and `seq`
/// a per-runner counter that never repeats, so a token identifies exactly
/// one wait for the lifetime of the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaitToken {
    /// Execution-stack depth when the wait was issued
    pub depth: usize,
    /// Monotonic sequence number
    pub seq: u64,
}

impl std::fmt::Display for WaitToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.depth, self.seq)
    }
}

/// A wait short-circuited by debug mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugRecord {
    /// `wait_ms` with its delay
    WaitMs(Duration),
    /// `wait_thread`; the task is not run
    WaitThread,
    /// `wait_cmd`; nothing is dispatched
    WaitCmd(CommandSpec),
    /// `wait_cmd_vars` with the described handles
    WaitCmdVars(Vec<String>),
    /// `wait_key_var` with the source name
    WaitKeyVar(String),
    /// `wait_user`
    WaitUser,
    /// `start_cmd`; nothing is dispatched
    StartCmd(CommandSpec),
}
