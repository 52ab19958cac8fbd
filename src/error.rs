//! Error types for the script runner.
//!
//! Three families of errors exist, mirroring how failures are resolved:
//!
//! - **`ConcurrencyViolation`**: caller-contract violations (starting twice,
//!   issuing a second wait before the first resolved, stale resume tokens).
//!   These are always returned synchronously to whoever broke the contract.
//! - **`ScriptError`**: a deliberate, user-facing failure raised by a script
//!   author. The run fails with the message as its reason and no trace is
//!   logged.
//! - **`ScriptFailure`**: the error half of [`ScriptResult`]. Wraps the two
//!   above plus any unexpected error (`anyhow::Error`), which fails the run
//!   and is logged with its full cause chain.
//!
//! Configuration problems have their own [`ConfigError`].

use thiserror::Error;

use crate::runner::{RunnerState, WaitToken};

/// Convenience alias for the result of a script body or sub-script.
pub type ScriptResult<T = serde_json::Value> = std::result::Result<T, ScriptFailure>;

/// Programmer errors in the use of a [`crate::ScriptRunner`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyViolation {
    /// `start()` while Running or Paused
    #[error("already executing")]
    AlreadyExecuting,

    /// `start()` on a terminal runner that was not reset
    #[error("script already finished ({state}); call reset() before starting again")]
    Finished {
        /// The terminal state
        state: RunnerState,
    },

    /// A wait or command issued while the runner is not executing
    #[error("cannot wait: script runner is {state}")]
    NotRunning {
        /// The current state
        state: RunnerState,
    },

    /// A wait issued while the script body is not being polled
    #[error("script-facing calls are only allowed from the running script body")]
    OutsideScript,

    /// A second wait issued before the first was awaited
    #[error("a wait is already outstanding; did you forget to await it?")]
    WaitOutstanding,

    /// A resume for a token that is not the outstanding wait
    #[error("stale resume token {got}; expected {expected:?}")]
    StaleToken {
        /// Token presented
        got: WaitToken,
        /// Token of the outstanding wait, if any
        expected: Option<WaitToken>,
    },

    /// `resume` or `cancel` on a wait that already resolved
    #[error("wait has already been resumed or cancelled")]
    WaitAlreadyResolved,

    /// `resume_user()` with no user wait outstanding
    #[error("not waiting for the user")]
    NoUserWait,

    /// A wait issued from an end-of-run hook
    #[error("the end-of-run hook may not wait")]
    WaitInEndHook,

    /// The handle outlived its runner
    #[error("script runner no longer exists")]
    RunnerGone,

    /// A command was issued but the runner has no dispatcher
    #[error("no command dispatcher configured")]
    MissingDispatcher,

    /// Removing a state callback that was never added
    #[error("callback not registered")]
    CallbackNotFound,
}

/// A deliberate script failure with a user-facing message.
///
/// Raise it from a script to fail the run with `reason == message`
/// without logging a trace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ScriptError(pub String);

impl ScriptError {
    /// Create a script error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Everything that can end a script body with an error.
#[derive(Error, Debug)]
pub enum ScriptFailure {
    /// Deliberate failure raised by the script
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Misuse of the runner from inside the script
    #[error(transparent)]
    Violation(#[from] ConcurrencyViolation),

    /// Anything else; logged with its cause chain
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ScriptFailure {
    /// Whether this failure should be logged with its full cause chain.
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, ScriptFailure::Script(_))
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File or environment could not be read or parsed
    #[error("Configuration error: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but failed validation
    #[error("Configuration validation error: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_error_displays_message_only() {
        let err = ScriptError::new("bad input");
        assert_eq!(err.to_string(), "bad input");

        let failure: ScriptFailure = err.into();
        assert_eq!(failure.to_string(), "bad input");
        assert!(!failure.is_unexpected());
    }

    #[test]
    fn unexpected_failures_keep_their_message() {
        let failure: ScriptFailure = anyhow::anyhow!("socket closed").into();
        assert!(failure.is_unexpected());
        assert_eq!(failure.to_string(), "socket closed");
    }

    #[test]
    fn already_executing_message() {
        assert_eq!(
            ConcurrencyViolation::AlreadyExecuting.to_string(),
            "already executing"
        );
    }
}
