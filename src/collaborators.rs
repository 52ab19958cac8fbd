//! Collaborator contracts the runner consumes, plus in-memory implementations.
//!
//! The embedding application supplies:
//!
//! - a [`CommandDispatcher`] that turns a [`CommandSpec`] into a running
//!   [`CommandHandle`],
//! - [`ValueSource`]s (keyword variables) that scripts read or wait on,
//! - optionally a [`StatusSink`] that renders script messages.
//!
//! [`Command`] and [`KeyVar`] are complete single-threaded implementations
//! of the handle and value contracts. Dispatchers build on `Command`; tests
//! and dry runs use both directly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::callbacks::{Callback, CallbackRegistry};

// =============================================================================
// Commands
// =============================================================================

/// What to send, and to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Actor (device or subsystem) that executes the command
    pub actor: String,
    /// Command text
    pub text: String,
    /// Optional time limit, enforced by the dispatcher if it supports one
    #[serde(default)]
    pub time_limit: Option<Duration>,
}

impl CommandSpec {
    /// Create a command spec without a time limit.
    pub fn new(actor: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            text: text.into(),
            time_limit: None,
        }
    }

    /// Set the time limit.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.actor, self.text)
    }
}

/// Lifecycle of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    /// Still executing
    Running,
    /// Finished successfully
    Done,
    /// Finished with the given error text
    Failed(String),
}

impl CommandState {
    /// Whether the command has finished, successfully or not.
    pub fn is_done(&self) -> bool {
        !matches!(self, CommandState::Running)
    }
}

/// Handle to an asynchronously executing command.
pub trait CommandHandle {
    /// Human-readable description, used in failure reasons.
    fn describe(&self) -> String;

    /// Whether the command finished (success or failure).
    fn is_done(&self) -> bool;

    /// Whether the command finished with a failure.
    fn did_fail(&self) -> bool;

    /// The error text reported by a failed command.
    fn failure_text(&self) -> Option<String>;

    /// Ask the command to stop.
    fn abort(&self);

    /// Register a callback fired on every state change.
    fn add_callback(&self, cb: Callback<CommandState>);

    /// Remove a callback; returns `false` if it was not registered.
    fn remove_callback(&self, cb: &Callback<CommandState>) -> bool;
}

/// Starts commands on behalf of scripts.
pub trait CommandDispatcher {
    /// Begin executing `spec` and return its handle.
    fn dispatch(&self, spec: CommandSpec) -> Rc<dyn CommandHandle>;
}

/// In-memory command variable.
///
/// Whoever executes the command calls [`finish`](Self::finish) or
/// [`fail`](Self::fail); registered callbacks fire on each transition.
pub struct Command {
    spec: CommandSpec,
    state: RefCell<CommandState>,
    abort_count: Cell<usize>,
    callbacks: CallbackRegistry<CommandState>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("spec", &self.spec)
            .field("state", &*self.state.borrow())
            .field("abort_count", &self.abort_count.get())
            .finish()
    }
}

impl Command {
    /// Create a running command.
    pub fn new(spec: CommandSpec) -> Rc<Self> {
        let label = format!("command {spec}");
        Rc::new(Self {
            spec,
            state: RefCell::new(CommandState::Running),
            abort_count: Cell::new(0),
            callbacks: CallbackRegistry::new(label),
        })
    }

    /// The [`CommandSpec`] this command was created from.
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Current state.
    pub fn state(&self) -> CommandState {
        self.state.borrow().clone()
    }

    /// How many times `abort` was called.
    pub fn abort_count(&self) -> usize {
        self.abort_count.get()
    }

    /// Mark the command successful. Returns `false` if it had already finished.
    pub fn finish(&self) -> bool {
        self.transition(CommandState::Done)
    }

    /// Mark the command failed. Returns `false` if it had already finished.
    pub fn fail(&self, text: impl Into<String>) -> bool {
        self.transition(CommandState::Failed(text.into()))
    }

    fn transition(&self, next: CommandState) -> bool {
        {
            let mut state = self.state.borrow_mut();
            if state.is_done() {
                return false;
            }
            *state = next.clone();
        }
        debug!(command = %self.spec, state = ?next, "Command state changed");
        self.callbacks.notify(&next);
        true
    }
}

impl CommandHandle for Command {
    fn describe(&self) -> String {
        self.spec.to_string()
    }

    fn is_done(&self) -> bool {
        self.state.borrow().is_done()
    }

    fn did_fail(&self) -> bool {
        matches!(*self.state.borrow(), CommandState::Failed(_))
    }

    fn failure_text(&self) -> Option<String> {
        match &*self.state.borrow() {
            CommandState::Failed(text) => Some(text.clone()),
            _ => None,
        }
    }

    fn abort(&self) {
        self.abort_count.set(self.abort_count.get() + 1);
        self.fail("aborted");
    }

    fn add_callback(&self, cb: Callback<CommandState>) {
        self.callbacks.subscribe(cb, None);
    }

    fn remove_callback(&self, cb: &Callback<CommandState>) -> bool {
        self.callbacks.unsubscribe(cb, false).unwrap_or(false)
    }
}

// =============================================================================
// Values
// =============================================================================

/// A value holder scripts can read and wait on.
///
/// `None` means "currently invalid" (unknown or not current).
pub trait ValueSource {
    /// Name used in logs and failure reasons.
    fn describe(&self) -> String;

    /// Current value, or `None` if invalid.
    fn current_value(&self) -> Option<Value>;

    /// Register a callback fired with every new value (or invalidation).
    fn add_callback(&self, cb: Callback<Option<Value>>);

    /// Remove a callback; returns `false` if it was not registered.
    fn remove_callback(&self, cb: &Callback<Option<Value>>) -> bool;
}

/// In-memory keyword variable.
pub struct KeyVar {
    name: String,
    value: RefCell<Option<Value>>,
    callbacks: CallbackRegistry<Option<Value>>,
}

impl std::fmt::Debug for KeyVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVar")
            .field("name", &self.name)
            .field("value", &*self.value.borrow())
            .finish()
    }
}

impl KeyVar {
    /// Create an invalid keyword variable.
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        let name = name.into();
        Rc::new(Self {
            callbacks: CallbackRegistry::new(format!("keyvar {name}")),
            name,
            value: RefCell::new(None),
        })
    }

    /// Create a keyword variable that already holds a valid value.
    pub fn with_value(name: impl Into<String>, value: Value) -> Rc<Self> {
        let var = Self::new(name);
        *var.value.borrow_mut() = Some(value);
        var
    }

    /// Store a new valid value and notify subscribers.
    pub fn set(&self, value: Value) {
        self.update(Some(value));
    }

    /// Mark the value invalid and notify subscribers.
    pub fn invalidate(&self) {
        self.update(None);
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.len()
    }

    fn update(&self, value: Option<Value>) {
        *self.value.borrow_mut() = value.clone();
        self.callbacks.notify(&value);
    }
}

impl ValueSource for KeyVar {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn current_value(&self) -> Option<Value> {
        self.value.borrow().clone()
    }

    fn add_callback(&self, cb: Callback<Option<Value>>) {
        self.callbacks.subscribe(cb, None);
    }

    fn remove_callback(&self, cb: &Callback<Option<Value>>) -> bool {
        self.callbacks.unsubscribe(cb, false).unwrap_or(false)
    }
}

// =============================================================================
// Status messages
// =============================================================================

/// Severity of a script status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Informational
    Normal,
    /// Something the user should notice
    Warning,
    /// A problem
    Error,
}

/// Renders script messages (a status bar, typically).
pub trait StatusSink {
    /// Display `text` with the given severity.
    fn show(&self, text: &str, severity: Severity);
}

/// Default sink: route messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn show(&self, text: &str, severity: Severity) {
        match severity {
            Severity::Normal => info!(target: "ro_script::status", "{text}"),
            Severity::Warning => warn!(target: "ro_script::status", "{text}"),
            Severity::Error => error!(target: "ro_script::status", "{text}"),
        }
    }
}
