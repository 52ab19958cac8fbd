//! Ordered callback registry with error isolation.
//!
//! `CallbackRegistry<T>` holds an ordered list of subscriber functions that
//! receive `&T`. It is used for runner state-change notification, for
//! command completion in [`crate::collaborators::Command`], and for value
//! updates in [`crate::collaborators::KeyVar`].
//!
//! # Guarantees
//!
//! - Subscribers are notified in registration order.
//! - Notification iterates over a snapshot, so a subscriber may add or
//!   remove itself (or others) while being notified.
//! - A subscriber that returns an error or panics is logged with its
//!   position and address, and the remaining subscribers still run.
//! - The same `Rc` is never registered twice.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::error;

use crate::error::ConcurrencyViolation;

/// A shared subscriber function.
///
/// Identity is the `Rc` allocation: keep a clone of the `Rc` to remove it
/// later.
pub type Callback<T> = Rc<dyn Fn(&T) -> anyhow::Result<()>>;

/// Wrap a closure as a [`Callback`].
pub fn callback<T, F>(f: F) -> Callback<T>
where
    F: Fn(&T) -> anyhow::Result<()> + 'static,
{
    Rc::new(f)
}

fn same_callback<T>(a: &Callback<T>, b: &Callback<T>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

/// Render a panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Ordered list of subscribers notified with `&T`.
pub struct CallbackRegistry<T> {
    /// Used to label log output
    label: String,
    callbacks: RefCell<Vec<Callback<T>>>,
}

impl<T> std::fmt::Debug for CallbackRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("label", &self.label)
            .field("len", &self.len())
            .finish()
    }
}

impl<T> CallbackRegistry<T> {
    /// Create an empty registry; `label` identifies it in logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callbacks: RefCell::new(Vec::new()),
        }
    }

    /// Add a subscriber.
    ///
    /// Returns `false` if this exact `Rc` was already registered (it is not
    /// added twice). If `invoke_now` carries an argument, only the new
    /// subscriber is called with it, so existing subscribers do not see a
    /// repeated notification.
    pub fn subscribe(&self, cb: Callback<T>, invoke_now: Option<&T>) -> bool {
        let added = {
            let mut callbacks = self.callbacks.borrow_mut();
            if callbacks.iter().any(|existing| same_callback(existing, &cb)) {
                false
            } else {
                callbacks.push(cb.clone());
                true
            }
        };
        if let Some(arg) = invoke_now {
            self.invoke(0, &cb, arg);
        }
        added
    }

    /// Remove a subscriber.
    ///
    /// Returns `Ok(true)` if it was removed. A missing subscriber is
    /// `Ok(false)` unless `raise_on_missing` is set.
    pub fn unsubscribe(
        &self,
        cb: &Callback<T>,
        raise_on_missing: bool,
    ) -> Result<bool, ConcurrencyViolation> {
        let mut callbacks = self.callbacks.borrow_mut();
        match callbacks.iter().position(|existing| same_callback(existing, cb)) {
            Some(index) => {
                callbacks.remove(index);
                Ok(true)
            }
            None if raise_on_missing => Err(ConcurrencyViolation::CallbackNotFound),
            None => Ok(false),
        }
    }

    /// Whether this exact `Rc` is registered.
    pub fn contains(&self, cb: &Callback<T>) -> bool {
        self.callbacks
            .borrow()
            .iter()
            .any(|existing| same_callback(existing, cb))
    }

    /// Call every subscriber with `arg`, isolating failures.
    pub fn notify(&self, arg: &T) {
        let snapshot: Vec<Callback<T>> = self.callbacks.borrow().clone();
        for (index, cb) in snapshot.iter().enumerate() {
            self.invoke(index, cb, arg);
        }
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        // Take first so subscriber destructors never run under the borrow
        let dropped = std::mem::take(&mut *self.callbacks.borrow_mut());
        drop(dropped);
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    /// Whether there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn invoke(&self, index: usize, cb: &Callback<T>, arg: &T) {
        let address = Rc::as_ptr(cb) as *const () as usize;
        match catch_unwind(AssertUnwindSafe(|| cb(arg))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(
                    registry = %self.label,
                    callback = index,
                    address = format_args!("{address:#x}"),
                    error = ?err,
                    "Callback failed"
                );
            }
            Err(payload) => {
                error!(
                    registry = %self.label,
                    callback = index,
                    address = format_args!("{address:#x}"),
                    panic = %panic_message(payload.as_ref()),
                    "Callback panicked"
                );
            }
        }
    }
}
