//! Observable Fields
//!
//! A [`Field`] is the channel between operators: a named cell holding the
//! current value, a list of listeners, and a record of how the value was
//! last written.
//!
//! # Write Paths
//!
//! There are two ways to write a field, and they are kept apart on purpose:
//!
//! - [`Field::push`] is the normal path. Operator outputs and upstream
//!   transfers go through it.
//! - [`Field::seed`] overwrites the value directly. The loop executor uses it
//!   to inject per-iteration values without running any computation.
//!
//! [`Field::origin`] reports which path produced the current value.
//!
//! # Notification
//!
//! Listeners run only when a write actually changes the value. Callbacks are
//! invoked after the value lock is released, so a listener may read the
//! field it observes.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::subscriber::{SubscriberId, Subscription};

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// How the current value of a field was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// The value given at construction.
    Initial,
    /// Written through [`Field::push`].
    Pushed,
    /// Written through [`Field::seed`].
    Seeded,
}

/// A named observable cell.
pub struct Field {
    name: String,
    value: RwLock<Value>,
    origin: RwLock<WriteOrigin>,
    /// Incremented on every write that changes the value.
    version: AtomicU64,
    listeners: RwLock<Vec<(SubscriberId, Listener)>>,
}

impl Field {
    /// Create a field with an initial value.
    pub fn new(name: impl Into<String>, value: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            value: RwLock::new(value),
            origin: RwLock::new(WriteOrigin::Initial),
            version: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a clone of the current value.
    pub fn value(&self) -> Value {
        self.value.read().clone()
    }

    pub fn origin(&self) -> WriteOrigin {
        *self.origin.read()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Write a value through the normal path.
    ///
    /// Returns whether the value changed. Listeners are notified only if it
    /// did.
    pub fn push(&self, value: Value) -> bool {
        self.write(value, WriteOrigin::Pushed)
    }

    /// Overwrite the value directly, bypassing any computation.
    ///
    /// The origin is recorded as [`WriteOrigin::Seeded`] even when the value
    /// is unchanged.
    pub fn seed(&self, value: Value) -> bool {
        self.write(value, WriteOrigin::Seeded)
    }

    fn write(&self, value: Value, origin: WriteOrigin) -> bool {
        let changed = {
            let mut guard = self.value.write();
            let changed = *guard != value;
            if changed {
                *guard = value.clone();
            }
            changed
        };
        *self.origin.write() = origin;

        if changed {
            self.version.fetch_add(1, Ordering::AcqRel);
            self.notify(&value);
        }
        changed
    }

    /// Register a listener. It runs after every change of value.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.listeners.write().push((id, Arc::new(listener)));
        Subscription::new(id, Arc::downgrade(self))
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.listeners.write().retain(|(listener_id, _)| *listener_id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, value: &Value) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(value);
        }
    }
}

impl Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("value", &self.value())
            .field("origin", &self.origin())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn field_push_and_read() {
        let field = Field::new("value", json!(0));
        assert_eq!(field.value(), json!(0));
        assert_eq!(field.origin(), WriteOrigin::Initial);

        assert!(field.push(json!(42)));
        assert_eq!(field.value(), json!(42));
        assert_eq!(field.origin(), WriteOrigin::Pushed);
        assert_eq!(field.version(), 1);
    }

    #[test]
    fn unchanged_push_does_not_notify() {
        let field = Field::new("value", json!(1));
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let _sub = field.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!field.push(json!(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(field.push(json!(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn seed_is_distinguishable_from_push() {
        let field = Field::new("item", Value::Null);
        field.push(json!(10));
        assert_eq!(field.origin(), WriteOrigin::Pushed);

        field.seed(json!(20));
        assert_eq!(field.value(), json!(20));
        assert_eq!(field.origin(), WriteOrigin::Seeded);

        // Same value, still recorded as seeded
        field.push(json!(20));
        field.seed(json!(20));
        assert_eq!(field.origin(), WriteOrigin::Seeded);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let field = Field::new("value", json!(0));
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let sub = field.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(field.subscriber_count(), 1);

        field.push(json!(1));
        drop(sub);
        field.push(json!(2));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(field.subscriber_count(), 0);
    }

    #[test]
    fn detached_subscription_survives() {
        let field = Field::new("value", json!(0));
        field.subscribe(|_| {}).detach();
        assert_eq!(field.subscriber_count(), 1);
    }

    #[test]
    fn listener_may_read_the_field() {
        let field = Field::new("value", json!(0));
        let seen = Arc::new(RwLock::new(Value::Null));
        let seen_clone = seen.clone();
        let weak = Arc::downgrade(&field);
        let _sub = field.subscribe(move |_| {
            if let Some(field) = weak.upgrade() {
                *seen_clone.write() = field.value();
            }
        });

        field.push(json!("x"));
        assert_eq!(*seen.read(), json!("x"));
    }
}
