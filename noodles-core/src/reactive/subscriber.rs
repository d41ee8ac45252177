//! Subscriber identifiers and subscription handles.
//!
//! Every callback registered on a [`Field`](super::Field) gets a
//! [`SubscriberId`]. The returned [`Subscription`] removes the callback when
//! it is dropped, so listeners cannot outlive their owner by accident.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use super::field::Field;

/// Unique identifier for a subscriber.
///
/// Uses an atomic counter to ensure uniqueness across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered field listener.
///
/// Dropping this handle unsubscribes the listener. Call
/// [`Subscription::detach`] to keep the listener for the field's lifetime.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    field: Weak<Field>,
    detached: bool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, field: Weak<Field>) -> Self {
        Self {
            id,
            field,
            detached: false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener registered for as long as the field lives.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(field) = self.field.upgrade() {
            field.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }
}
