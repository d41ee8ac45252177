//! Reactive Fields
//!
//! Operators exchange data through observable fields. A field holds the
//! current value, notifies listeners when it changes and remembers whether
//! the value came from a computation or was seeded directly.
//!
//! # Concepts
//!
//! ## Fields
//!
//! Each operator owns named input and output fields. The executor moves
//! values along edges by pushing an upstream output into a downstream input.
//! An operator's input fields are wired to its dirty flag, so a changed
//! input forces the next pull to recompute.
//!
//! ## Subscriptions
//!
//! `subscribe` returns a handle. Dropping the handle removes the listener.

mod field;
mod subscriber;

pub use field::{Field, WriteOrigin};
pub use subscriber::{SubscriberId, Subscription};
