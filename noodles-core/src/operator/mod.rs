//! Operators
//!
//! An operator is a stateful computation node: named input and output
//! fields, a dirty flag, a cached output and an asynchronous `execute`.
//!
//! # How Operators Are Evaluated
//!
//! Operators never call each other. The executor pulls an operator by
//! resolving its upstream dependencies, copying their outputs into its input
//! fields along the edges, and then, only if the operator is dirty, calling
//! [`Operator::execute`] with a snapshot of the inputs. The returned record
//! is pushed to the output fields and cached.
//!
//! # Roles
//!
//! Every operator carries an [`OperatorRole`](crate::graph::OperatorRole)
//! fixed at construction. The executor uses it to find sinks and loop
//! markers.

mod function;
pub mod markers;
mod state;
mod store;

use futures_util::future::BoxFuture;
use serde_json::Value;

pub use function::FnOperator;
pub use markers::{ForLoopBegin, ForLoopEnd, ForLoopMeta};
pub use state::{OperatorCore, OperatorState};
pub use store::{MemoryStore, OperatorStore};

use crate::error::OperatorError;
use crate::graph::{OperatorId, OperatorRole};

/// Named field values, used for both input snapshots and output records.
pub type FieldValues = serde_json::Map<String, Value>;

/// A boxed future for asynchronous operator execution.
pub type OperatorFuture<'a> = BoxFuture<'a, Result<FieldValues, OperatorError>>;

/// The contract every operator implements.
pub trait Operator: Send + Sync {
    /// The engine-managed state of this operator.
    fn core(&self) -> &OperatorCore;

    /// Compute outputs from a snapshot of the inputs.
    ///
    /// May suspend. Must not assume anything about when it is called beyond
    /// "all upstream dependencies have resolved".
    fn execute<'a>(&'a self, inputs: FieldValues) -> OperatorFuture<'a>;

    fn id(&self) -> &OperatorId {
        self.core().id()
    }

    fn role(&self) -> OperatorRole {
        self.core().role()
    }
}

/// Build a [`FieldValues`] record from name/value pairs.
pub fn outputs<'a, I>(pairs: I) -> FieldValues
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
