//! Closure-backed operators.

use futures_util::future::{self, FutureExt};

use super::{FieldValues, Operator, OperatorCore, OperatorFuture};
use crate::error::OperatorError;

type Compute = dyn Fn(&FieldValues) -> Result<FieldValues, OperatorError> + Send + Sync;

/// An operator whose computation is a synchronous closure over its inputs.
///
/// # Example
///
/// ```rust,ignore
/// let double = FnOperator::new(
///     OperatorCore::new("/double", OperatorRole::Transform)
///         .with_input("value", json!(0))
///         .with_output("value"),
///     |inputs| {
///         let value = inputs.get("value").and_then(Value::as_f64).unwrap_or(0.0);
///         Ok(outputs([("value", json!(value * 2.0))]))
///     },
/// );
/// ```
pub struct FnOperator {
    core: OperatorCore,
    compute: Box<Compute>,
}

impl FnOperator {
    pub fn new<F>(core: OperatorCore, compute: F) -> Self
    where
        F: Fn(&FieldValues) -> Result<FieldValues, OperatorError> + Send + Sync + 'static,
    {
        Self {
            core,
            compute: Box::new(compute),
        }
    }
}

impl Operator for FnOperator {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    fn execute<'a>(&'a self, inputs: FieldValues) -> OperatorFuture<'a> {
        future::ready((self.compute)(&inputs)).boxed()
    }
}

impl std::fmt::Debug for FnOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOperator")
            .field("id", self.core.id())
            .field("role", &self.core.role())
            .finish()
    }
}
