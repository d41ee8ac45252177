//! For-loop scope markers.
//!
//! A loop body is an ordinary sub-graph framed by marker operators:
//!
//! - [`ForLoopBegin`] takes a sequence on `data` and emits `item`, `index`
//!   and `total` for the current iteration.
//! - [`ForLoopEnd`] receives one value per iteration on `item` and exposes the
//!   collected list on `data`.
//! - [`ForLoopMeta`] (optional) emits `accumulator`, `index`, `total`,
//!   `is_first` and `is_last`, and reads the next accumulator back through a
//!   feedback edge into `next_accumulator`.
//!
//! Outside of a loop run the markers compute a neutral first-iteration
//! record. During a run the loop executor seeds their outputs directly.

use futures_util::future::{self, FutureExt};
use serde_json::{json, Value};

use super::{outputs, FieldValues, Operator, OperatorCore, OperatorFuture};
use crate::graph::{OperatorId, OperatorRole};

/// Field names used by the loop markers.
pub mod handles {
    pub const DATA: &str = "data";
    pub const ITEM: &str = "item";
    pub const INDEX: &str = "index";
    pub const TOTAL: &str = "total";
    pub const ACCUMULATOR: &str = "accumulator";
    pub const IS_FIRST: &str = "is_first";
    pub const IS_LAST: &str = "is_last";
    pub const INITIAL: &str = "initial";
    pub const NEXT_ACCUMULATOR: &str = "next_accumulator";
}

/// Start of a for-loop scope.
#[derive(Debug)]
pub struct ForLoopBegin {
    core: OperatorCore,
}

impl ForLoopBegin {
    pub fn new(id: impl Into<OperatorId>) -> Self {
        Self {
            core: OperatorCore::new(id, OperatorRole::LoopBegin)
                .with_input(handles::DATA, Value::Null)
                .with_output(handles::ITEM)
                .with_output(handles::INDEX)
                .with_output(handles::TOTAL),
        }
    }

    /// Pair this marker with end/meta markers of the same group.
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.core = self.core.with_group(group);
        self
    }
}

impl Operator for ForLoopBegin {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    fn execute<'a>(&'a self, inputs: FieldValues) -> OperatorFuture<'a> {
        let items = inputs.get(handles::DATA).and_then(Value::as_array);
        let first = items.and_then(|items| items.first()).cloned();
        let total = items.map_or(0, Vec::len);
        future::ready(Ok(outputs([
            (handles::ITEM, first.unwrap_or(Value::Null)),
            (handles::INDEX, json!(0)),
            (handles::TOTAL, json!(total)),
        ])))
        .boxed()
    }
}

/// End of a for-loop scope.
#[derive(Debug)]
pub struct ForLoopEnd {
    core: OperatorCore,
}

impl ForLoopEnd {
    pub fn new(id: impl Into<OperatorId>) -> Self {
        Self {
            core: OperatorCore::new(id, OperatorRole::LoopEnd)
                .with_input(handles::ITEM, Value::Null)
                .with_output(handles::DATA),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.core = self.core.with_group(group);
        self
    }
}

impl Operator for ForLoopEnd {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    /// The aggregate only exists after a loop run. On its own the end marker
    /// reports an empty list.
    fn execute<'a>(&'a self, _inputs: FieldValues) -> OperatorFuture<'a> {
        future::ready(Ok(outputs([(handles::DATA, json!([]))]))).boxed()
    }
}

/// Accumulator marker of a for-loop scope.
#[derive(Debug)]
pub struct ForLoopMeta {
    core: OperatorCore,
}

impl ForLoopMeta {
    /// Create a meta marker whose accumulator starts at `initial`.
    pub fn new(id: impl Into<OperatorId>, initial: Value) -> Self {
        Self {
            core: OperatorCore::new(id, OperatorRole::LoopMeta)
                .with_input(handles::INITIAL, initial)
                .with_input(handles::NEXT_ACCUMULATOR, Value::Null)
                .with_output(handles::ACCUMULATOR)
                .with_output(handles::INDEX)
                .with_output(handles::TOTAL)
                .with_output(handles::IS_FIRST)
                .with_output(handles::IS_LAST),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.core = self.core.with_group(group);
        self
    }
}

impl Operator for ForLoopMeta {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    fn execute<'a>(&'a self, inputs: FieldValues) -> OperatorFuture<'a> {
        let initial = inputs.get(handles::INITIAL).cloned().unwrap_or(Value::Null);
        future::ready(Ok(outputs([
            (handles::ACCUMULATOR, initial),
            (handles::INDEX, json!(0)),
            (handles::TOTAL, json!(0)),
            (handles::IS_FIRST, json!(true)),
            (handles::IS_LAST, json!(false)),
        ])))
        .boxed()
    }
}
