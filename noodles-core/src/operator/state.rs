//! Operator core state.
//!
//! [`OperatorCore`] is the part of an operator the engine manages: identity,
//! role, fields, the dirty flag and the cached output. Operator types embed
//! one and expose it through [`Operator::core`](super::Operator::core).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::FieldValues;
use crate::graph::{OperatorId, OperatorRole};
use crate::reactive::{Field, Subscription};

/// Dirty flag, cached output and bookkeeping for one operator.
#[derive(Debug)]
pub struct OperatorState {
    dirty: AtomicBool,
    cached: RwLock<Option<Value>>,
    /// Pass id of the last computation or seed. Zero means never.
    last_pass: AtomicU64,
    compute_count: AtomicU64,
    /// Held for the duration of a pull so concurrent pulls of the same
    /// operator compute it once.
    pull_lock: tokio::sync::Mutex<()>,
}

impl OperatorState {
    fn new() -> Self {
        Self {
            // Start dirty to ensure first computation
            dirty: AtomicBool::new(true),
            cached: RwLock::new(None),
            last_pass: AtomicU64::new(0),
            compute_count: AtomicU64::new(0),
            pull_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn store(&self, output: Value, pass: u64) {
        *self.cached.write() = Some(output);
        self.last_pass.store(pass, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }
}

/// Engine-managed part of an operator.
#[derive(Debug)]
pub struct OperatorCore {
    id: OperatorId,
    role: OperatorRole,
    group: Option<String>,
    inputs: IndexMap<String, Arc<Field>>,
    outputs: IndexMap<String, Arc<Field>>,
    state: Arc<OperatorState>,
    /// Input listeners that mark this operator dirty.
    wiring: Vec<Subscription>,
}

impl OperatorCore {
    pub fn new(id: impl Into<OperatorId>, role: OperatorRole) -> Self {
        Self {
            id: id.into(),
            role,
            group: None,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            state: Arc::new(OperatorState::new()),
            wiring: Vec::new(),
        }
    }

    /// Declare an input field with a default value.
    ///
    /// Any change to the field marks the operator dirty.
    pub fn with_input(mut self, name: impl Into<String>, default: Value) -> Self {
        let field = Field::new(name, default);
        let state: Weak<OperatorState> = Arc::downgrade(&self.state);
        let subscription = field.subscribe(move |_| {
            if let Some(state) = state.upgrade() {
                state.mark_dirty();
            }
        });
        self.wiring.push(subscription);
        self.inputs.insert(field.name().to_string(), field);
        self
    }

    /// Declare an output field, initially null.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        let field = Field::new(name, Value::Null);
        self.outputs.insert(field.name().to_string(), field);
        self
    }

    /// Assign an explicit loop scope group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn id(&self) -> &OperatorId {
        &self.id
    }

    pub fn role(&self) -> OperatorRole {
        self.role
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn inputs(&self) -> &IndexMap<String, Arc<Field>> {
        &self.inputs
    }

    pub fn outputs(&self) -> &IndexMap<String, Arc<Field>> {
        &self.outputs
    }

    pub fn input(&self, name: &str) -> Option<&Arc<Field>> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&Arc<Field>> {
        self.outputs.get(name)
    }

    /// Snapshot of every input value.
    pub fn input_values(&self) -> FieldValues {
        self.inputs
            .iter()
            .map(|(name, field)| (name.clone(), field.value()))
            .collect()
    }

    /// Current value of an output, falling back to the cached record for
    /// undeclared names.
    pub fn output_value(&self, name: &str) -> Option<Value> {
        match self.outputs.get(name) {
            Some(field) => Some(field.value()),
            None => self
                .state
                .cached
                .read()
                .as_ref()
                .and_then(|cached| cached.get(name).cloned()),
        }
    }

    pub fn state(&self) -> &OperatorState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    pub fn mark_dirty(&self) {
        self.state.mark_dirty();
    }

    pub fn cached_output(&self) -> Option<Value> {
        self.state.cached.read().clone()
    }

    /// The cached output, if it is still valid.
    pub fn fresh_output(&self) -> Option<Value> {
        if self.state.is_dirty() {
            return None;
        }
        self.cached_output()
    }

    /// Number of completed computations, seeds excluded.
    pub fn compute_count(&self) -> u64 {
        self.state.compute_count.load(Ordering::Acquire)
    }

    pub fn last_pass(&self) -> u64 {
        self.state.last_pass.load(Ordering::Acquire)
    }

    /// Publish the result of a computation: push every output field and
    /// cache the whole record.
    pub fn publish(&self, values: FieldValues, pass: u64) -> Value {
        for (name, value) in &values {
            if let Some(field) = self.outputs.get(name) {
                field.push(value.clone());
            }
        }
        self.state.compute_count.fetch_add(1, Ordering::AcqRel);
        let record = Value::Object(values);
        self.state.store(record.clone(), pass);
        record
    }

    /// Overwrite outputs and cache directly, without a computation.
    pub fn seed(&self, values: FieldValues, pass: u64) -> Value {
        for (name, value) in &values {
            if let Some(field) = self.outputs.get(name) {
                field.seed(value.clone());
            }
        }
        let record = Value::Object(values);
        self.state.store(record.clone(), pass);
        record
    }

    pub(crate) fn pull_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.state.pull_lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::WriteOrigin;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> FieldValues {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn core_starts_dirty() {
        let core = OperatorCore::new("/a", OperatorRole::Transform);
        assert!(core.is_dirty());
        assert!(core.fresh_output().is_none());
        assert_eq!(core.last_pass(), 0);
    }

    #[test]
    fn publish_caches_and_cleans() {
        let core = OperatorCore::new("/a", OperatorRole::Transform).with_output("out");
        let record = core.publish(values(&[("out", json!(3))]), 1);

        assert_eq!(record, json!({"out": 3}));
        assert!(!core.is_dirty());
        assert_eq!(core.fresh_output(), Some(json!({"out": 3})));
        assert_eq!(core.output("out").unwrap().origin(), WriteOrigin::Pushed);
        assert_eq!(core.compute_count(), 1);
        assert_eq!(core.last_pass(), 1);
    }

    #[test]
    fn seed_does_not_count_as_computation() {
        let core = OperatorCore::new("/begin", OperatorRole::LoopBegin).with_output("item");
        core.seed(values(&[("item", json!(10))]), 4);

        assert_eq!(core.output("item").unwrap().origin(), WriteOrigin::Seeded);
        assert_eq!(core.compute_count(), 0);
        assert_eq!(core.last_pass(), 4);
        assert!(!core.is_dirty());
    }

    #[test]
    fn changed_input_marks_dirty() {
        let core = OperatorCore::new("/a", OperatorRole::Transform)
            .with_input("x", json!(1))
            .with_output("out");
        core.publish(values(&[("out", json!(1))]), 1);
        assert!(!core.is_dirty());

        // Same value leaves the cache valid
        core.input("x").unwrap().push(json!(1));
        assert!(!core.is_dirty());

        core.input("x").unwrap().push(json!(2));
        assert!(core.is_dirty());
    }

    #[test]
    fn undeclared_outputs_stay_in_cache() {
        let core = OperatorCore::new("/a", OperatorRole::Transform);
        core.publish(values(&[("extra", json!("x"))]), 1);
        assert_eq!(core.output_value("extra"), Some(json!("x")));
        assert_eq!(core.output_value("missing"), None);
    }
}
