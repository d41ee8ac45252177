//! Operator stores.
//!
//! The store is the authoritative owner of operators. The executor polls it
//! once per pass and mirrors its membership; it never subscribes to it.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::Operator;
use crate::graph::OperatorId;

/// Source of the current operator membership.
pub trait OperatorStore: Send + Sync {
    /// Every operator currently in the store, in registration order.
    fn all_operators(&self) -> Vec<Arc<dyn Operator>>;
}

/// An in-memory store that keeps registration order.
#[derive(Default)]
pub struct MemoryStore {
    operators: RwLock<IndexMap<OperatorId, Arc<dyn Operator>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an operator. Returns the replaced one.
    pub fn insert(&self, operator: Arc<dyn Operator>) -> Option<Arc<dyn Operator>> {
        let id = operator.core().id().clone();
        self.operators.write().insert(id, operator)
    }

    pub fn remove(&self, id: &OperatorId) -> Option<Arc<dyn Operator>> {
        self.operators.write().shift_remove(id)
    }

    pub fn get(&self, id: &OperatorId) -> Option<Arc<dyn Operator>> {
        self.operators.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.operators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.read().is_empty()
    }
}

impl OperatorStore for MemoryStore {
    fn all_operators(&self) -> Vec<Arc<dyn Operator>> {
        self.operators.read().values().cloned().collect()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("len", &self.len())
            .finish()
    }
}
