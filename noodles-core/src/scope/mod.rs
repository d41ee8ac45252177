//! Graph Scopes
//!
//! A [`GraphScope`] groups a subset of operators with its own edge list and a
//! namespaced [`ScopeContext`]. Running a scope sorts its local nodes and
//! evaluates them in order, feeding outputs forward along the local edges.
//! Unlike the executor, a scope does not consult the global graph: only its
//! own nodes and edges count.
//!
//! Cloning a scope gives a template copy for repeated use: the edge list is
//! copied, the operators are shared and the context is snapshotted.

mod context;

pub use context::{ContextStore, ScopeContext};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::trace;

use crate::error::{EngineError, Result};
use crate::graph::{check_acyclic, topological_sort, Edge, OperatorId};
use crate::operator::{FieldValues, Operator};

/// Result of one [`GraphScope::execute`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeOutcome {
    /// Output record of every node, in execution order.
    pub outputs: IndexMap<OperatorId, Value>,
    /// Whether any node computed during this run.
    pub changed: bool,
}

/// A sub-graph evaluated on its own.
pub struct GraphScope {
    id: String,
    nodes: IndexMap<OperatorId, Arc<dyn Operator>>,
    edges: Vec<Edge>,
    context: ScopeContext,
    runs: AtomicU64,
}

impl GraphScope {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let context = ScopeContext::new(id.clone());
        Self::with_context(id, context)
    }

    /// A scope whose context lives in `context`'s store.
    pub fn with_context(id: impl Into<String>, context: ScopeContext) -> Self {
        Self {
            id: id.into(),
            nodes: IndexMap::new(),
            edges: Vec::new(),
            context,
            runs: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &ScopeContext {
        &self.context
    }

    pub fn add_node(&mut self, operator: Arc<dyn Operator>) {
        self.nodes.insert(operator.core().id().clone(), operator);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<dyn Operator>> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Add a local edge. Both endpoints must already be in the scope.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(EngineError::UnknownOperator(endpoint.clone()));
            }
        }
        if self.edges.iter().any(|existing| existing.id == edge.id) {
            return Err(EngineError::DuplicateEdge(edge.id));
        }
        check_acyclic(self.nodes.keys(), &self.edges, &edge)?;
        self.edges.push(edge);
        Ok(())
    }

    /// Evaluate every local node in dependency order.
    ///
    /// Entries of `input` are pushed into the matching input fields of the
    /// nodes that have no local upstream. A node computes only if it is dirty
    /// or has never produced an output.
    pub async fn execute(&self, input: &FieldValues) -> Result<ScopeOutcome> {
        let sorted = topological_sort(self.nodes.keys(), &self.edges);
        if let Some(cycle) = sorted.cycles.into_iter().next() {
            return Err(EngineError::Cycle { path: cycle });
        }

        let run = self.runs.fetch_add(1, Ordering::AcqRel) + 1;
        let fed: HashSet<&OperatorId> = self
            .edges
            .iter()
            .filter(|edge| !edge.feedback)
            .map(|edge| &edge.target)
            .collect();

        let mut outputs = IndexMap::with_capacity(sorted.order.len());
        let mut changed = false;

        for id in sorted.order {
            let Some(operator) = self.nodes.get(&id) else {
                continue;
            };
            let core = operator.core();

            if !fed.contains(&id) {
                for (name, value) in input {
                    if let Some(field) = core.input(name) {
                        field.push(value.clone());
                    }
                }
            }
            for edge in self.edges.iter().filter(|edge| edge.target == id && !edge.feedback) {
                let value = self
                    .nodes
                    .get(&edge.source)
                    .and_then(|source| source.core().output_value(&edge.source_handle));
                if let (Some(value), Some(field)) = (value, core.input(&edge.target_handle)) {
                    field.push(value);
                }
            }

            let record = match core.fresh_output() {
                Some(cached) => cached,
                None => {
                    let values = operator
                        .execute(core.input_values())
                        .await
                        .map_err(|source| EngineError::Operator {
                            id: id.clone(),
                            source,
                        })?;
                    changed = true;
                    core.publish(values, run)
                }
            };
            outputs.insert(id, record);
        }

        trace!(scope = %self.id, run, changed, "scope executed");
        Ok(ScopeOutcome { outputs, changed })
    }
}

impl Clone for GraphScope {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            context: self.context.snapshot(),
            runs: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for GraphScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphScope")
            .field("id", &self.id)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.len())
            .finish()
    }
}
