//! Dependency Graph
//!
//! Holds non-owning references to operators by id, the edge list, derived
//! upstream/downstream adjacency, and the cached execution order and levels.
//!
//! Adjacency is rebuilt on every mutation and only covers edges whose two
//! endpoints are registered. The order, the levels and the cycle report
//! share one dirty-cache flag and are recomputed lazily.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use super::node::{Edge, OperatorId, OperatorRole};
use super::topology::{check_acyclic, execution_levels, topological_sort};
use crate::error::{EngineError, Result};
use crate::operator::Operator;

/// The operator dependency graph.
pub struct DependencyGraph {
    /// Registered operators, in registration order.
    nodes: IndexMap<OperatorId, Arc<dyn Operator>>,

    /// All edges, in insertion order.
    edges: Vec<Edge>,

    /// Dependency sources of each node. Feedback edges are excluded.
    upstream: HashMap<OperatorId, IndexSet<OperatorId>>,

    /// Consumers of each node, feedback edges included.
    downstream: HashMap<OperatorId, IndexSet<OperatorId>>,

    /// Indices into `edges` by target node.
    incoming: HashMap<OperatorId, Vec<usize>>,

    order: Vec<OperatorId>,
    levels: Vec<Vec<OperatorId>>,
    cycles: Vec<Vec<OperatorId>>,
    cache_dirty: bool,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            edges: Vec::new(),
            upstream: HashMap::new(),
            downstream: HashMap::new(),
            incoming: HashMap::new(),
            order: Vec::new(),
            levels: Vec::new(),
            cycles: Vec::new(),
            cache_dirty: true,
        }
    }

    /// Register an operator. Replaces and returns any operator with the same id.
    pub fn add_node(&mut self, operator: Arc<dyn Operator>) -> Option<Arc<dyn Operator>> {
        let id = operator.core().id().clone();
        debug!(operator = %id, role = ?operator.core().role(), "adding operator");
        let replaced = self.nodes.insert(id, operator);
        self.reindex();
        replaced
    }

    /// Remove an operator together with every edge touching it.
    pub fn remove_node(&mut self, id: &OperatorId) -> Option<Arc<dyn Operator>> {
        let removed = self.nodes.shift_remove(id)?;
        let before = self.edges.len();
        self.edges.retain(|edge| edge.source != *id && edge.target != *id);
        debug!(
            operator = %id,
            removed_edges = before - self.edges.len(),
            "removing operator"
        );
        self.reindex();
        Some(removed)
    }

    /// Remove an operator but keep its edges. The edges become active again
    /// if an operator with the same id is registered later.
    pub fn detach_node(&mut self, id: &OperatorId) -> Option<Arc<dyn Operator>> {
        let removed = self.nodes.shift_remove(id)?;
        debug!(operator = %id, "detaching operator");
        self.reindex();
        Some(removed)
    }

    /// Add an edge, refusing any edge that would close a cycle.
    ///
    /// On error the graph is left exactly as it was.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if self.edges.iter().any(|existing| existing.id == edge.id) {
            return Err(EngineError::DuplicateEdge(edge.id));
        }
        if edge.feedback {
            if let Some(target) = self.nodes.get(&edge.target) {
                if target.core().role() != OperatorRole::LoopMeta {
                    return Err(EngineError::InvalidFeedbackEdge {
                        edge: edge.id,
                        target: edge.target,
                    });
                }
            }
        }
        if let Err(err) = check_acyclic(self.nodes.keys(), &self.edges, &edge) {
            warn!(edge = %edge.id, error = %err, "rejecting edge");
            return Err(err);
        }

        debug!(edge = %edge.id, feedback = edge.feedback, "adding edge");
        self.edges.push(edge);
        self.reindex();
        Ok(())
    }

    /// Add an edge without the cycle check.
    ///
    /// Cycles introduced this way are reported by [`DependencyGraph::cycles`]
    /// and otherwise tolerated.
    pub fn insert_edge_unchecked(&mut self, edge: Edge) {
        self.edges.push(edge);
        self.reindex();
    }

    /// Remove an edge by id.
    pub fn remove_edge(&mut self, edge_id: &str) -> Option<Edge> {
        let position = self.edges.iter().position(|edge| edge.id == edge_id)?;
        let edge = self.edges.remove(position);
        debug!(edge = %edge.id, "removing edge");
        self.reindex();
        Some(edge)
    }

    fn reindex(&mut self) {
        self.upstream.clear();
        self.downstream.clear();
        self.incoming.clear();

        for (index, edge) in self.edges.iter().enumerate() {
            if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
                continue;
            }
            self.downstream
                .entry(edge.source.clone())
                .or_default()
                .insert(edge.target.clone());
            self.incoming.entry(edge.target.clone()).or_default().push(index);
            if !edge.feedback {
                self.upstream
                    .entry(edge.target.clone())
                    .or_default()
                    .insert(edge.source.clone());
            }
        }
        self.cache_dirty = true;
    }

    pub fn operator(&self, id: &OperatorId) -> Option<&Arc<dyn Operator>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &OperatorId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Registered operators, in registration order.
    pub fn operators(&self) -> impl Iterator<Item = &Arc<dyn Operator>> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &OperatorId> {
        self.nodes.keys()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Direct dependencies of a node.
    pub fn upstream_of(&self, id: &OperatorId) -> impl Iterator<Item = &OperatorId> {
        self.upstream.get(id).into_iter().flatten()
    }

    /// Direct consumers of a node.
    pub fn downstream_of(&self, id: &OperatorId) -> impl Iterator<Item = &OperatorId> {
        self.downstream.get(id).into_iter().flatten()
    }

    /// Edges arriving at a node whose source is registered.
    pub fn incoming_edges(&self, id: &OperatorId) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|&index| &self.edges[index])
    }

    /// Root operators: declared sinks, plus every node with at least one
    /// dependency and no consumers.
    pub fn roots(&self) -> Vec<OperatorId> {
        self.nodes
            .iter()
            .filter(|(id, operator)| {
                operator.core().role() == OperatorRole::Sink
                    || (self.upstream.get(*id).is_some_and(|deps| !deps.is_empty())
                        && self.downstream.get(*id).map_or(true, IndexSet::is_empty))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_cache_dirty(&self) -> bool {
        self.cache_dirty
    }

    /// Recompute order, levels and cycles if the cache is stale.
    ///
    /// Returns whether a rebuild happened.
    pub fn refresh(&mut self) -> bool {
        if !self.cache_dirty {
            return false;
        }

        let outcome = topological_sort(self.nodes.keys(), &self.edges);
        for cycle in &outcome.cycles {
            let path: Vec<&str> = cycle.iter().map(OperatorId::as_str).collect();
            warn!(cycle = ?path, "dependency cycle detected, continuing with partial order");
        }
        self.levels = execution_levels(&outcome.order, &self.edges);
        self.order = outcome.order;
        self.cycles = outcome.cycles;
        self.cache_dirty = false;
        true
    }

    /// Cached topological order.
    pub fn execution_order(&mut self) -> &[OperatorId] {
        self.refresh();
        &self.order
    }

    /// Cached execution levels.
    pub fn execution_levels(&mut self) -> &[Vec<OperatorId>] {
        self.refresh();
        &self.levels
    }

    /// Cycles found by the last sort.
    pub fn cycles(&mut self) -> &[Vec<OperatorId>] {
        self.refresh();
        &self.cycles
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.len())
            .field("cache_dirty", &self.cache_dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{FnOperator, ForLoopMeta, OperatorCore};
    use serde_json::json;

    fn op(id: &str, role: OperatorRole) -> Arc<dyn Operator> {
        Arc::new(FnOperator::new(OperatorCore::new(id, role), |_| {
            Ok(Default::default())
        }))
    }

    fn chain(ids: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for id in ids {
            graph.add_node(op(id, OperatorRole::Transform));
        }
        for pair in ids.windows(2) {
            graph.add_edge(Edge::new(pair[0], "out", pair[1], "in")).unwrap();
        }
        graph
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = chain(&["A", "B", "C"]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);

        graph.remove_node(&"B".into());
        assert_eq!(graph.node_count(), 2);
        // Both edges touched B
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.operator(&"B".into()).is_none());
    }

    #[test]
    fn detached_node_keeps_its_edges() {
        let mut graph = chain(&["A", "B", "C"]);
        let b = graph.detach_node(&"B".into()).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.downstream_of(&"A".into()).count(), 0);

        graph.add_node(b);
        let downstream: Vec<&OperatorId> = graph.downstream_of(&"A".into()).collect();
        assert_eq!(downstream, vec![&OperatorId::from("B")]);
        let order: Vec<&str> = graph.execution_order().iter().map(OperatorId::as_str).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn closing_edge_is_rejected_without_mutation() {
        let mut graph = chain(&["A", "B", "C"]);
        let before = graph.edges().to_vec();

        let err = graph.add_edge(Edge::new("C", "out", "A", "in")).unwrap_err();
        assert!(matches!(err, EngineError::Cycle { .. }));
        assert_eq!(graph.edges(), before.as_slice());
    }

    #[test]
    fn duplicate_edge_is_rejected() {
        let mut graph = chain(&["A", "B"]);
        let err = graph.add_edge(Edge::new("A", "out", "B", "in")).unwrap_err();
        assert_eq!(err, EngineError::DuplicateEdge("A.out->B.in".into()));
    }

    #[test]
    fn feedback_edge_requires_meta_target() {
        let mut graph = chain(&["A", "B"]);
        let err = graph
            .add_edge(Edge::feedback("B", "out", "A", "next_accumulator"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidFeedbackEdge { .. }));

        graph.add_node(Arc::new(ForLoopMeta::new("meta", json!(0))));
        graph.add_edge(Edge::new("meta", "accumulator", "A", "acc")).unwrap();
        graph
            .add_edge(Edge::feedback("B", "out", "meta", "next_accumulator"))
            .unwrap();

        // Feedback does not count as a dependency of the meta marker
        assert_eq!(graph.upstream_of(&"meta".into()).count(), 0);
        assert!(graph.cycles().is_empty());
    }

    #[test]
    fn order_is_cached_until_mutation() {
        let mut graph = chain(&["A", "B"]);
        assert!(graph.is_cache_dirty());
        assert_eq!(graph.execution_order().len(), 2);
        assert!(!graph.is_cache_dirty());
        assert!(!graph.refresh());

        graph.add_node(op("C", OperatorRole::Transform));
        assert!(graph.is_cache_dirty());
        assert_eq!(graph.execution_order().len(), 3);
    }

    #[test]
    fn roots_include_sinks_and_implicit_leaves() {
        let mut graph = chain(&["A", "B"]);
        graph.add_node(op("lonely", OperatorRole::Transform));
        graph.add_node(op("sink", OperatorRole::Sink));

        // A has no dependencies, lonely has none either; B is a leaf with a
        // dependency; sink is declared.
        assert_eq!(graph.roots(), vec![OperatorId::from("B"), OperatorId::from("sink")]);
    }

    #[test]
    fn unchecked_cycle_is_reported() {
        let mut graph = chain(&["A", "B"]);
        graph.insert_edge_unchecked(Edge::new("B", "out", "A", "in"));

        assert_eq!(graph.execution_order().len(), 0);
        assert_eq!(graph.cycles().len(), 1);
    }

    #[test]
    fn levels_follow_dependencies() {
        let mut graph = chain(&["A", "B"]);
        graph.add_node(op("C", OperatorRole::Transform));
        let levels = graph.execution_levels().to_vec();
        assert_eq!(
            levels,
            vec![
                vec![OperatorId::from("A"), OperatorId::from("C")],
                vec![OperatorId::from("B")]
            ]
        );
    }
}
