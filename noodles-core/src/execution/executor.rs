//! Pull-based Executor
//!
//! The executor owns the dependency graph and runs one execution pass at a
//! time.
//!
//! # How a Pass Works
//!
//! 1. Mirror the store: add operators that appeared, drop operators that
//!    disappeared unless they were registered directly with the executor.
//!    Edges of dropped operators stay in place for when they come back.
//! 2. Rebuild the cached order and levels if the graph changed.
//! 3. Discover every for-loop scope and run each outermost scope to
//!    completion. Nested scopes run inside their enclosing iteration.
//! 4. Find the roots: declared sinks plus leaves that have dependencies.
//! 5. Pull every root and collect one [`ExecutionResult`] per root.
//!
//! # Pulling
//!
//! Pulling an operator first pulls each direct upstream dependency, then
//! copies upstream outputs into its input fields along the incoming edges,
//! and finally computes, but only if the operator is dirty. A clean operator
//! answers from its cache. Pulls do not follow the precomputed order; the
//! recursion itself guarantees that dependencies resolve first.
//!
//! A per-operator async lock makes concurrent pulls of a shared dependency
//! compute it once per pass. Locks are always taken from downstream to
//! upstream, so on an acyclic graph they cannot deadlock.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::for_loop::{discover_loop_scopes, ForLoopScope, LoopRunner};
use super::result::{
    ExecutionResult, ExecutionResults, ExecutorMetrics, GraphStats, MetricsSnapshot,
};
use crate::config::ExecutorConfig;
use crate::error::{EngineError, OperatorError, Result};
use crate::graph::{DependencyGraph, DirtyTracker, Edge, OperatorId};
use crate::operator::{Operator, OperatorStore};

/// Runs execution passes over a dependency graph.
pub struct Executor {
    config: ExecutorConfig,
    graph: RwLock<DependencyGraph>,

    /// Operators registered through [`Executor::add_node`]. Store
    /// synchronization never removes these.
    direct: RwLock<HashSet<OperatorId>>,

    store: Option<Arc<dyn OperatorStore>>,
    dirty: DirtyTracker,

    /// Loop markers of scopes completed during the current pass, with the
    /// error if their scope aborted. Pulls of these answer from this table.
    sealed: Mutex<HashMap<OperatorId, Option<EngineError>>>,

    pass: AtomicU64,
    /// Serializes passes.
    pass_lock: tokio::sync::Mutex<()>,
    metrics: ExecutorMetrics,
    last_results: RwLock<ExecutionResults>,
}

impl Executor {
    /// Create an executor without a store. Operators are added with
    /// [`Executor::add_node`].
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, None))
    }

    /// Create an executor that mirrors `store` at the start of every pass.
    pub fn with_store(config: ExecutorConfig, store: Arc<dyn OperatorStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Some(store)))
    }

    fn build(config: ExecutorConfig, store: Option<Arc<dyn OperatorStore>>) -> Self {
        let dirty = DirtyTracker::new(config.dirty_mode, config.batch_delay());
        Self {
            config,
            graph: RwLock::new(DependencyGraph::new()),
            direct: RwLock::new(HashSet::new()),
            store,
            dirty,
            sealed: Mutex::new(HashMap::new()),
            pass: AtomicU64::new(0),
            pass_lock: tokio::sync::Mutex::new(()),
            metrics: ExecutorMetrics::default(),
            last_results: RwLock::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Register an operator directly. It stays registered until
    /// [`Executor::remove_node`] is called, whatever the store says.
    pub fn add_node(&self, operator: Arc<dyn Operator>) {
        let id = operator.core().id().clone();
        self.graph.write().add_node(operator);
        self.direct.write().insert(id);
    }

    /// Remove an operator and its edges.
    pub fn remove_node(&self, id: &OperatorId) -> Option<Arc<dyn Operator>> {
        self.direct.write().remove(id);
        let mut graph = self.graph.write();
        let downstream: Vec<OperatorId> = graph.downstream_of(id).cloned().collect();
        let removed = graph.remove_node(id)?;
        self.dirty.mark(&graph, &downstream);
        Some(removed)
    }

    /// Add an edge. Fails without mutating anything if the edge would
    /// create a cycle.
    pub fn add_edge(&self, edge: Edge) -> Result<()> {
        let target = edge.target.clone();
        let mut graph = self.graph.write();
        graph.add_edge(edge)?;
        self.dirty.mark(&graph, [&target]);
        Ok(())
    }

    pub fn remove_edge(&self, edge_id: &str) -> Option<Edge> {
        let mut graph = self.graph.write();
        let edge = graph.remove_edge(edge_id)?;
        self.dirty.mark(&graph, [&edge.target]);
        Some(edge)
    }

    /// Mark operators dirty according to the configured [`DirtyMode`].
    ///
    /// [`DirtyMode`]: crate::graph::DirtyMode
    pub fn mark_dirty<'a, I>(&self, ids: I) -> IndexSet<OperatorId>
    where
        I: IntoIterator<Item = &'a OperatorId>,
    {
        let graph = self.graph.read();
        self.dirty.mark(&graph, ids)
    }

    /// Ids waiting in the batched dirty set.
    pub fn pending_dirty(&self) -> Vec<OperatorId> {
        self.dirty.pending()
    }

    /// Mark every operator dirty and run a pass right away.
    pub async fn force_update(&self) -> ExecutionResults {
        {
            let graph = self.graph.read();
            for operator in graph.operators() {
                operator.core().mark_dirty();
            }
        }
        self.execute().await
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Run one execution pass and return one result per root.
    pub async fn execute(&self) -> ExecutionResults {
        let _pass_guard = self.pass_lock.lock().await;
        let started = Instant::now();
        let pass = self.pass.fetch_add(1, Ordering::AcqRel) + 1;
        self.sealed.lock().clear();

        self.sync_with_store();
        if self.graph.write().refresh() {
            debug!(pass, "rebuilt execution order");
        }

        let scopes = self.loop_scopes();
        let runner = LoopRunner::new(self, &scopes);
        for scope in runner.top_level() {
            if let Err(err) = runner.run(scope, pass).await {
                self.metrics.record_loop_failure();
                warn!(begin = %scope.begin, error = %err, "loop scope aborted");
            }
        }

        let roots = self.graph.read().roots();
        let results: ExecutionResults = if self.config.concurrent_roots {
            let outcomes = join_all(roots.iter().map(|root| self.pull_root(root, pass))).await;
            roots.into_iter().zip(outcomes).collect()
        } else {
            let mut results = IndexMap::with_capacity(roots.len());
            for root in roots {
                let outcome = self.pull_root(&root, pass).await;
                results.insert(root, outcome);
            }
            results
        };

        let failures = results.values().filter(|result| !result.is_ok()).count();
        let elapsed = started.elapsed();
        self.metrics.record_pass(elapsed, failures);
        trace!(
            pass,
            roots = results.len(),
            failures,
            elapsed_us = elapsed.as_micros() as u64,
            "pass complete"
        );

        *self.last_results.write() = results.clone();
        results
    }

    async fn pull_root(&self, root: &OperatorId, pass: u64) -> ExecutionResult {
        match self.pull_guarded(root).await {
            Ok(value) => {
                let changed = self
                    .operator(root)
                    .is_some_and(|operator| operator.core().last_pass() == pass);
                ExecutionResult::success(value, changed)
            }
            Err(err) => {
                warn!(root = %root, error = %err, "root pull failed");
                ExecutionResult::failure(err)
            }
        }
    }

    /// [`Executor::pull`], with a panic anywhere below `id` turned into an
    /// operator error on `id`.
    pub(crate) async fn pull_guarded(&self, id: &OperatorId) -> Result<Value> {
        match AssertUnwindSafe(self.pull(id)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::Operator {
                id: id.clone(),
                source: OperatorError::failed("operator panicked during pull"),
            }),
        }
    }

    /// Resolve an operator's output, pulling its dependencies first.
    pub fn pull<'a>(&'a self, id: &'a OperatorId) -> BoxFuture<'a, Result<Value>> {
        self.pull_inner(id).boxed()
    }

    async fn pull_inner(&self, id: &OperatorId) -> Result<Value> {
        if let Some(sealed) = self.sealed_output(id) {
            return sealed;
        }

        let (operator, upstream) = {
            let graph = self.graph.read();
            let operator = graph
                .operator(id)
                .cloned()
                .ok_or_else(|| EngineError::UnknownOperator(id.clone()))?;
            let upstream: SmallVec<[OperatorId; 4]> = graph.upstream_of(id).cloned().collect();
            (operator, upstream)
        };

        let core = operator.core();
        let _pull_guard = core.pull_lock().lock().await;

        for dependency in &upstream {
            self.pull(dependency).await?;
        }
        self.sync_inputs(id, false);

        if let Some(cached) = core.fresh_output() {
            return Ok(cached);
        }

        let pass = self.pass.load(Ordering::Acquire);
        trace!(operator = %id, pass, "computing");
        let outputs = operator
            .execute(core.input_values())
            .await
            .map_err(|source| EngineError::Operator {
                id: id.clone(),
                source,
            })?;
        self.metrics.record_computation();
        Ok(core.publish(outputs, pass))
    }

    fn sealed_output(&self, id: &OperatorId) -> Option<Result<Value>> {
        let sealed = self.sealed.lock();
        let entry = sealed.get(id)?;
        Some(match entry {
            Some(err) => Err(err.clone()),
            None => Ok(self
                .operator(id)
                .and_then(|operator| operator.core().cached_output())
                .unwrap_or(Value::Null)),
        })
    }

    /// Make pulls of `id` answer from its cache, or fail with `error`, for
    /// the rest of the pass.
    pub(crate) fn seal(&self, id: &OperatorId, error: Option<EngineError>) {
        self.sealed.lock().insert(id.clone(), error);
    }

    pub(crate) fn unseal<'a, I>(&self, ids: I)
    where
        I: IntoIterator<Item = &'a OperatorId>,
    {
        let mut sealed = self.sealed.lock();
        for id in ids {
            sealed.remove(id);
        }
    }

    /// Copy upstream outputs into `id`'s input fields along its incoming
    /// edges. Feedback edges are only followed when asked for.
    pub(crate) fn sync_inputs(&self, id: &OperatorId, include_feedback: bool) {
        let graph = self.graph.read();
        let Some(target) = graph.operator(id) else {
            return;
        };
        for edge in graph.incoming_edges(id) {
            if edge.feedback && !include_feedback {
                continue;
            }
            let Some(source) = graph.operator(&edge.source) else {
                continue;
            };
            let Some(value) = source.core().output_value(&edge.source_handle) else {
                trace!(edge = %edge.id, "source has no such output yet");
                continue;
            };
            match target.core().input(&edge.target_handle) {
                Some(field) => {
                    field.push(value);
                }
                None => trace!(edge = %edge.id, "target has no such input"),
            }
        }
    }

    /// Set the dirty flag of each operator without any propagation.
    pub(crate) fn force_dirty<'a, I>(&self, ids: I)
    where
        I: IntoIterator<Item = &'a OperatorId>,
    {
        let graph = self.graph.read();
        for id in ids {
            if let Some(operator) = graph.operator(id) {
                operator.core().mark_dirty();
            }
        }
    }

    fn sync_with_store(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let operators = store.all_operators();
        let present: HashSet<OperatorId> = operators
            .iter()
            .map(|operator| operator.core().id().clone())
            .collect();

        let direct = self.direct.read();
        let mut graph = self.graph.write();

        let mut added = Vec::new();
        for operator in operators {
            let id = operator.core().id().clone();
            if !graph.contains(&id) {
                graph.add_node(operator);
                added.push(id);
            }
        }

        // Edges are kept for operators that leave the store, so they are
        // connected again when the operator comes back.
        let stale: Vec<OperatorId> = graph
            .ids()
            .filter(|id| !present.contains(*id) && !direct.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            graph.detach_node(id);
        }

        if !added.is_empty() {
            self.dirty.mark(&graph, &added);
        }
        if !added.is_empty() || !stale.is_empty() {
            debug!(
                added = added.len(),
                removed = stale.len(),
                "synchronized with store"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn operator(&self, id: &OperatorId) -> Option<Arc<dyn Operator>> {
        self.graph.read().operator(id).cloned()
    }

    pub(crate) fn require_operator(&self, id: &OperatorId) -> Result<Arc<dyn Operator>> {
        self.operator(id)
            .ok_or_else(|| EngineError::UnknownOperator(id.clone()))
    }

    pub fn contains(&self, id: &OperatorId) -> bool {
        self.graph.read().contains(id)
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.graph.read().edges().to_vec()
    }

    /// Topological order of the current graph.
    pub fn execution_order(&self) -> Vec<OperatorId> {
        self.graph.write().execution_order().to_vec()
    }

    /// Groups of operators with no dependency among them, by rank.
    pub fn parallel_execution_levels(&self) -> Vec<Vec<OperatorId>> {
        self.graph.write().execution_levels().to_vec()
    }

    /// Cycles found by the best-effort sort.
    pub fn cycles(&self) -> Vec<Vec<OperatorId>> {
        self.graph.write().cycles().to_vec()
    }

    pub fn roots(&self) -> Vec<OperatorId> {
        self.graph.read().roots()
    }

    /// For-loop scopes as they would be discovered right now.
    pub fn loop_scopes(&self) -> Vec<ForLoopScope> {
        discover_loop_scopes(&self.graph.read())
    }

    pub fn stats(&self) -> GraphStats {
        let mut graph = self.graph.write();
        graph.refresh();
        let levels = graph.execution_levels();
        let level_count = levels.len();
        let max_parallelism = levels.iter().map(Vec::len).max().unwrap_or(0);
        let cycle_count = graph.cycles().len();
        let graph = parking_lot::RwLockWriteGuard::downgrade(graph);
        GraphStats {
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
            root_count: graph.roots().len(),
            level_count,
            max_parallelism,
            cycle_count,
            loop_scope_count: discover_loop_scopes(&graph).len(),
            direct_node_count: self.direct.read().len(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn metrics_handle(&self) -> &ExecutorMetrics {
        &self.metrics
    }

    /// Results of the most recent pass.
    pub fn last_results(&self) -> ExecutionResults {
        self.last_results.read().clone()
    }

    /// Number of passes started so far.
    pub fn pass_count(&self) -> u64 {
        self.pass.load(Ordering::Acquire)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::build(ExecutorConfig::default(), None)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("graph", &*self.graph.read())
            .field("has_store", &self.store.is_some())
            .field("pass", &self.pass_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OperatorRole;
    use crate::operator::{outputs, FnOperator, MemoryStore, OperatorCore};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Operator that adds one to its `value` input and counts its runs.
    fn increment(id: &str, runs: Arc<AtomicUsize>) -> Arc<dyn Operator> {
        Arc::new(FnOperator::new(
            OperatorCore::new(id, OperatorRole::Transform)
                .with_input("value", json!(0))
                .with_output("value"),
            move |inputs| {
                runs.fetch_add(1, Ordering::SeqCst);
                let value = inputs.get("value").and_then(Value::as_i64).unwrap_or(0);
                Ok(outputs([("value", json!(value + 1))]))
            },
        ))
    }

    fn link(executor: &Executor, from: &str, to: &str) {
        executor
            .add_edge(Edge::new(from, "value", to, "value"))
            .unwrap();
    }

    #[tokio::test]
    async fn pull_resolves_dependencies_first() {
        let executor = Executor::default();
        let runs = Arc::new(AtomicUsize::new(0));
        executor.add_node(increment("A", runs.clone()));
        executor.add_node(increment("B", runs.clone()));
        executor.add_node(increment("C", runs.clone()));
        link(&executor, "A", "B");
        link(&executor, "B", "C");

        let value = executor.pull(&"C".into()).await.unwrap();
        assert_eq!(value, json!({"value": 3}));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn clean_operator_is_not_recomputed() {
        let executor = Executor::default();
        let runs = Arc::new(AtomicUsize::new(0));
        executor.add_node(increment("A", runs.clone()));
        executor.add_node(increment("B", runs.clone()));
        link(&executor, "A", "B");

        executor.execute().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let results = executor.execute().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let result = &results[&OperatorId::from("B")];
        assert_eq!(result.value, Some(json!({"value": 2})));
        assert!(!result.changed);
    }

    #[tokio::test]
    async fn mark_dirty_recomputes_downstream() {
        let executor = Executor::default();
        let runs = Arc::new(AtomicUsize::new(0));
        executor.add_node(increment("A", runs.clone()));
        executor.add_node(increment("B", runs.clone()));
        link(&executor, "A", "B");
        executor.execute().await;

        let marked = executor.mark_dirty([&OperatorId::from("A")]);
        assert_eq!(marked.len(), 2);

        let results = executor.execute().await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(results[&OperatorId::from("B")].changed);
    }

    #[tokio::test]
    async fn diamond_dependency_computes_once() {
        let executor = Executor::default();
        let runs = Arc::new(AtomicUsize::new(0));
        for id in ["top", "left", "right"] {
            executor.add_node(increment(id, runs.clone()));
        }
        executor.add_node(Arc::new(FnOperator::new(
            OperatorCore::new("bottom", OperatorRole::Sink)
                .with_input("left", Value::Null)
                .with_input("right", Value::Null)
                .with_output("sum"),
            |inputs| {
                let left = inputs.get("left").and_then(Value::as_i64).unwrap_or(0);
                let right = inputs.get("right").and_then(Value::as_i64).unwrap_or(0);
                Ok(outputs([("sum", json!(left + right))]))
            },
        )));
        link(&executor, "top", "left");
        link(&executor, "top", "right");
        executor
            .add_edge(Edge::new("left", "value", "bottom", "left"))
            .unwrap();
        executor
            .add_edge(Edge::new("right", "value", "bottom", "right"))
            .unwrap();

        let results = executor.execute().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[&OperatorId::from("bottom")].value, Some(json!({"sum": 4})));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejected_edge_leaves_graph_unchanged() {
        let executor = Executor::default();
        let runs = Arc::new(AtomicUsize::new(0));
        for id in ["A", "B", "C"] {
            executor.add_node(increment(id, runs.clone()));
        }
        link(&executor, "A", "B");
        link(&executor, "B", "C");

        let err = executor
            .add_edge(Edge::new("C", "value", "A", "value"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Cycle { .. }));
        let ids: Vec<String> = executor.edges().into_iter().map(|edge| edge.id).collect();
        assert_eq!(ids, vec!["A.value->B.value", "B.value->C.value"]);
    }

    #[tokio::test]
    async fn store_sync_keeps_direct_operators() {
        let store = Arc::new(MemoryStore::new());
        let runs = Arc::new(AtomicUsize::new(0));
        store.insert(increment("/stored", runs.clone()));

        let executor =
            Executor::with_store(ExecutorConfig::default(), store.clone()).unwrap();
        executor.add_node(increment("/direct", runs.clone()));

        executor.execute().await;
        assert!(executor.contains(&"/stored".into()));
        assert!(executor.contains(&"/direct".into()));

        store.remove(&"/stored".into());
        executor.execute().await;
        assert!(!executor.contains(&"/stored".into()));
        assert!(executor.contains(&"/direct".into()));
        assert_eq!(executor.stats().direct_node_count, 1);
    }

    #[tokio::test]
    async fn unknown_operator_pull_fails() {
        let executor = Executor::default();
        let err = executor.pull(&"/missing".into()).await.unwrap_err();
        assert_eq!(err, EngineError::UnknownOperator("/missing".into()));
    }

    #[tokio::test]
    async fn force_update_recomputes_everything() {
        let executor = Executor::default();
        let runs = Arc::new(AtomicUsize::new(0));
        executor.add_node(increment("A", runs.clone()));
        executor.add_node(increment("B", runs.clone()));
        link(&executor, "A", "B");

        executor.execute().await;
        executor.force_update().await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(executor.metrics().passes_completed, 2);
        assert_eq!(executor.metrics().operators_computed, 4);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ExecutorConfig {
            target_fps: 0,
            ..ExecutorConfig::default()
        };
        assert!(Executor::new(config).is_err());
    }
}
