//! Execution results, graph statistics and pass metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::graph::OperatorId;

/// Outcome of pulling one root during a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// The root's output record. `None` when the pull failed.
    pub value: Option<Value>,

    /// Whether the root's output was produced during this pass rather than
    /// served from an earlier cache.
    pub changed: bool,

    pub error: Option<EngineError>,
}

impl ExecutionResult {
    pub fn success(value: Value, changed: bool) -> Self {
        Self {
            value: Some(value),
            changed,
            error: None,
        }
    }

    pub fn failure(error: EngineError) -> Self {
        Self {
            value: None,
            changed: false,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-pass output: one result per root, in root discovery order.
pub type ExecutionResults = IndexMap<OperatorId, ExecutionResult>;

/// Structural summary of the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub root_count: usize,
    pub level_count: usize,
    /// Size of the widest execution level.
    pub max_parallelism: usize,
    pub cycle_count: usize,
    pub loop_scope_count: usize,
    /// Operators registered directly rather than through the store.
    pub direct_node_count: usize,
}

/// Counters updated by the executor and the frame scheduler.
#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    passes_completed: AtomicU64,
    ticks_skipped: AtomicU64,
    operators_computed: AtomicU64,
    root_failures: AtomicU64,
    loop_failures: AtomicU64,
    last_pass_nanos: AtomicU64,
    total_pass_nanos: AtomicU64,
}

impl ExecutorMetrics {
    pub(crate) fn record_pass(&self, elapsed: Duration, root_failures: usize) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
        self.last_pass_nanos.store(nanos, Ordering::Relaxed);
        self.total_pass_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.root_failures
            .fetch_add(root_failures as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_computation(&self) {
        self.operators_computed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_loop_failure(&self) {
        self.loop_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_tick(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let passes = self.passes_completed.load(Ordering::Relaxed);
        let total = self.total_pass_nanos.load(Ordering::Relaxed);
        MetricsSnapshot {
            passes_completed: passes,
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            operators_computed: self.operators_computed.load(Ordering::Relaxed),
            root_failures: self.root_failures.load(Ordering::Relaxed),
            loop_failures: self.loop_failures.load(Ordering::Relaxed),
            last_pass: Duration::from_nanos(self.last_pass_nanos.load(Ordering::Relaxed)),
            average_pass: if passes == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(total / passes)
            },
        }
    }
}

/// Point-in-time copy of [`ExecutorMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub passes_completed: u64,
    pub ticks_skipped: u64,
    pub operators_computed: u64,
    pub root_failures: u64,
    pub loop_failures: u64,
    pub last_pass: Duration,
    pub average_pass: Duration,
}
