//! Dirty Tracking
//!
//! Marks operators as needing recomputation. Two modes exist, fixed per
//! executor:
//!
//! - **Immediate**: marking a node also marks everything reachable through
//!   its outgoing edges, so dirtiness always saturates downstream.
//! - **Batched**: marks only the named nodes and records them in a pending
//!   set. A single debounce timer clears the set when it fires. Nothing is
//!   propagated downstream in this mode.
//!
//! The batched mode does not propagate. Downstream operators still pick up
//! new values during a pull, because a changed input field marks its
//! operator dirty, but an unchanged upstream value will not force them to
//! recompute. Keep that asymmetry when changing either mode.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::dependency::DependencyGraph;
use super::node::OperatorId;

/// How [`DirtyTracker::mark`] propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyMode {
    #[default]
    Immediate,
    Batched,
}

/// Marks operators dirty according to a fixed [`DirtyMode`].
#[derive(Debug)]
pub struct DirtyTracker {
    mode: DirtyMode,
    batch_delay: Duration,
    pending: Arc<Mutex<IndexSet<OperatorId>>>,
    /// Whether the debounce timer is running.
    armed: Arc<AtomicBool>,
}

impl DirtyTracker {
    pub fn new(mode: DirtyMode, batch_delay: Duration) -> Self {
        Self {
            mode,
            batch_delay,
            pending: Arc::new(Mutex::new(IndexSet::new())),
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mode(&self) -> DirtyMode {
        self.mode
    }

    /// Mark the given operators dirty.
    ///
    /// Returns every operator whose dirty flag was set by this call. Ids not
    /// registered in `graph` are ignored.
    pub fn mark<'a, I>(&self, graph: &DependencyGraph, ids: I) -> IndexSet<OperatorId>
    where
        I: IntoIterator<Item = &'a OperatorId>,
    {
        match self.mode {
            DirtyMode::Immediate => self.saturate(graph, ids),
            DirtyMode::Batched => self.enqueue(graph, ids),
        }
    }

    /// Breadth-first walk over outgoing edges, marking every reached node.
    fn saturate<'a, I>(&self, graph: &DependencyGraph, ids: I) -> IndexSet<OperatorId>
    where
        I: IntoIterator<Item = &'a OperatorId>,
    {
        let mut visited = IndexSet::new();
        let mut queue: VecDeque<OperatorId> = ids.into_iter().cloned().collect();

        while let Some(id) = queue.pop_front() {
            if visited.contains(&id) {
                continue;
            }
            let Some(operator) = graph.operator(&id) else {
                continue;
            };
            operator.core().mark_dirty();
            queue.extend(graph.downstream_of(&id).cloned());
            visited.insert(id);
        }

        trace!(count = visited.len(), "marked dirty");
        visited
    }

    fn enqueue<'a, I>(&self, graph: &DependencyGraph, ids: I) -> IndexSet<OperatorId>
    where
        I: IntoIterator<Item = &'a OperatorId>,
    {
        let mut marked = IndexSet::new();
        for id in ids {
            if let Some(operator) = graph.operator(id) {
                operator.core().mark_dirty();
                marked.insert(id.clone());
            }
        }
        self.pending.lock().extend(marked.iter().cloned());
        self.arm();
        marked
    }

    /// Start the debounce timer unless it is already running.
    fn arm(&self) {
        if self.armed.swap(true, Ordering::AcqRel) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pending = Arc::clone(&self.pending);
                let armed = Arc::clone(&self.armed);
                let delay = self.batch_delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let flushed = {
                        let mut pending = pending.lock();
                        let count = pending.len();
                        pending.clear();
                        count
                    };
                    armed.store(false, Ordering::Release);
                    trace!(count = flushed, "flushed dirty batch");
                });
            }
            // No runtime to host the timer: flush right away
            Err(_) => self.flush(),
        }
    }

    /// Ids marked since the last flush (batched mode only).
    pub fn pending(&self) -> Vec<OperatorId> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Clear the pending set, as the debounce timer does.
    pub fn flush(&self) {
        self.pending.lock().clear();
        self.armed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, OperatorRole};
    use crate::operator::{FnOperator, Operator, OperatorCore};

    fn chain(ids: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for id in ids {
            let op: Arc<dyn Operator> = Arc::new(FnOperator::new(
                OperatorCore::new(*id, OperatorRole::Transform),
                |_| Ok(Default::default()),
            ));
            // Start clean so marking is observable
            op.core().publish(Default::default(), 1);
            graph.add_node(op);
        }
        for pair in ids.windows(2) {
            graph.add_edge(Edge::new(pair[0], "out", pair[1], "in")).unwrap();
        }
        graph
    }

    fn dirty_ids(graph: &DependencyGraph) -> Vec<String> {
        graph
            .operators()
            .filter(|op| op.core().is_dirty())
            .map(|op| op.core().id().to_string())
            .collect()
    }

    #[test]
    fn immediate_mode_saturates_downstream() {
        let graph = chain(&["A", "B", "C"]);
        let tracker = DirtyTracker::new(DirtyMode::Immediate, Duration::from_millis(16));

        let marked = tracker.mark(&graph, [&OperatorId::from("A")]);
        assert_eq!(marked.len(), 3);
        assert_eq!(dirty_ids(&graph), vec!["A", "B", "C"]);
        assert!(tracker.pending().is_empty());
    }

    #[test]
    fn immediate_mode_only_reaches_downstream() {
        let graph = chain(&["A", "B", "C"]);
        let tracker = DirtyTracker::new(DirtyMode::Immediate, Duration::from_millis(16));

        tracker.mark(&graph, [&OperatorId::from("B")]);
        assert_eq!(dirty_ids(&graph), vec!["B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batched_mode_does_not_propagate() {
        let graph = chain(&["A", "B", "C"]);
        let tracker = DirtyTracker::new(DirtyMode::Batched, Duration::from_millis(16));

        let marked = tracker.mark(&graph, [&OperatorId::from("A")]);
        assert_eq!(marked.len(), 1);
        assert_eq!(dirty_ids(&graph), vec!["A"]);

        tracker.mark(&graph, [&OperatorId::from("B")]);
        assert_eq!(tracker.pending().len(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tracker.pending().is_empty());
        // Flushing clears the batch but leaves flags alone
        assert_eq!(dirty_ids(&graph), vec!["A", "B"]);
    }

    #[test]
    fn batched_mode_without_runtime_flushes_immediately() {
        let graph = chain(&["A"]);
        let tracker = DirtyTracker::new(DirtyMode::Batched, Duration::from_millis(16));
        tracker.mark(&graph, [&OperatorId::from("A")]);
        assert!(tracker.pending().is_empty());
        assert_eq!(dirty_ids(&graph), vec!["A"]);
    }
}
