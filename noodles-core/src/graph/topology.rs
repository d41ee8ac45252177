//! Topological Ordering
//!
//! Kahn's algorithm over an id set and an edge list, plus cycle recovery and
//! execution-level grouping.
//!
//! # Algorithm
//!
//! 1. Compute the in-degree of every node, counting only dependency edges
//!    whose endpoints are both in the node set (feedback edges are skipped).
//! 2. Seed the ready queue with every zero in-degree node, in node order.
//!    Node order is registration order, which makes the result deterministic.
//! 3. Repeatedly dequeue, append to the result and decrement the in-degree of
//!    each successor, enqueueing successors that reach zero.
//! 4. Nodes left over sit on (or behind) a cycle. Each cycle is recovered by a
//!    depth-first walk that returns the path from the first repeated node on.
//!
//! The order is used for introspection and for sub-graph scheduling. The
//! executor itself does not follow it when pulling roots.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};

use super::node::{Edge, OperatorId};
use crate::error::{EngineError, Result};

/// Result of a best-effort topological sort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOutcome {
    /// Nodes in dependency order. Shorter than the node set if cycles exist.
    pub order: Vec<OperatorId>,

    /// Every cycle found among the unordered remainder. Each path starts and
    /// ends at the same node.
    pub cycles: Vec<Vec<OperatorId>>,
}

impl SortOutcome {
    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty()
    }
}

/// Sort `nodes` by the dependency edges among them.
///
/// Edges that reference a node outside `nodes` are ignored, as are feedback
/// edges.
pub fn topological_sort<'a, N, E>(nodes: N, edges: E) -> SortOutcome
where
    N: IntoIterator<Item = &'a OperatorId>,
    E: IntoIterator<Item = &'a Edge>,
{
    let node_set: IndexSet<&OperatorId> = nodes.into_iter().collect();
    let mut adjacency: IndexMap<&OperatorId, Vec<&OperatorId>> = IndexMap::new();
    let mut in_degree: HashMap<&OperatorId, usize> =
        node_set.iter().map(|id| (*id, 0)).collect();

    for edge in edges {
        if edge.feedback || !node_set.contains(&edge.source) || !node_set.contains(&edge.target) {
            continue;
        }
        adjacency.entry(&edge.source).or_default().push(&edge.target);
        if let Some(degree) = in_degree.get_mut(&edge.target) {
            *degree += 1;
        }
    }

    let mut queue: VecDeque<&OperatorId> = node_set
        .iter()
        .copied()
        .filter(|id| in_degree.get(id).copied() == Some(0))
        .collect();
    let mut order = Vec::with_capacity(node_set.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.clone());
        if let Some(successors) = adjacency.get(id) {
            for &next in successors {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }
    }

    let cycles = if order.len() < node_set.len() {
        let ordered: HashSet<&OperatorId> = order.iter().collect();
        let remaining: IndexSet<&OperatorId> = node_set
            .iter()
            .copied()
            .filter(|id| !ordered.contains(id))
            .collect();
        find_cycles(&remaining, &adjacency)
    } else {
        Vec::new()
    };

    SortOutcome { order, cycles }
}

fn find_cycles<'a>(
    remaining: &IndexSet<&'a OperatorId>,
    adjacency: &IndexMap<&'a OperatorId, Vec<&'a OperatorId>>,
) -> Vec<Vec<OperatorId>> {
    let mut visited = HashSet::new();
    let mut cycles = Vec::new();
    for &start in remaining {
        if visited.contains(start) {
            continue;
        }
        walk(start, remaining, adjacency, &mut visited, &mut cycles);
    }
    cycles
}

/// Depth-first walk from `start` with an explicit stack. Each frame holds a
/// node and the index of its next successor to visit.
fn walk<'a>(
    start: &'a OperatorId,
    remaining: &IndexSet<&'a OperatorId>,
    adjacency: &IndexMap<&'a OperatorId, Vec<&'a OperatorId>>,
    visited: &mut HashSet<&'a OperatorId>,
    cycles: &mut Vec<Vec<OperatorId>>,
) {
    let mut stack: Vec<(&'a OperatorId, usize)> = vec![(start, 0)];
    // Position of every node currently on the stack
    let mut on_path: HashMap<&'a OperatorId, usize> = HashMap::from([(start, 0)]);
    visited.insert(start);

    while let Some(frame) = stack.last_mut() {
        let (node, cursor) = *frame;
        let Some(&next) = adjacency.get(node).and_then(|successors| successors.get(cursor))
        else {
            stack.pop();
            on_path.remove(node);
            continue;
        };
        frame.1 += 1;

        if !remaining.contains(next) {
            continue;
        }
        if let Some(&pos) = on_path.get(next) {
            let mut cycle: Vec<OperatorId> =
                stack[pos..].iter().map(|(id, _)| (*id).clone()).collect();
            cycle.push(next.clone());
            cycles.push(cycle);
            continue;
        }
        if visited.insert(next) {
            on_path.insert(next, stack.len());
            stack.push((next, 0));
        }
    }
}

/// Fail with [`EngineError::Cycle`] if `candidate` would close a cycle.
///
/// Every endpoint mentioned by an edge takes part in the check, registered
/// or not, so edges added ahead of their operators are still guarded.
pub fn check_acyclic<'a, N>(nodes: N, edges: &[Edge], candidate: &Edge) -> Result<()>
where
    N: IntoIterator<Item = &'a OperatorId>,
{
    if candidate.feedback {
        return Ok(());
    }
    let mut ids: IndexSet<&OperatorId> = nodes.into_iter().collect();
    for edge in edges.iter().chain(std::iter::once(candidate)) {
        ids.insert(&edge.source);
        ids.insert(&edge.target);
    }

    let outcome = topological_sort(ids, edges.iter().chain(std::iter::once(candidate)));
    match outcome.cycles.into_iter().next() {
        Some(path) => Err(EngineError::Cycle { path }),
        None => Ok(()),
    }
}

/// Group an ordered node list into execution levels.
///
/// A node's level is one past the deepest level among its upstream
/// dependencies, so nodes in the same level never depend on each other.
pub fn execution_levels(order: &[OperatorId], edges: &[Edge]) -> Vec<Vec<OperatorId>> {
    let mut upstream: HashMap<&OperatorId, Vec<&OperatorId>> = HashMap::new();
    for edge in edges.iter().filter(|edge| !edge.feedback) {
        upstream.entry(&edge.target).or_default().push(&edge.source);
    }

    let mut level_of: HashMap<&OperatorId, usize> = HashMap::with_capacity(order.len());
    let mut levels: Vec<Vec<OperatorId>> = Vec::new();
    for id in order {
        let level = upstream
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|dep| level_of.get(dep))
            .map(|level| level + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(id.clone());
    }
    levels
}
