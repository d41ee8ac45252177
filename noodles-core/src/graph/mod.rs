//! Dependency Graph
//!
//! This module implements the dependency graph that connects operators.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are operators, referenced by [`OperatorId`]
//! - Edges are data connections: an edge from A to B means B reads one of
//!   A's outputs, so B depends on A
//!
//! The acyclic property is enforced when an edge is added: the sort is run
//! against the existing edges plus the candidate, and the edge is refused if
//! a cycle shows up. Nothing is mutated on refusal.
//!
//! # Design Decisions
//!
//! 1. The graph stores non-owning references. Operators belong to a store
//!    and are shared with the graph through `Arc`.
//!
//! 2. Nodes are kept in registration order, which is also the tie-break of
//!    the topological sort.
//!
//! 3. Both upstream and downstream adjacency are maintained, because pulls
//!    walk upstream and dirty propagation walks downstream.
//!
//! 4. Feedback edges into loop meta markers are carried but never count as
//!    dependencies.

mod dependency;
mod dirty;
mod node;
mod topology;

pub use dependency::DependencyGraph;
pub use dirty::{DirtyMode, DirtyTracker};
pub use node::{Edge, OperatorId, OperatorRole};
pub use topology::{check_acyclic, execution_levels, topological_sort, SortOutcome};
