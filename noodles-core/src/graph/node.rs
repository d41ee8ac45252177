//! Graph Identifiers and Edges
//!
//! This module defines the identifier, role and edge types shared by every
//! part of the engine. Operators themselves are owned elsewhere (see
//! [`crate::operator`]); the graph only refers to them by id.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Path-like unique identifier of an operator, e.g. `/scatterplot-1`.
///
/// Cloning is cheap: the string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(Arc<str>);

impl OperatorId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperatorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OperatorId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl AsRef<str> for OperatorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The declared role of an operator.
///
/// Roles are assigned when the operator is constructed. The executor uses
/// them for sink discovery and loop scope discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    /// Produces data without inputs from the graph.
    Source,

    /// Plain computation node.
    #[default]
    Transform,

    /// Terminal output. Always pulled as a root.
    Sink,

    /// Start of a for-loop scope. Emits the current item, index and total.
    LoopBegin,

    /// End of a for-loop scope. Collects one value per iteration.
    LoopEnd,

    /// Optional accumulator marker of a for-loop scope.
    LoopMeta,
}

impl OperatorRole {
    /// Whether this role marks one of the for-loop scope boundaries.
    pub fn is_loop_marker(self) -> bool {
        matches!(self, Self::LoopBegin | Self::LoopEnd | Self::LoopMeta)
    }
}

/// A directed connection from one operator's output field to another
/// operator's input field.
///
/// Field names only matter to the operators; the graph uses `source` and
/// `target`. A feedback edge carries a loop accumulator back into a
/// [`OperatorRole::LoopMeta`] operator and is not treated as a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: OperatorId,
    pub target: OperatorId,
    pub source_handle: String,
    pub target_handle: String,
    #[serde(default)]
    pub feedback: bool,
}

impl Edge {
    /// Create a dependency edge. The id is derived from the endpoints.
    pub fn new(
        source: impl Into<OperatorId>,
        source_handle: impl Into<String>,
        target: impl Into<OperatorId>,
        target_handle: impl Into<String>,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        let source_handle = source_handle.into();
        let target_handle = target_handle.into();
        Self {
            id: format!("{source}.{source_handle}->{target}.{target_handle}"),
            source,
            target,
            source_handle,
            target_handle,
            feedback: false,
        }
    }

    /// Create a feedback edge into a loop meta operator.
    pub fn feedback(
        source: impl Into<OperatorId>,
        source_handle: impl Into<String>,
        target: impl Into<OperatorId>,
        target_handle: impl Into<String>,
    ) -> Self {
        Self {
            feedback: true,
            ..Self::new(source, source_handle, target, target_handle)
        }
    }

    /// Override the derived id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}
