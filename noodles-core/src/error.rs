//! Engine Errors
//!
//! Two error families exist:
//!
//! - [`OperatorError`] is what an operator's own computation reports.
//! - [`EngineError`] is what the engine reports to callers. Mutation errors
//!   (cycles, unknown ids) are raised synchronously before anything changes;
//!   execution errors wrap an [`OperatorError`] with the failing operator id.
//!
//! `EngineError` is `Clone` because a single failure recorded during a pass
//! (for example an aborted loop scope) is handed to every consumer of the
//! affected operator.

use thiserror::Error;

use crate::graph::OperatorId;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A failure raised by an operator's computation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperatorError {
    #[error("{0}")]
    Failed(String),

    #[error("missing input field '{0}'")]
    MissingInput(String),

    #[error("invalid input field '{field}': expected {expected}")]
    InvalidInput { field: String, expected: String },
}

impl OperatorError {
    /// Shorthand for a free-form failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors reported by the graph and executor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Adding the edge would close a cycle. `path` starts and ends at the
    /// same operator.
    #[error("edge would create a cycle: {}", format_path(.path))]
    Cycle { path: Vec<OperatorId> },

    #[error("unknown operator '{0}'")]
    UnknownOperator(OperatorId),

    #[error("duplicate edge '{0}'")]
    DuplicateEdge(String),

    #[error("feedback edge '{edge}' must target a loop meta operator, found '{target}'")]
    InvalidFeedbackEdge { edge: String, target: OperatorId },

    #[error("operator '{id}' failed: {source}")]
    Operator {
        id: OperatorId,
        #[source]
        source: OperatorError,
    },

    #[error("loop scope '{begin}' aborted at iteration {index}: {source}")]
    LoopAborted {
        begin: OperatorId,
        index: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// The operator that ultimately failed, if the error came from execution.
    pub fn failing_operator(&self) -> Option<&OperatorId> {
        match self {
            Self::Operator { id, .. } => Some(id),
            Self::LoopAborted { source, .. } => source.failing_operator(),
            _ => None,
        }
    }
}

fn format_path(path: &[OperatorId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_lists_path() {
        let err = EngineError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "edge would create a cycle: a -> b -> a");
    }

    #[test]
    fn loop_abort_reports_inner_operator() {
        let err = EngineError::LoopAborted {
            begin: "/begin".into(),
            index: 2,
            source: Box::new(EngineError::Operator {
                id: "/double".into(),
                source: OperatorError::failed("boom"),
            }),
        };
        assert_eq!(err.failing_operator().map(|id| id.as_str()), Some("/double"));
        assert!(err.to_string().contains("iteration 2"));
    }
}
