//! Noodles Core
//!
//! This crate provides the execution engine for the Noodles pipeline editor.
//! It implements:
//!
//! - A dependency graph of operators with acyclicity enforced on every edge
//! - Dirty tracking, immediate or batched
//! - Pull-based evaluation with per-operator output caching
//! - Sub-graph for-loops with optional accumulators
//! - A frame scheduler that runs passes at a target frame rate
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: observable fields that connect operators
//! - `operator`: the operator contract, closure operators and loop markers
//! - `graph`: dependency graph, topological sort and dirty tracking
//! - `execution`: the executor, loop runner and frame scheduler
//! - `scope`: standalone sub-graph groups with a namespaced context
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use noodles_core::{Edge, Executor, FnOperator, OperatorCore, OperatorRole};
//! use noodles_core::operator::outputs;
//! use serde_json::json;
//!
//! let executor = Executor::default();
//! executor.add_node(Arc::new(FnOperator::new(
//!     OperatorCore::new("/number", OperatorRole::Source).with_output("value"),
//!     |_| Ok(outputs([("value", json!(21))])),
//! )));
//! executor.add_node(Arc::new(FnOperator::new(
//!     OperatorCore::new("/double", OperatorRole::Sink)
//!         .with_input("value", json!(0))
//!         .with_output("value"),
//!     |inputs| {
//!         let value = inputs["value"].as_i64().unwrap_or(0);
//!         Ok(outputs([("value", json!(value * 2))]))
//!     },
//! )));
//! executor.add_edge(Edge::new("/number", "value", "/double", "value"))?;
//!
//! let results = executor.execute().await;
//! // results["/double"].value == Some(json!({"value": 42}))
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod operator;
pub mod reactive;
pub mod scope;

pub use config::ExecutorConfig;
pub use error::{EngineError, OperatorError, Result};
pub use execution::{ExecutionResult, ExecutionResults, Executor, FrameScheduler};
pub use graph::{DirtyMode, Edge, OperatorId, OperatorRole};
pub use operator::{FieldValues, FnOperator, Operator, OperatorCore};
pub use scope::GraphScope;
