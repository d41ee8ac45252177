//! Execution
//!
//! The [`Executor`] runs pull-based passes over a [`DependencyGraph`],
//! for-loop scopes are expanded by the loop runner before roots are pulled,
//! and the [`FrameScheduler`] repeats passes at a target frame rate.
//!
//! [`DependencyGraph`]: crate::graph::DependencyGraph

mod executor;
mod for_loop;
mod result;
mod scheduler;

pub use executor::Executor;
pub use for_loop::{discover_loop_scopes, ForLoopScope, LoopOutcome};
pub use result::{ExecutionResult, ExecutionResults, ExecutorMetrics, GraphStats, MetricsSnapshot};
pub use scheduler::{FramePacer, FrameScheduler};
