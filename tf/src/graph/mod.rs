//! Task dependency graph
//!
//! Owns every task, the forward/reverse edges between them, readiness
//! computation, completion promotion and failure cascade.

mod error;
mod task_graph;

pub use error::GraphError;
pub use task_graph::{GraphStatistics, TaskGraph};
