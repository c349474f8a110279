//! Domain types for TaskForge
//!
//! Core records: Task, Milestone, and the Stage enum that drives a task's
//! pipeline. Statuses persist through explicit string tokens.

mod id;
mod milestone;
mod stage;
mod task;

pub use id::{IdResolver, generate_id, now_ms};
pub use milestone::{Milestone, MilestoneStatus};
pub use stage::Stage;
pub use task::{Complexity, DEFAULT_MAX_ATTEMPTS, StageArtifacts, Task, TaskStatus};
