//! Graph integrity errors

use thiserror::Error;

use crate::domain::TaskStatus;

/// Errors raised by graph mutations. A mutation that returns one of these has
/// left the graph untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{task}' would create a cycle: {}", path.join(" -> "))]
    CycleDetected { task: String, path: Vec<String> },

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task '{0}' has incomplete dependencies")]
    NotReady(String),

    #[error("Invalid transition for task '{task}': {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Inconsistent graph: {0}")]
    Inconsistent(String),
}

impl GraphError {
    /// True for errors caused by the shape of the dependency edges
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::UnknownDependency { .. } | Self::CycleDetected { .. } | Self::DuplicateTask(_) | Self::Inconsistent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_shows_path() {
        let err = GraphError::CycleDetected {
            task: "a".to_string(),
            path: vec!["a".to_string(), "c".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Task 'a' would create a cycle: a -> c -> a");
        assert!(err.is_integrity());
    }

    #[test]
    fn test_transition_is_not_integrity() {
        let err = GraphError::InvalidTransition {
            task: "a".to_string(),
            from: TaskStatus::Complete,
            to: TaskStatus::Failed,
        };
        assert!(!err.is_integrity());
        assert!(err.to_string().contains("complete -> failed"));
    }
}
