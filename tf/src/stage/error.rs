//! Stage execution errors

use thiserror::Error;

use crate::domain::Stage;

use super::command::CommandError;

/// A stage call that produced no usable result
///
/// Every variant is recoverable: the policy treats it as a failure of the
/// stage that raised it and consumes one attempt.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Malformed stage output: {0}")]
    Malformed(String),

    #[error("No executor configured for stage {0}")]
    NotConfigured(Stage),

    #[error("Stage executor error: {0}")]
    Other(String),
}

impl StageError {
    /// The call was abandoned because the workflow is shutting down
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Command(CommandError::Cancelled))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Command(CommandError::Timeout(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classification() {
        assert!(StageError::from(CommandError::Cancelled).is_cancelled());
        assert!(StageError::from(CommandError::Timeout(Duration::from_secs(1))).is_timeout());
        assert!(!StageError::Malformed("x".to_string()).is_cancelled());
    }

    #[test]
    fn test_display() {
        let err = StageError::NotConfigured(Stage::QualityCheck);
        assert_eq!(err.to_string(), "No executor configured for stage quality_check");
    }
}
