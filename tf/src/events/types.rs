//! Event types for workflow activity
//!
//! Every event names the workflow it belongs to so a single bus can carry
//! several runs and the logger can split them into per-workflow files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Stage;

/// Observable orchestration activity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ForgeEvent {
    // === Workflow lifecycle ===
    WorkflowStarted {
        workflow_id: String,
        request: String,
        milestones: usize,
        resumed: bool,
    },
    WorkflowFinished {
        workflow_id: String,
        outcome: String,
    },

    // === Task lifecycle ===
    TaskStarted {
        workflow_id: String,
        task_id: String,
        milestone: String,
        stage: Stage,
    },
    StageStarted {
        workflow_id: String,
        task_id: String,
        stage: Stage,
        attempt: u32,
    },
    StageFinished {
        workflow_id: String,
        task_id: String,
        stage: Stage,
        /// Result kind, or `error` when the call itself failed
        outcome: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        duration_ms: u64,
    },
    TaskRetried {
        workflow_id: String,
        task_id: String,
        failed_stage: Stage,
        retry_stage: Stage,
        attempt: u32,
        max_attempts: u32,
        reason: String,
    },
    TaskCompleted {
        workflow_id: String,
        task_id: String,
        promoted: Vec<String>,
    },
    TaskFailed {
        workflow_id: String,
        task_id: String,
        stage: Stage,
        reason: String,
        attempts: u32,
    },
    TasksBlocked {
        workflow_id: String,
        failed_task: String,
        blocked: Vec<String>,
    },

    // === Gate ===
    GateEvaluated {
        workflow_id: String,
        iteration: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        milestone: Option<String>,
        decision: String,
        graph_complete: bool,
        stable: bool,
    },
    ExpansionApplied {
        workflow_id: String,
        milestone: String,
        accepted: Vec<String>,
        dropped_dependencies: usize,
        rejected: usize,
    },
    MilestoneAdvanced {
        workflow_id: String,
        completed: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<String>,
    },
}

impl ForgeEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowStarted { workflow_id, .. }
            | Self::WorkflowFinished { workflow_id, .. }
            | Self::TaskStarted { workflow_id, .. }
            | Self::StageStarted { workflow_id, .. }
            | Self::StageFinished { workflow_id, .. }
            | Self::TaskRetried { workflow_id, .. }
            | Self::TaskCompleted { workflow_id, .. }
            | Self::TaskFailed { workflow_id, .. }
            | Self::TasksBlocked { workflow_id, .. }
            | Self::GateEvaluated { workflow_id, .. }
            | Self::ExpansionApplied { workflow_id, .. }
            | Self::MilestoneAdvanced { workflow_id, .. } => workflow_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "WorkflowStarted",
            Self::WorkflowFinished { .. } => "WorkflowFinished",
            Self::TaskStarted { .. } => "TaskStarted",
            Self::StageStarted { .. } => "StageStarted",
            Self::StageFinished { .. } => "StageFinished",
            Self::TaskRetried { .. } => "TaskRetried",
            Self::TaskCompleted { .. } => "TaskCompleted",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::TasksBlocked { .. } => "TasksBlocked",
            Self::GateEvaluated { .. } => "GateEvaluated",
            Self::ExpansionApplied { .. } => "ExpansionApplied",
            Self::MilestoneAdvanced { .. } => "MilestoneAdvanced",
        }
    }
}

/// Wrapper for JSONL persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: ForgeEvent,
}

impl EventLogEntry {
    pub fn new(event: ForgeEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = ForgeEvent::TaskRetried {
            workflow_id: "wf-1".to_string(),
            task_id: "t1".to_string(),
            failed_stage: Stage::Validate,
            retry_stage: Stage::Implement,
            attempt: 1,
            max_attempts: 3,
            reason: "tests fail".to_string(),
        };
        assert_eq!(event.workflow_id(), "wf-1");
        assert_eq!(event.event_type(), "TaskRetried");
    }

    #[test]
    fn test_log_entry_serialization() {
        let entry = EventLogEntry::new(ForgeEvent::StageFinished {
            workflow_id: "wf-1".to_string(),
            task_id: "t1".to_string(),
            stage: Stage::QualityCheck,
            outcome: "success".to_string(),
            detail: None,
            duration_ms: 12,
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ts\""));
        assert!(json.contains("\"type\":\"StageFinished\""));
        assert!(json.contains("\"stage\":\"quality_check\""));
        assert!(!json.contains("detail"));

        let parsed: EventLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event, entry.event);
    }
}
