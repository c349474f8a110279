//! Final report of a workflow run

use std::fmt::Write as _;

use colored::Colorize;
use serde::Serialize;

use crate::domain::{MilestoneStatus, Stage, TaskStatus};
use crate::graph::GraphStatistics;
use crate::workflow::{RunState, Workflow};

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Every milestone advanced and no task failed
    Success,
    /// Some work completed, some did not
    Partial,
    /// Nothing completed
    Failed,
    /// Cancelled, or the checkpoint is of a run still in flight
    Interrupted,
}

impl ReportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }

    /// Process exit code for `tf run` / `tf resume`
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success | Self::Partial => 0,
            Self::Failed => 1,
            Self::Interrupted => 130,
        }
    }
}

impl std::fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneLine {
    pub id: String,
    pub description: String,
    pub status: MilestoneStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub reason: String,
    pub attempts: u32,
}

/// Everything a caller needs to know once a run stops
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub outcome: ReportOutcome,
    pub workflow_id: String,
    pub request: String,
    pub milestones: Vec<MilestoneLine>,
    pub milestones_completed: usize,
    pub completed: Vec<String>,
    pub failed: Vec<FailedTask>,
    pub blocked: Vec<String>,
    pub deferred: Vec<String>,
    /// Pending, ready or in-progress tasks left behind
    pub open: Vec<String>,
    pub statistics: GraphStatistics,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stall_reason: Option<String>,
}

impl FinalReport {
    /// Summarize a workflow as it stands
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut blocked = Vec::new();
        let mut deferred = Vec::new();
        let mut open = Vec::new();

        for task in workflow.graph().tasks() {
            match task.status {
                TaskStatus::Complete => completed.push(task.id.clone()),
                TaskStatus::Failed => failed.push(FailedTask {
                    id: task.id.clone(),
                    stage: task.last_failure_stage,
                    reason: task.last_failure_reason.clone().unwrap_or_default(),
                    attempts: task.attempt_count,
                }),
                TaskStatus::Blocked => blocked.push(task.id.clone()),
                TaskStatus::Deferred => deferred.push(task.id.clone()),
                TaskStatus::Pending | TaskStatus::Ready | TaskStatus::InProgress => open.push(task.id.clone()),
            }
        }

        let milestones: Vec<MilestoneLine> = workflow
            .registry()
            .milestones()
            .iter()
            .map(|m| MilestoneLine {
                id: m.id.clone(),
                description: m.description.clone(),
                status: m.status,
            })
            .collect();
        let milestones_completed = workflow.registry().completed_count();

        let (outcome, stall_reason) = match workflow.run_state() {
            RunState::Finished if failed.is_empty() => (ReportOutcome::Success, None),
            RunState::Finished => (ReportOutcome::Partial, None),
            RunState::Stalled { reason } if completed.is_empty() && milestones_completed == 0 => {
                (ReportOutcome::Failed, Some(reason.clone()))
            }
            RunState::Stalled { reason } => (ReportOutcome::Partial, Some(reason.clone())),
            RunState::Interrupted | RunState::Running => (ReportOutcome::Interrupted, None),
        };

        Self {
            outcome,
            workflow_id: workflow.id.clone(),
            request: workflow.request.clone(),
            milestones,
            milestones_completed,
            completed,
            failed,
            blocked,
            deferred,
            open,
            statistics: workflow.graph().get_statistics(),
            iterations: workflow.counters().iteration,
            stall_reason,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable rendering, colored when the terminal allows it
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let outcome = match self.outcome {
            ReportOutcome::Success => self.outcome.as_str().green().bold(),
            ReportOutcome::Partial => self.outcome.as_str().yellow().bold(),
            ReportOutcome::Failed => self.outcome.as_str().red().bold(),
            ReportOutcome::Interrupted => self.outcome.as_str().magenta().bold(),
        };

        let _ = writeln!(out, "Workflow {} ({})", self.workflow_id.bold(), outcome);
        let _ = writeln!(out, "Request: {}", self.request);
        let _ = writeln!(
            out,
            "Milestones: {}/{} complete, {} gate iteration(s)",
            self.milestones_completed,
            self.milestones.len(),
            self.iterations
        );
        for m in &self.milestones {
            let marker = match m.status {
                MilestoneStatus::Complete => "✓".green(),
                MilestoneStatus::Active => "▶".cyan(),
                MilestoneStatus::Pending => "·".dimmed(),
            };
            let _ = writeln!(out, "  {} {} {}", marker, m.id, m.description.dimmed());
        }

        if let Some(reason) = &self.stall_reason {
            let _ = writeln!(out, "{} {}", "Stalled:".yellow(), reason);
        }

        let s = &self.statistics;
        let _ = writeln!(
            out,
            "Tasks: {} total, {} complete, {} failed, {} blocked, {} deferred, {} open, {} attempt(s) used",
            s.total,
            s.complete,
            s.failed,
            s.blocked,
            s.deferred,
            s.pending + s.ready + s.in_progress,
            s.total_attempts
        );

        for failed in &self.failed {
            let stage = failed.stage.map(|st| st.as_str()).unwrap_or("-");
            let _ = writeln!(
                out,
                "  {} {} [{}] after {} attempt(s): {}",
                "failed".red(),
                failed.id,
                stage,
                failed.attempts,
                failed.reason
            );
        }
        for (label, ids) in [("blocked", &self.blocked), ("deferred", &self.deferred), ("open", &self.open)] {
            if !ids.is_empty() {
                let _ = writeln!(out, "  {} {}", format!("{}:", label).yellow(), ids.join(", "));
            }
        }

        out
    }
}
