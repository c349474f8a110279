//! Assessment collaborator: external gap and stability verdicts

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::CollaboratorConfig;
use crate::domain::{Complexity, Task, TaskStatus};
use crate::graph::GraphStatistics;
use crate::stage::{CommandError, CommandRequest, run_command};
use crate::workflow::Workflow;

#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("Assessment command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Malformed assessment output: {0}")]
    Malformed(String),

    #[error("Assessment unavailable: {0}")]
    Unavailable(String),
}

/// External verdict on the active milestone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssessmentReport {
    #[serde(default)]
    pub uncovered_gaps: Vec<String>,
    #[serde(default)]
    pub stability: bool,
    /// Advisory only; completeness is always recomputed from the graph
    #[serde(default)]
    pub milestone_complete_hint: bool,
}

impl AssessmentReport {
    pub fn with_gaps(gaps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            uncovered_gaps: gaps.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Gaps with blank entries removed
    pub fn gaps(&self) -> Vec<String> {
        self.uncovered_gaps
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn parse(stdout: &str) -> Result<Self, AssessmentError> {
        serde_json::from_str(stdout.trim()).map_err(|e| AssessmentError::Malformed(e.to_string()))
    }
}

/// Compact view of a task handed to gate collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub description: String,
    pub outcome: String,
    pub status: TaskStatus,
    pub complexity: Complexity,
    pub depends_on: Vec<String>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            description: task.description.clone(),
            outcome: task.outcome.clone(),
            status: task.status,
            complexity: task.complexity,
            depends_on: task.depends_on.iter().cloned().collect(),
        }
    }
}

/// What assessment and expansion are told about the active milestone
#[derive(Debug, Clone, Serialize)]
pub struct GateContext {
    pub workflow_id: String,
    pub request: String,
    pub milestone: String,
    pub milestone_description: String,
    pub iteration: u32,
    pub statistics: GraphStatistics,
    pub tasks: Vec<TaskSummary>,
    /// Gaps the last assessment reported, for expansion
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gaps: Vec<String>,
}

impl GateContext {
    /// Context for the active milestone, `None` when every milestone is done
    pub fn for_active(workflow: &Workflow) -> Option<Self> {
        let milestone = workflow.active_milestone()?;
        Some(Self {
            workflow_id: workflow.id.clone(),
            request: workflow.request.clone(),
            milestone: milestone.id.clone(),
            milestone_description: milestone.description.clone(),
            iteration: workflow.counters().iteration,
            statistics: workflow.graph().get_statistics(),
            tasks: workflow.graph().milestone_tasks(&milestone.id).map(TaskSummary::from).collect(),
            gaps: Vec::new(),
        })
    }

    pub fn with_gaps(mut self, gaps: Vec<String>) -> Self {
        self.gaps = gaps;
        self
    }
}

/// Reports uncovered gaps for the active milestone
#[async_trait]
pub trait Assessment: Send + Sync {
    async fn assess(&self, context: &GateContext, cancel: &CancellationToken) -> Result<AssessmentReport, AssessmentError>;
}

/// Assessment by shell command: context JSON on stdin, report JSON on stdout
pub struct CommandAssessment {
    config: CollaboratorConfig,
    working_dir: Option<PathBuf>,
}

impl CommandAssessment {
    pub fn new(config: CollaboratorConfig, working_dir: Option<PathBuf>) -> Self {
        Self { config, working_dir }
    }
}

#[async_trait]
impl Assessment for CommandAssessment {
    async fn assess(&self, context: &GateContext, cancel: &CancellationToken) -> Result<AssessmentReport, AssessmentError> {
        debug!(milestone = %context.milestone, iteration = context.iteration, "CommandAssessment::assess: called");
        if self.config.command.trim().is_empty() {
            return Err(AssessmentError::Unavailable("no assessment command configured".to_string()));
        }

        let input = serde_json::to_string(context).map_err(|e| AssessmentError::Malformed(e.to_string()))?;
        let request = CommandRequest::new(&self.config.command, input, self.config.timeout())
            .with_working_dir(self.working_dir.clone())
            .with_env("TF_WORKFLOW_ID", &context.workflow_id)
            .with_env("TF_MILESTONE", &context.milestone);

        let output = run_command(request, cancel).await?;
        let stdout = output
            .stdout_str()
            .map_err(|e| AssessmentError::Malformed(format!("stdout is not valid UTF-8: {}", e)))?;
        AssessmentReport::parse(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Milestone;

    fn workflow() -> Workflow {
        let mut wf = Workflow::new("r", vec![Milestone::with_id("m1", "One")], 3).unwrap();
        wf.add_task(Task::with_id("a", "m1", "A")).unwrap();
        wf
    }

    #[test]
    fn test_report_parse_and_gaps() {
        let report = AssessmentReport::parse(
            r#"{"uncovered_gaps": ["no logout", "  "], "stability": false, "milestone_complete_hint": true}"#,
        )
        .unwrap();
        assert_eq!(report.gaps(), vec!["no logout".to_string()]);
        assert!(report.milestone_complete_hint);

        assert_eq!(AssessmentReport::parse("{}").unwrap(), AssessmentReport::default());
        assert!(AssessmentReport::parse(r#"{"gaps": []}"#).is_err());
    }

    #[test]
    fn test_context_for_active() {
        let ctx = GateContext::for_active(&workflow()).unwrap();
        assert_eq!(ctx.milestone, "m1");
        assert_eq!(ctx.tasks.len(), 1);
        assert_eq!(ctx.tasks[0].status, TaskStatus::Ready);
        assert_eq!(ctx.statistics.total, 1);
    }

    #[tokio::test]
    async fn test_command_assessment() {
        let assessment = CommandAssessment::new(
            CollaboratorConfig {
                command: r#"echo "{\"uncovered_gaps\": [\"$TF_MILESTONE\"]}""#.to_string(),
                timeout_ms: 10_000,
            },
            None,
        );
        let ctx = GateContext::for_active(&workflow()).unwrap();
        let report = assessment.assess(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.gaps(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_unconfigured_assessment_unavailable() {
        let assessment = CommandAssessment::new(CollaboratorConfig::default(), None);
        let ctx = GateContext::for_active(&workflow()).unwrap();
        let err = assessment.assess(&ctx, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AssessmentError::Unavailable(_)));
    }
}
