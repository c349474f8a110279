//! StageExecutor trait and the command-backed implementation

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::StagesConfig;
use crate::domain::{Complexity, Stage, StageArtifacts, Task};

use super::command::{CommandRequest, run_command};
use super::error::StageError;
use super::result::StageResult;

/// Why a stage is being re-run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryContext {
    pub failed_stage: Stage,
    pub reason: String,
}

/// Everything an executor is told about the task it works on
#[derive(Debug, Clone, Serialize)]
pub struct StageContext {
    pub workflow_id: String,
    pub request: String,
    pub milestone: String,
    pub milestone_description: String,
    pub task_id: String,
    pub description: String,
    pub outcome: String,
    pub tags: Vec<String>,
    pub complexity: Complexity,
    pub stage: Stage,
    /// Attempts consumed so far
    pub attempt: u32,
    pub max_attempts: u32,
    pub artifacts: StageArtifacts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryContext>,
}

impl StageContext {
    pub fn for_task(
        workflow_id: &str,
        request: &str,
        milestone_description: &str,
        task: &Task,
        stage: Stage,
    ) -> Self {
        let retry = match (task.last_failure_stage, &task.last_failure_reason) {
            (Some(failed_stage), Some(reason)) => Some(RetryContext {
                failed_stage,
                reason: reason.clone(),
            }),
            _ => None,
        };

        Self {
            workflow_id: workflow_id.to_string(),
            request: request.to_string(),
            milestone: task.milestone.clone(),
            milestone_description: milestone_description.to_string(),
            task_id: task.id.clone(),
            description: task.description.clone(),
            outcome: task.outcome.clone(),
            tags: task.tags.clone(),
            complexity: task.complexity,
            stage,
            attempt: task.attempt_count,
            max_attempts: task.max_attempts,
            artifacts: task.artifacts.clone(),
            retry,
        }
    }
}

/// Runs one stage of one task
///
/// Implementations must return promptly once `cancel` fires.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, context: &StageContext, cancel: &CancellationToken) -> Result<StageResult, StageError>;
}

/// Executes stages by running the configured shell command for each stage
///
/// The command receives the [`StageContext`] as JSON on stdin and the
/// `TF_WORKFLOW_ID`, `TF_TASK_ID`, `TF_STAGE` and `TF_ATTEMPT` variables, and
/// must print one stage-output JSON document.
pub struct CommandStageExecutor {
    config: StagesConfig,
}

impl CommandStageExecutor {
    pub fn new(config: StagesConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageExecutor for CommandStageExecutor {
    async fn execute(&self, context: &StageContext, cancel: &CancellationToken) -> Result<StageResult, StageError> {
        debug!(task_id = %context.task_id, stage = %context.stage, "CommandStageExecutor::execute: called");
        let command = self
            .config
            .command_for(context.stage)
            .ok_or(StageError::NotConfigured(context.stage))?;

        let input = serde_json::to_string(context).map_err(|e| StageError::Other(e.to_string()))?;
        let request = CommandRequest::new(command, input, self.config.timeout())
            .with_working_dir(self.config.working_dir.clone())
            .with_env("TF_WORKFLOW_ID", &context.workflow_id)
            .with_env("TF_TASK_ID", &context.task_id)
            .with_env("TF_STAGE", context.stage.as_str())
            .with_env("TF_ATTEMPT", context.attempt.to_string());

        let output = run_command(request, cancel).await?;
        let stdout = output
            .stdout_str()
            .map_err(|e| StageError::Malformed(format!("stdout is not valid UTF-8: {}", e)))?;
        let result = StageResult::parse(stdout)?;
        debug!(task_id = %context.task_id, stage = %context.stage, outcome = result.kind(), duration_ms = output.duration_ms, "CommandStageExecutor::execute: parsed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(stage: Stage) -> StageContext {
        let task = Task::with_id("t1", "m1", "Add route").with_outcome("route responds");
        StageContext::for_task("wf", "Build login", "Form renders", &task, stage)
    }

    fn executor(command: &str) -> CommandStageExecutor {
        CommandStageExecutor::new(StagesConfig {
            plan: Some(command.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_context_carries_retry() {
        let mut task = Task::with_id("t1", "m1", "Add route");
        assert!(StageContext::for_task("wf", "r", "m", &task, Stage::Plan).retry.is_none());

        task.last_failure_stage = Some(Stage::Validate);
        task.last_failure_reason = Some("tests fail".to_string());
        task.attempt_count = 1;
        let ctx = StageContext::for_task("wf", "r", "m", &task, Stage::Implement);
        assert_eq!(ctx.attempt, 1);
        assert_eq!(ctx.retry.unwrap().failed_stage, Stage::Validate);
    }

    #[tokio::test]
    async fn test_command_success() {
        let exec = executor(r#"printf '{"outcome":"success","payload":"%s"}' "$TF_STAGE""#);
        let result = exec.execute(&context(Stage::Plan), &CancellationToken::new()).await.unwrap();
        assert_eq!(result, StageResult::success("plan"));
    }

    #[tokio::test]
    async fn test_command_reads_context() {
        let exec = executor(r#"grep -q '"task_id":"t1"' && echo '{"outcome":"success","payload":"ok"}'"#);
        let result = exec.execute(&context(Stage::Plan), &CancellationToken::new()).await.unwrap();
        assert_eq!(result, StageResult::success("ok"));
    }

    #[tokio::test]
    async fn test_command_malformed() {
        let exec = executor("echo 'looks good to me'");
        let err = exec.execute(&context(Stage::Plan), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StageError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_command_invalid_utf8_is_malformed() {
        let exec = executor(r#"printf '{"outcome":"success","payload":"\377"}'"#);
        let err = exec.execute(&context(Stage::Plan), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StageError::Malformed(ref msg) if msg.contains("UTF-8")), "{:?}", err);
    }

    #[tokio::test]
    async fn test_missing_command() {
        let exec = executor("true");
        let err = exec
            .execute(&context(Stage::Validate), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::NotConfigured(Stage::Validate)));
    }
}
