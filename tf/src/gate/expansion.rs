//! Expansion collaborator: proposes new tasks for uncovered gaps

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::CollaboratorConfig;
use crate::domain::Complexity;
use crate::stage::{CommandError, CommandRequest, run_command};

use super::assessment::GateContext;

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("Expansion command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Malformed expansion output: {0}")]
    Malformed(String),
}

/// A task suggested by the expansion collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposedTask {
    /// Batch-local name other proposals may depend on
    #[serde(default)]
    pub key: Option<String>,
    pub description: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
    /// Existing task IDs or keys of earlier proposals in the batch
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ProposedTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            key: None,
            description: description.into(),
            outcome: String::new(),
            tags: Vec::new(),
            complexity: Complexity::default(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn depends_on(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }
}

/// Why a proposed dependency was not kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    UnknownTask,
    OtherMilestone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedDependency {
    pub task: String,
    pub dependency: String,
    pub reason: DropReason,
}

/// What one expansion round added
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionOutcome {
    pub accepted: Vec<String>,
    pub dropped: Vec<DroppedDependency>,
    pub rejected: Vec<String>,
}

/// Proposes tasks closing the gaps of the active milestone
#[async_trait]
pub trait Expansion: Send + Sync {
    async fn expand(&self, context: &GateContext, cancel: &CancellationToken) -> Result<Vec<ProposedTask>, ExpansionError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpansionOutput {
    tasks: Vec<ProposedTask>,
}

/// Expansion by shell command: context JSON (with gaps) on stdin,
/// `{"tasks": [...]}` on stdout
pub struct CommandExpansion {
    config: CollaboratorConfig,
    working_dir: Option<PathBuf>,
}

impl CommandExpansion {
    pub fn new(config: CollaboratorConfig, working_dir: Option<PathBuf>) -> Self {
        Self { config, working_dir }
    }
}

#[async_trait]
impl Expansion for CommandExpansion {
    async fn expand(&self, context: &GateContext, cancel: &CancellationToken) -> Result<Vec<ProposedTask>, ExpansionError> {
        debug!(milestone = %context.milestone, gaps = context.gaps.len(), "CommandExpansion::expand: called");
        let input = serde_json::to_string(context).map_err(|e| ExpansionError::Malformed(e.to_string()))?;
        let request = CommandRequest::new(&self.config.command, input, self.config.timeout())
            .with_working_dir(self.working_dir.clone())
            .with_env("TF_WORKFLOW_ID", &context.workflow_id)
            .with_env("TF_MILESTONE", &context.milestone);

        let output = run_command(request, cancel).await?;
        let stdout = output
            .stdout_str()
            .map_err(|e| ExpansionError::Malformed(format!("stdout is not valid UTF-8: {}", e)))?;
        let parsed: ExpansionOutput =
            serde_json::from_str(stdout.trim()).map_err(|e| ExpansionError::Malformed(e.to_string()))?;
        Ok(parsed.tasks)
    }
}
