//! Versioned checkpoint files
//!
//! A checkpoint is a single JSON document holding the workflow's plain records.
//! Writes go through a temp file and a rename so a crash mid-write leaves the
//! previous checkpoint intact.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{Milestone, Task, now_ms};
use crate::graph::{GraphError, TaskGraph};

use super::registry::{MilestoneRegistry, RegistryError};
use super::{RunState, Workflow, WorkflowCounters};

/// Bumped whenever the record layout or a status token changes
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to access checkpoint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid checkpoint JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Checkpoint graph is invalid: {0}")]
    Graph(#[from] GraphError),

    #[error("Checkpoint milestones are invalid: {0}")]
    Registry(#[from] RegistryError),

    #[error("Task '{task}' belongs to unknown milestone '{milestone}'")]
    UnknownMilestone { task: String, milestone: String },
}

/// Plain persisted form of a [`Workflow`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub workflow_id: String,
    pub request: String,
    pub created_at: i64,
    pub saved_at: i64,
    pub max_attempts: u32,
    #[serde(default)]
    pub counters: WorkflowCounters,
    #[serde(default)]
    pub run_state: RunState,
    pub milestones: Vec<Milestone>,
    pub tasks: Vec<Task>,
}

impl Checkpoint {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            workflow_id: workflow.id.clone(),
            request: workflow.request.clone(),
            created_at: workflow.created_at,
            saved_at: now_ms(),
            max_attempts: workflow.max_attempts,
            counters: workflow.counters,
            run_state: workflow.run_state.clone(),
            milestones: workflow.registry.milestones().to_vec(),
            tasks: workflow.graph.serialize(),
        }
    }

    /// Rebuild the workflow, re-checking every graph and registry invariant
    pub fn into_workflow(self) -> Result<Workflow, CheckpointError> {
        debug!(workflow_id = %self.workflow_id, version = self.version, "into_workflow: called");
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                expected: CHECKPOINT_VERSION,
            });
        }

        let registry = MilestoneRegistry::restore(self.milestones)?;
        if let Some(orphan) = self.tasks.iter().find(|t| !registry.contains(&t.milestone)) {
            return Err(CheckpointError::UnknownMilestone {
                task: orphan.id.clone(),
                milestone: orphan.milestone.clone(),
            });
        }
        let graph = TaskGraph::deserialize(self.tasks)?;

        Ok(Workflow {
            id: self.workflow_id,
            request: self.request,
            created_at: self.created_at,
            graph,
            registry,
            counters: self.counters,
            run_state: self.run_state,
            max_attempts: self.max_attempts,
        })
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        debug!(path = %path.display(), "Checkpoint::load: called");
        let content = std::fs::read_to_string(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let checkpoint: Self = serde_json::from_str(&content)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        Ok(checkpoint)
    }

    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        debug!(path = %path.display(), tasks = self.tasks.len(), "Checkpoint::save: called");
        let io_err = |source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;

        debug!(path = %path.display(), "Checkpoint saved");
        Ok(())
    }
}

impl Workflow {
    /// Load and rebuild a workflow from a checkpoint file
    pub fn load_checkpoint(path: &Path) -> Result<Self, CheckpointError> {
        Checkpoint::load(path)?.into_workflow()
    }

    pub fn save_checkpoint(&self, path: &Path) -> Result<(), CheckpointError> {
        Checkpoint::from_workflow(self).save(path)
    }
}
