//! TaskForge configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::Stage;

/// Main TaskForge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retry budget and gate limits
    pub workflow: WorkflowConfig,

    /// Stage executor commands
    pub stages: StagesConfig,

    /// Expansion collaborator
    pub expansion: CollaboratorConfig,

    /// Assessment collaborator
    pub assessment: CollaboratorConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Validate configuration before a run
    ///
    /// Every collaborator needs a command; fail fast naming the first one
    /// missing.
    pub fn validate(&self) -> Result<()> {
        for stage in Stage::ALL {
            if self.stages.command_for(stage).is_none() {
                return Err(eyre::eyre!(
                    "No command configured for stage '{}'. Set stages.{} in the config file.",
                    stage,
                    stage.as_str().replace('_', "-")
                ));
            }
        }
        if self.expansion.command.trim().is_empty() {
            return Err(eyre::eyre!("No expansion command configured. Set expansion.command."));
        }
        if self.assessment.command.trim().is_empty() {
            return Err(eyre::eyre!("No assessment command configured. Set assessment.command."));
        }
        if self.workflow.max_attempts == 0 {
            return Err(eyre::eyre!("workflow.max-attempts must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskforge.yml
        let local_config = PathBuf::from(".taskforge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskforge/taskforge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskforge").join("taskforge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Retry budget and gate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Shared attempt budget per task
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Expansion rounds allowed per milestone
    #[serde(rename = "max-expansion-rounds")]
    pub max_expansion_rounds: u32,

    /// Consecutive assessment failures before the run stalls
    #[serde(rename = "max-assessment-failures")]
    pub max_assessment_failures: u32,

    /// Pause between assessment retries in milliseconds
    #[serde(rename = "assessment-retry-ms")]
    pub assessment_retry_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::domain::DEFAULT_MAX_ATTEMPTS,
            max_expansion_rounds: 5,
            max_assessment_failures: 3,
            assessment_retry_ms: 2_000,
        }
    }
}

impl WorkflowConfig {
    pub fn assessment_retry(&self) -> Duration {
        Duration::from_millis(self.assessment_retry_ms)
    }
}

/// Stage executor commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// Per-call timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Directory the commands run in (current directory when unset)
    #[serde(rename = "working-dir")]
    pub working_dir: Option<PathBuf>,

    #[serde(rename = "gap-analysis")]
    pub gap_analysis: Option<String>,

    pub plan: Option<String>,

    pub implement: Option<String>,

    pub validate: Option<String>,

    #[serde(rename = "quality-check")]
    pub quality_check: Option<String>,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 600_000,
            working_dir: None,
            gap_analysis: None,
            plan: None,
            implement: None,
            validate: None,
            quality_check: None,
        }
    }
}

impl StagesConfig {
    /// Command for a stage, ignoring blank entries
    pub fn command_for(&self, stage: Stage) -> Option<&str> {
        let command = match stage {
            Stage::GapAnalysis => &self.gap_analysis,
            Stage::Plan => &self.plan,
            Stage::Implement => &self.implement,
            Stage::Validate => &self.validate,
            Stage::QualityCheck => &self.quality_check,
        };
        command.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// An external command answering with one JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub command: String,

    /// Per-call timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_ms: 300_000,
        }
    }
}

impl CollaboratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for per-workflow run directories (event logs, default checkpoints)
    #[serde(rename = "runs-dir")]
    pub runs_dir: PathBuf,

    /// Checkpoint file name inside a run directory
    #[serde(rename = "checkpoint-name")]
    pub checkpoint_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/taskforge/runs on Linux)
        let runs_dir = dirs::data_dir()
            .map(|d| d.join("taskforge").join("runs"))
            .unwrap_or_else(|| PathBuf::from(".taskforge/runs"));

        Self {
            runs_dir,
            checkpoint_name: "checkpoint.json".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn run_dir(&self, workflow_id: &str) -> PathBuf {
        self.runs_dir.join(workflow_id)
    }

    pub fn default_checkpoint(&self, workflow_id: &str) -> PathBuf {
        self.run_dir(workflow_id).join(&self.checkpoint_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runnable() -> Config {
        let yaml = r#"
stages:
  gap-analysis: ./stage.sh gap
  plan: ./stage.sh plan
  implement: ./stage.sh implement
  validate: ./stage.sh validate
  quality-check: ./stage.sh qc
expansion:
  command: ./expand.sh
assessment:
  command: ./assess.sh
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.workflow.max_attempts, 3);
        assert_eq!(config.workflow.max_expansion_rounds, 5);
        assert_eq!(config.workflow.max_assessment_failures, 3);
        assert_eq!(config.stages.timeout_ms, 600_000);
        assert_eq!(config.storage.checkpoint_name, "checkpoint.json");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
workflow:
  max-attempts: 5
  max-expansion-rounds: 2
  assessment-retry-ms: 10

stages:
  timeout-ms: 1000
  working-dir: /tmp/work
  plan: "make plan"

storage:
  runs-dir: /tmp/runs
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.workflow.max_attempts, 5);
        assert_eq!(config.workflow.max_expansion_rounds, 2);
        assert_eq!(config.workflow.max_assessment_failures, 3);
        assert_eq!(config.workflow.assessment_retry(), Duration::from_millis(10));
        assert_eq!(config.stages.timeout(), Duration::from_secs(1));
        assert_eq!(config.stages.working_dir, Some(PathBuf::from("/tmp/work")));
        assert_eq!(config.stages.command_for(Stage::Plan), Some("make plan"));
        assert_eq!(config.stages.command_for(Stage::Implement), None);
        assert_eq!(
            config.storage.default_checkpoint("wf-1"),
            PathBuf::from("/tmp/runs/wf-1/checkpoint.json")
        );
    }

    #[test]
    fn test_validate_requires_every_command() {
        assert!(runnable().validate().is_ok());

        let mut config = runnable();
        config.stages.quality_check = Some("  ".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stages.quality-check"));

        let mut config = runnable();
        config.assessment.command.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("taskforge.yml");
        fs::write(&path, "workflow:\n  max-attempts: 7\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.workflow.max_attempts, 7);

        let missing = temp.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
