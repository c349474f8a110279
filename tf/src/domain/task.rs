//! Task record and its status/complexity enums

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::id::{generate_id, now_ms};
use super::stage::Stage;

/// Default per-task attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Task lifecycle status
///
/// Persisted through [`TaskStatus::as_token`] / [`TaskStatus::from_token`], never
/// through the variant names, so renaming a variant cannot break a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TaskStatus {
    /// Created, waiting on dependencies
    #[default]
    Pending,
    /// All dependencies complete, not started
    Ready,
    /// Selected and moving through stages
    InProgress,
    /// Finished successfully
    Complete,
    /// Failed terminally
    Failed,
    /// A transitive dependency failed
    Blocked,
    /// Set aside by an operator
    Deferred,
}

impl TaskStatus {
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Deferred => "deferred",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "in_progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "deferred" => Some(Self::Deferred),
            _ => None,
        }
    }

    /// Counts as done for milestone completeness
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Deferred)
    }

    /// No further transition can happen without operator action
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Deferred | Self::Blocked)
    }

    /// Not started yet (may or may not have its dependencies satisfied)
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_token().to_string()
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(token: String) -> Result<Self, Self::Error> {
        Self::from_token(&token).ok_or_else(|| format!("Unknown task status: {}", token))
    }
}

/// Complexity rank, last tie-breaker of the ready-set ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" | "low" => Ok(Self::Simple),
            "moderate" | "medium" => Ok(Self::Moderate),
            "complex" | "high" => Ok(Self::Complex),
            _ => Err(format!("Unknown complexity: {}", s)),
        }
    }
}

/// Opaque payloads carried between stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageArtifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
}

impl StageArtifacts {
    /// Store a successful stage's payload in the slot that stage owns
    pub fn record(&mut self, stage: Stage, payload: impl Into<String>) {
        let payload = Some(payload.into());
        match stage {
            Stage::GapAnalysis => self.gap_summary = payload,
            Stage::Plan => self.plan = payload,
            Stage::Implement => self.result_summary = payload,
            Stage::Validate | Stage::QualityCheck => self.review_notes = payload,
        }
    }
}

/// An atomic unit of work; a node in the task graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: String,

    /// What to do
    pub description: String,

    /// How to tell it is done
    pub outcome: String,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Tasks that must complete first
    pub depends_on: BTreeSet<String>,

    /// Reverse edges, maintained by the graph
    #[serde(default)]
    pub blocks: BTreeSet<String>,

    /// Owning milestone
    pub milestone: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub complexity: Complexity,

    /// Gate iteration in which the task was created
    #[serde(default)]
    pub created_iteration: u32,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,

    /// Failures consumed from the shared retry budget
    #[serde(default)]
    pub attempt_count: u32,

    pub max_attempts: u32,

    /// Next stage to run while InProgress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_stage: Option<Stage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,

    #[serde(default)]
    pub artifacts: StageArtifacts,
}

impl Task {
    /// Create a new Task with generated ID
    pub fn new(milestone: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        Self::with_id(generate_id("task", &description), milestone, description)
    }

    /// Create a Task with a specific ID (for plans, tests or recovery)
    pub fn with_id(id: impl Into<String>, milestone: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            description: description.into(),
            outcome: String::new(),
            status: TaskStatus::Pending,
            depends_on: BTreeSet::new(),
            blocks: BTreeSet::new(),
            milestone: milestone.into(),
            tags: Vec::new(),
            complexity: Complexity::default(),
            created_iteration: 0,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            current_stage: None,
            last_failure_stage: None,
            last_failure_reason: None,
            artifacts: StageArtifacts::default(),
        }
    }

    /// Set the measurable outcome
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = outcome.into();
        self
    }

    /// Add a dependency
    pub fn depends_on(mut self, dep_id: impl Into<String>) -> Self {
        self.depends_on.insert(dep_id.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.created_iteration = iteration;
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Update the status
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    /// Budget left before the task fails terminally
    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}
