//! Milestone record

use serde::{Deserialize, Serialize};

use super::id::{generate_id, now_ms};

/// Milestone status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    Active,
    Complete,
}

impl MilestoneStatus {
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Complete => "complete",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

impl From<MilestoneStatus> for String {
    fn from(status: MilestoneStatus) -> Self {
        status.as_token().to_string()
    }
}

impl TryFrom<String> for MilestoneStatus {
    type Error = String;

    fn try_from(token: String) -> Result<Self, Self::Error> {
        Self::from_token(&token).ok_or_else(|| format!("Unknown milestone status: {}", token))
    }
}

/// An ordered interim state grouping tasks toward one capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub description: String,
    pub status: MilestoneStatus,
    /// Position in the registry (0-indexed)
    pub ordinal: u32,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl Milestone {
    /// Create a new Milestone with generated ID
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        Self::with_id(generate_id("ms", &description), description)
    }

    /// Create a Milestone with a specific ID
    pub fn with_id(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: MilestoneStatus::Pending,
            ordinal: 0,
            created_at: now_ms(),
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == MilestoneStatus::Complete
    }
}
