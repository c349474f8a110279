//! Pipeline stages a task passes through

use serde::{Deserialize, Serialize};

/// One of the five processing stages of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "gap_analysis")]
    GapAnalysis,
    #[serde(rename = "plan")]
    Plan,
    #[serde(rename = "implement")]
    Implement,
    #[serde(rename = "validate")]
    Validate,
    #[serde(rename = "quality_check")]
    QualityCheck,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 5] = [
        Stage::GapAnalysis,
        Stage::Plan,
        Stage::Implement,
        Stage::Validate,
        Stage::QualityCheck,
    ];

    /// Stable token used in checkpoints, events and the executor protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GapAnalysis => "gap_analysis",
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Validate => "validate",
            Self::QualityCheck => "quality_check",
        }
    }

    /// The stage that follows this one on success, `None` after quality check
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::GapAnalysis => Some(Self::Plan),
            Self::Plan => Some(Self::Implement),
            Self::Implement => Some(Self::Validate),
            Self::Validate => Some(Self::QualityCheck),
            Self::QualityCheck => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "gap_analysis" | "gap" => Ok(Self::GapAnalysis),
            "plan" | "planning" => Ok(Self::Plan),
            "implement" | "implementation" => Ok(Self::Implement),
            "validate" | "validation" => Ok(Self::Validate),
            "quality_check" | "qc" => Ok(Self::QualityCheck),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}
