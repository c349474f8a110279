//! Stage results and the strict parser for executor output

use serde::{Deserialize, Serialize};

use crate::domain::Stage;

use super::error::StageError;

/// Quality-check failure classification, which picks the retry stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    WrongApproach,
    Incomplete,
    PlanIssue,
}

impl QualityIssue {
    pub fn retry_stage(&self) -> Stage {
        match self {
            Self::WrongApproach => Stage::GapAnalysis,
            Self::Incomplete => Stage::Implement,
            Self::PlanIssue => Stage::Plan,
        }
    }
}

/// Outcome of one stage call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageResult {
    /// The stage passed; the payload is carried to later stages
    Success { payload: String },
    /// Gap analysis found nothing to do
    GapNotFound,
    /// The stage failed in a way another attempt may fix
    RecoverableFailure {
        reason: String,
        retry_target: Option<Stage>,
        classification: Option<QualityIssue>,
    },
    /// The stage failed in a way no retry will fix
    FatalFailure { reason: String },
}

impl StageResult {
    pub fn success(payload: impl Into<String>) -> Self {
        Self::Success {
            payload: payload.into(),
        }
    }

    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self::RecoverableFailure {
            reason: reason.into(),
            retry_target: None,
            classification: None,
        }
    }

    pub fn quality_issue(reason: impl Into<String>, classification: QualityIssue) -> Self {
        Self::RecoverableFailure {
            reason: reason.into(),
            retry_target: None,
            classification: Some(classification),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalFailure { reason: reason.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::GapNotFound => "gap_not_found",
            Self::RecoverableFailure { .. } => "recoverable_failure",
            Self::FatalFailure { .. } => "fatal_failure",
        }
    }

    /// Parse executor stdout into a result
    ///
    /// The document must be a single JSON object with an `outcome` field and
    /// only the fields that outcome allows. Anything else is malformed; there is
    /// no best-effort repair.
    pub fn parse(stdout: &str) -> Result<Self, StageError> {
        let output: StageOutput =
            serde_json::from_str(stdout.trim()).map_err(|e| StageError::Malformed(e.to_string()))?;
        output.into_result()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OutcomeKind {
    Success,
    GapNotFound,
    RecoverableFailure,
    FatalFailure,
}

/// Wire form of executor output
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageOutput {
    outcome: OutcomeKind,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    retry_stage: Option<Stage>,
    #[serde(default)]
    classification: Option<QualityIssue>,
}

impl StageOutput {
    fn into_result(self) -> Result<StageResult, StageError> {
        let malformed = |msg: &str| Err(StageError::Malformed(msg.to_string()));
        let reason = self.reason.filter(|r| !r.trim().is_empty());

        match self.outcome {
            OutcomeKind::Success => {
                if reason.is_some() || self.retry_stage.is_some() || self.classification.is_some() {
                    return malformed("success carries failure fields");
                }
                match self.payload {
                    Some(payload) => Ok(StageResult::Success { payload }),
                    None => malformed("success without payload"),
                }
            }
            OutcomeKind::GapNotFound => {
                if self.payload.is_some() || reason.is_some() || self.retry_stage.is_some() || self.classification.is_some()
                {
                    return malformed("gap_not_found takes no fields");
                }
                Ok(StageResult::GapNotFound)
            }
            OutcomeKind::RecoverableFailure => {
                if self.payload.is_some() {
                    return malformed("recoverable_failure carries a payload");
                }
                match reason {
                    Some(reason) => Ok(StageResult::RecoverableFailure {
                        reason,
                        retry_target: self.retry_stage,
                        classification: self.classification,
                    }),
                    None => malformed("recoverable_failure without reason"),
                }
            }
            OutcomeKind::FatalFailure => {
                if self.payload.is_some() || self.retry_stage.is_some() || self.classification.is_some() {
                    return malformed("fatal_failure takes only a reason");
                }
                match reason {
                    Some(reason) => Ok(StageResult::FatalFailure { reason }),
                    None => malformed("fatal_failure without reason"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let result = StageResult::parse(r#"{"outcome": "success", "payload": "added route"}"#).unwrap();
        assert_eq!(result, StageResult::success("added route"));
    }

    #[test]
    fn test_parse_gap_not_found() {
        let result = StageResult::parse("  {\"outcome\": \"gap_not_found\"}\n").unwrap();
        assert_eq!(result, StageResult::GapNotFound);
    }

    #[test]
    fn test_parse_quality_failure() {
        let result = StageResult::parse(
            r#"{"outcome": "recoverable_failure", "reason": "misses edge case", "classification": "incomplete"}"#,
        )
        .unwrap();
        assert_eq!(result, StageResult::quality_issue("misses edge case", QualityIssue::Incomplete));
    }

    #[test]
    fn test_parse_retry_stage() {
        let result =
            StageResult::parse(r#"{"outcome": "recoverable_failure", "reason": "bad", "retry_stage": "plan"}"#).unwrap();
        assert!(matches!(
            result,
            StageResult::RecoverableFailure {
                retry_target: Some(Stage::Plan),
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_outputs_rejected() {
        let cases = [
            "",
            "not json",
            r#"{"payload": "x"}"#,
            r#"{"outcome": "done"}"#,
            r#"{"outcome": "success"}"#,
            r#"{"outcome": "success", "payload": "x", "confidence": 0.9}"#,
            r#"{"outcome": "success", "payload": "x", "reason": "y"}"#,
            r#"{"outcome": "gap_not_found", "payload": "x"}"#,
            r#"{"outcome": "recoverable_failure"}"#,
            r#"{"outcome": "recoverable_failure", "reason": "  "}"#,
            r#"{"outcome": "fatal_failure", "reason": "x", "classification": "incomplete"}"#,
            r#"{"outcome": "recoverable_failure", "reason": "x", "classification": "sloppy"}"#,
        ];
        for case in cases {
            assert!(
                matches!(StageResult::parse(case), Err(StageError::Malformed(_))),
                "accepted: {}",
                case
            );
        }
    }

    #[test]
    fn test_classification_routes() {
        assert_eq!(QualityIssue::WrongApproach.retry_stage(), Stage::GapAnalysis);
        assert_eq!(QualityIssue::Incomplete.retry_stage(), Stage::Implement);
        assert_eq!(QualityIssue::PlanIssue.retry_stage(), Stage::Plan);
    }
}
