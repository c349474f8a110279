//! Retry/escalation policy
//!
//! Maps one stage outcome to the next step of a task. The attempt budget is a
//! single counter per task shared by every stage.

use serde::Serialize;
use tracing::debug;

use crate::domain::Stage;
use crate::stage::{StageError, StageResult};

/// What the orchestrator does after a stage call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    /// Run `stage` next without consuming an attempt
    Advance { stage: Stage },
    /// The task is done
    Complete,
    /// Consume one attempt and re-enter the pipeline at `stage`
    Retry { stage: Stage, reason: String },
    /// Consume the last attempt and fail the task
    Exhausted { reason: String },
    /// Fail the task now, whatever the budget
    Fatal { reason: String },
}

impl Route {
    /// True when following this route costs an attempt
    pub fn consumes_attempt(&self) -> bool {
        matches!(self, Self::Retry { .. } | Self::Exhausted { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy;

impl RetryPolicy {
    /// Decide the route for `outcome` of `stage`, given the attempts the task
    /// has consumed so far and its budget
    pub fn route(
        &self,
        stage: Stage,
        outcome: &Result<StageResult, StageError>,
        attempts_used: u32,
        max_attempts: u32,
    ) -> Route {
        let route = match (stage, outcome) {
            // Gap analysis is fail-open: only a clean "nothing to do" skips ahead
            (Stage::GapAnalysis, Ok(StageResult::GapNotFound)) => Route::Complete,
            (Stage::GapAnalysis, _) => Route::Advance { stage: Stage::Plan },

            (stage, Ok(StageResult::Success { .. })) => match stage.next() {
                Some(next) => Route::Advance { stage: next },
                None => Route::Complete,
            },

            (stage, Ok(StageResult::GapNotFound)) => self.retry(
                stage,
                format!("{} returned gap_not_found", stage),
                attempts_used,
                max_attempts,
            ),

            (_, Ok(StageResult::FatalFailure { reason })) => Route::Fatal { reason: reason.clone() },

            (
                stage,
                Ok(StageResult::RecoverableFailure {
                    reason,
                    retry_target,
                    classification,
                }),
            ) => {
                let target = match stage {
                    Stage::Validate => Stage::Implement,
                    Stage::QualityCheck => classification
                        .map(|c| c.retry_stage())
                        .or(*retry_target)
                        .unwrap_or(Stage::Implement),
                    // A target later in the pipeline would skip work
                    _ => retry_target.filter(|t| *t <= stage).unwrap_or(stage),
                };
                self.retry(target, reason.clone(), attempts_used, max_attempts)
            }

            (stage, Err(e)) => self.retry(stage, e.to_string(), attempts_used, max_attempts),
        };

        debug!(%stage, attempts_used, max_attempts, ?route, "route: decided");
        route
    }

    fn retry(&self, stage: Stage, reason: String, attempts_used: u32, max_attempts: u32) -> Route {
        if attempts_used + 1 >= max_attempts {
            Route::Exhausted { reason }
        } else {
            Route::Retry { stage, reason }
        }
    }
}
