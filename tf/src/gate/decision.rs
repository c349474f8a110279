//! ExpansionGate - milestone completion and advancement decisions

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::workflow::Workflow;

use super::assessment::AssessmentReport;

/// What the orchestrator does after a gate evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Open tasks remain in the active milestone
    Continue,
    /// Nothing left to run but gaps remain: ask for new tasks
    Expand { gaps: Vec<String> },
    /// The active milestone completed and `next` is now active
    Advance { completed: String, next: String },
    /// The last milestone completed
    Finished { completed: String },
    /// Assessment was unavailable; try again later
    Wait { failures: u32 },
    /// Nothing runnable and nothing left to try
    Stalled { reason: String },
}

impl GateDecision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Expand { .. } => "expand",
            Self::Advance { .. } => "advance",
            Self::Finished { .. } => "finished",
            Self::Wait { .. } => "wait",
            Self::Stalled { .. } => "stalled",
        }
    }
}

/// Result of one gate evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    pub iteration: u32,
    pub milestone: Option<String>,
    /// Completeness computed from the graph alone
    pub graph_complete: bool,
    /// No tasks created during the closed iteration and every task final
    pub stable: bool,
    pub decision: GateDecision,
}

/// Combines the graph's completeness check with external gap reports
#[derive(Debug, Clone, Copy)]
pub struct ExpansionGate {
    pub max_expansion_rounds: u32,
    pub max_assessment_failures: u32,
}

impl ExpansionGate {
    pub fn new(max_expansion_rounds: u32, max_assessment_failures: u32) -> Self {
        Self {
            max_expansion_rounds,
            max_assessment_failures,
        }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self::new(config.max_expansion_rounds, config.max_assessment_failures)
    }

    /// Evaluate the active milestone and apply the resulting bookkeeping
    ///
    /// `assessment` is `None` when the assessment could not be obtained. In that
    /// case the milestone is never reported complete, and no gaps are assumed.
    /// The external completion hint is never consulted.
    pub fn evaluate(&self, workflow: &mut Workflow, assessment: Option<&AssessmentReport>) -> GateOutcome {
        let stable = workflow.close_iteration();
        let iteration = workflow.counters().iteration;

        let Some(active) = workflow.active_milestone().map(|m| m.id.clone()) else {
            return GateOutcome {
                iteration,
                milestone: None,
                graph_complete: true,
                stable,
                decision: GateDecision::Stalled {
                    reason: "no active milestone".to_string(),
                },
            };
        };

        let graph_complete = workflow.graph().is_milestone_complete(&active);
        let open = workflow.graph().open_count(&active);
        debug!(%active, iteration, graph_complete, open, stable, "evaluate: called");

        let decision = match assessment {
            None => {
                let counters = workflow.counters_mut();
                counters.assessment_failures += 1;
                let failures = counters.assessment_failures;
                if failures >= self.max_assessment_failures {
                    GateDecision::Stalled {
                        reason: format!("assessment unavailable {} times in a row", failures),
                    }
                } else {
                    warn!(%active, failures, "Assessment unavailable, will retry");
                    GateDecision::Wait { failures }
                }
            }
            Some(report) => {
                workflow.counters_mut().assessment_failures = 0;
                let gaps = report.gaps();

                if graph_complete && gaps.is_empty() {
                    match workflow.advance_milestone() {
                        Some(next) => GateDecision::Advance {
                            completed: active.clone(),
                            next,
                        },
                        None => GateDecision::Finished {
                            completed: active.clone(),
                        },
                    }
                } else if open > 0 {
                    GateDecision::Continue
                } else if !gaps.is_empty() {
                    let rounds = workflow.counters().expansion_rounds;
                    if rounds >= self.max_expansion_rounds {
                        GateDecision::Stalled {
                            reason: format!(
                                "milestone '{}' still has {} gap(s) after {} expansion round(s)",
                                active,
                                gaps.len(),
                                rounds
                            ),
                        }
                    } else {
                        workflow.counters_mut().expansion_rounds += 1;
                        GateDecision::Expand { gaps }
                    }
                } else {
                    GateDecision::Stalled {
                        reason: format!("milestone '{}' has blocked tasks and no gaps to expand", active),
                    }
                }
            }
        };

        info!(%active, iteration, graph_complete, stable, ?decision, "Gate evaluated");
        GateOutcome {
            iteration,
            milestone: Some(active),
            graph_complete,
            stable,
            decision,
        }
    }
}
