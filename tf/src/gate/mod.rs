//! Expansion gate and its external collaborators
//!
//! Milestone completeness comes from the graph; gaps come from the
//! [`Assessment`] collaborator; new tasks come from the [`Expansion`]
//! collaborator. The gate combines them into a [`GateDecision`].

mod assessment;
mod decision;
mod expansion;

pub use assessment::{Assessment, AssessmentError, AssessmentReport, CommandAssessment, GateContext, TaskSummary};
pub use decision::{ExpansionGate, GateDecision, GateOutcome};
pub use expansion::{
    CommandExpansion, DropReason, DroppedDependency, Expansion, ExpansionError, ExpansionOutcome, ProposedTask,
};
