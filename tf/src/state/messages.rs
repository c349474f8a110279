//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::Stage;
use crate::gate::{AssessmentReport, ExpansionOutcome, GateContext, GateOutcome, ProposedTask};
use crate::graph::GraphError;
use crate::stage::StageContext;
use crate::workflow::{CheckpointError, RunState, Workflow, WorkflowError};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Queries
    Snapshot {
        reply: oneshot::Sender<StateResponse<Workflow>>,
    },
    NextTask {
        reply: oneshot::Sender<StateResponse<Option<String>>>,
    },
    StageContext {
        id: String,
        stage: Stage,
        reply: oneshot::Sender<StateResponse<StageContext>>,
    },
    GateContext {
        reply: oneshot::Sender<StateResponse<Option<GateContext>>>,
    },

    // Task transitions
    Begin {
        id: String,
        reply: oneshot::Sender<StateResponse<Stage>>,
    },
    SetStage {
        id: String,
        stage: Stage,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    RecordArtifact {
        id: String,
        stage: Stage,
        payload: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    RecordFailure {
        id: String,
        stage: Stage,
        reason: String,
        reply: oneshot::Sender<StateResponse<u32>>,
    },
    MarkComplete {
        id: String,
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },
    MarkFailed {
        id: String,
        reason: String,
        stage: Stage,
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },
    Defer {
        id: String,
        reason: String,
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },

    // Gate
    EvaluateGate {
        assessment: Option<AssessmentReport>,
        reply: oneshot::Sender<StateResponse<GateOutcome>>,
    },
    ApplyExpansion {
        milestone: String,
        proposals: Vec<ProposedTask>,
        reply: oneshot::Sender<StateResponse<ExpansionOutcome>>,
    },

    // Run bookkeeping
    SetRunState {
        state: RunState,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Checkpoint {
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Shutdown
    Shutdown,
}
