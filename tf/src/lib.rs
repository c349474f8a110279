//! TaskForge - milestone-gated, multi-stage task pipeline orchestrator
//!
//! A request is broken into ordered milestones, each holding a dependency graph
//! of tasks. Every task passes through gap analysis, plan, implement, validate
//! and quality check, with failures routed back to earlier stages under one
//! shared attempt budget. When a milestone runs dry, an expansion gate asks an
//! assessment collaborator for uncovered gaps and either expands the milestone
//! with new tasks or advances to the next one.
//!
//! # Modules
//!
//! - [`graph`] - Task dependency graph with cascade rules
//! - [`policy`] - Retry/escalation routing of stage outcomes
//! - [`workflow`] - Milestone registry, plans and checkpoints
//! - [`gate`] - Expansion gate and its assessment/expansion collaborators
//! - [`stage`] - Stage executor trait and the command-backed executor
//! - [`state`] - Actor serializing every workflow mutation
//! - [`orchestrator`] - Run loop and final report
//! - [`events`] - Event bus and JSONL event log
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod gate;
pub mod graph;
pub mod orchestrator;
pub mod policy;
pub mod stage;
pub mod state;
pub mod workflow;

// Re-export commonly used types
pub use config::{CollaboratorConfig, Config, StagesConfig, StorageConfig, WorkflowConfig};
pub use domain::{Complexity, Milestone, MilestoneStatus, Stage, Task, TaskStatus};
pub use events::{EventBus, EventEmitter, EventLogger, ForgeEvent};
pub use gate::{
    Assessment, AssessmentError, AssessmentReport, CommandAssessment, CommandExpansion, Expansion, ExpansionError,
    ExpansionGate, GateContext, GateDecision, GateOutcome, ProposedTask,
};
pub use graph::{GraphError, GraphStatistics, TaskGraph};
pub use orchestrator::{FinalReport, Orchestrator, ReportOutcome};
pub use policy::{RetryPolicy, Route};
pub use stage::{CommandStageExecutor, QualityIssue, StageContext, StageError, StageExecutor, StageResult};
pub use state::{StateError, StateManager};
pub use workflow::{Checkpoint, CheckpointError, PlanFile, RunState, Workflow, WorkflowError};
