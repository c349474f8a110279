//! Event Bus - broadcast of workflow events
//!
//! Components emit events; consumers (the JSONL logger, the CLI progress
//! printer, tests) subscribe.

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::Stage;
use crate::gate::{ExpansionOutcome, GateOutcome};

use super::types::ForgeEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Central event bus
pub struct EventBus {
    tx: broadcast::Sender<ForgeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: ForgeEvent) {
        debug!(event_type = event.event_type(), workflow_id = event.workflow_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ForgeEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Emitter bound to one workflow
    pub fn emitter_for(&self, workflow_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            workflow_id: workflow_id.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap handle that stamps every event with its workflow ID
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<ForgeEvent>,
    workflow_id: String,
}

impl EventEmitter {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn emit(&self, event: ForgeEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    pub fn workflow_started(&self, request: &str, milestones: usize, resumed: bool) {
        self.emit(ForgeEvent::WorkflowStarted {
            workflow_id: self.workflow_id.clone(),
            request: request.to_string(),
            milestones,
            resumed,
        });
    }

    pub fn workflow_finished(&self, outcome: &str) {
        self.emit(ForgeEvent::WorkflowFinished {
            workflow_id: self.workflow_id.clone(),
            outcome: outcome.to_string(),
        });
    }

    pub fn task_started(&self, task_id: &str, milestone: &str, stage: Stage) {
        self.emit(ForgeEvent::TaskStarted {
            workflow_id: self.workflow_id.clone(),
            task_id: task_id.to_string(),
            milestone: milestone.to_string(),
            stage,
        });
    }

    pub fn stage_started(&self, task_id: &str, stage: Stage, attempt: u32) {
        self.emit(ForgeEvent::StageStarted {
            workflow_id: self.workflow_id.clone(),
            task_id: task_id.to_string(),
            stage,
            attempt,
        });
    }

    pub fn stage_finished(&self, task_id: &str, stage: Stage, outcome: &str, detail: Option<String>, duration_ms: u64) {
        self.emit(ForgeEvent::StageFinished {
            workflow_id: self.workflow_id.clone(),
            task_id: task_id.to_string(),
            stage,
            outcome: outcome.to_string(),
            detail,
            duration_ms,
        });
    }

    pub fn task_retried(
        &self,
        task_id: &str,
        failed_stage: Stage,
        retry_stage: Stage,
        attempt: u32,
        max_attempts: u32,
        reason: &str,
    ) {
        self.emit(ForgeEvent::TaskRetried {
            workflow_id: self.workflow_id.clone(),
            task_id: task_id.to_string(),
            failed_stage,
            retry_stage,
            attempt,
            max_attempts,
            reason: reason.to_string(),
        });
    }

    pub fn task_completed(&self, task_id: &str, promoted: Vec<String>) {
        self.emit(ForgeEvent::TaskCompleted {
            workflow_id: self.workflow_id.clone(),
            task_id: task_id.to_string(),
            promoted,
        });
    }

    /// Emit TaskFailed, followed by TasksBlocked when the failure cascaded
    pub fn task_failed(&self, task_id: &str, stage: Stage, reason: &str, attempts: u32, blocked: Vec<String>) {
        self.emit(ForgeEvent::TaskFailed {
            workflow_id: self.workflow_id.clone(),
            task_id: task_id.to_string(),
            stage,
            reason: reason.to_string(),
            attempts,
        });
        if !blocked.is_empty() {
            self.emit(ForgeEvent::TasksBlocked {
                workflow_id: self.workflow_id.clone(),
                failed_task: task_id.to_string(),
                blocked,
            });
        }
    }

    pub fn gate_evaluated(&self, outcome: &GateOutcome) {
        self.emit(ForgeEvent::GateEvaluated {
            workflow_id: self.workflow_id.clone(),
            iteration: outcome.iteration,
            milestone: outcome.milestone.clone(),
            decision: outcome.decision.name().to_string(),
            graph_complete: outcome.graph_complete,
            stable: outcome.stable,
        });
    }

    pub fn expansion_applied(&self, milestone: &str, outcome: &ExpansionOutcome) {
        self.emit(ForgeEvent::ExpansionApplied {
            workflow_id: self.workflow_id.clone(),
            milestone: milestone.to_string(),
            accepted: outcome.accepted.clone(),
            dropped_dependencies: outcome.dropped.len(),
            rejected: outcome.rejected.len(),
        });
    }

    pub fn milestone_advanced(&self, completed: &str, next: Option<String>) {
        self.emit(ForgeEvent::MilestoneAdvanced {
            workflow_id: self.workflow_id.clone(),
            completed: completed.to_string(),
            next,
        });
    }
}
