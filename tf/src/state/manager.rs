//! StateManager - actor that owns the Workflow
//!
//! Every graph mutation and every read goes through one channel, so a query
//! never observes half of a cascade. When a checkpoint path is set the actor
//! saves the workflow after each mutation.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::domain::Stage;
use crate::gate::{AssessmentReport, ExpansionGate, ExpansionOutcome, GateContext, GateOutcome, ProposedTask};
use crate::stage::StageContext;
use crate::workflow::{RunState, Workflow};

use super::messages::{StateCommand, StateError, StateResponse};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor owning `workflow`
    pub fn spawn(workflow: Workflow, checkpoint: Option<PathBuf>, gate: ExpansionGate) -> Self {
        debug!(workflow_id = %workflow.id, ?checkpoint, "spawn: called");
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(actor_loop(
            Actor {
                workflow,
                checkpoint,
                gate,
            },
            rx,
        ));

        info!("StateManager spawned");
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Queries ===

    /// Clone of the whole workflow
    pub async fn snapshot(&self) -> StateResponse<Workflow> {
        debug!("snapshot: called");
        self.request(|reply| StateCommand::Snapshot { reply }).await
    }

    /// ID of the task to drive next, if any is selectable
    pub async fn next_task(&self) -> StateResponse<Option<String>> {
        debug!("next_task: called");
        self.request(|reply| StateCommand::NextTask { reply }).await
    }

    pub async fn stage_context(&self, id: &str, stage: Stage) -> StateResponse<StageContext> {
        debug!(%id, %stage, "stage_context: called");
        self.request(|reply| StateCommand::StageContext {
            id: id.to_string(),
            stage,
            reply,
        })
        .await
    }

    pub async fn gate_context(&self) -> StateResponse<Option<GateContext>> {
        debug!("gate_context: called");
        self.request(|reply| StateCommand::GateContext { reply }).await
    }

    // === Task transitions ===

    /// Start (or resume) a task; returns the stage to run first
    pub async fn begin(&self, id: &str) -> StateResponse<Stage> {
        debug!(%id, "begin: called");
        self.request(|reply| StateCommand::Begin {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn set_stage(&self, id: &str, stage: Stage) -> StateResponse<()> {
        debug!(%id, %stage, "set_stage: called");
        self.request(|reply| StateCommand::SetStage {
            id: id.to_string(),
            stage,
            reply,
        })
        .await
    }

    pub async fn record_artifact(&self, id: &str, stage: Stage, payload: &str) -> StateResponse<()> {
        debug!(%id, %stage, "record_artifact: called");
        self.request(|reply| StateCommand::RecordArtifact {
            id: id.to_string(),
            stage,
            payload: payload.to_string(),
            reply,
        })
        .await
    }

    /// Consume one attempt; returns the attempt count afterwards
    pub async fn record_failure(&self, id: &str, stage: Stage, reason: &str) -> StateResponse<u32> {
        debug!(%id, %stage, "record_failure: called");
        self.request(|reply| StateCommand::RecordFailure {
            id: id.to_string(),
            stage,
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    /// Returns the IDs promoted to Ready
    pub async fn mark_complete(&self, id: &str) -> StateResponse<Vec<String>> {
        debug!(%id, "mark_complete: called");
        self.request(|reply| StateCommand::MarkComplete {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Returns the IDs newly Blocked
    pub async fn mark_failed(&self, id: &str, reason: &str, stage: Stage) -> StateResponse<Vec<String>> {
        debug!(%id, %stage, "mark_failed: called");
        self.request(|reply| StateCommand::MarkFailed {
            id: id.to_string(),
            reason: reason.to_string(),
            stage,
            reply,
        })
        .await
    }

    pub async fn defer(&self, id: &str, reason: &str) -> StateResponse<Vec<String>> {
        debug!(%id, "defer: called");
        self.request(|reply| StateCommand::Defer {
            id: id.to_string(),
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    // === Gate ===

    pub async fn evaluate_gate(&self, assessment: Option<AssessmentReport>) -> StateResponse<GateOutcome> {
        debug!(assessed = assessment.is_some(), "evaluate_gate: called");
        self.request(|reply| StateCommand::EvaluateGate { assessment, reply })
            .await
    }

    pub async fn apply_expansion(&self, milestone: &str, proposals: Vec<ProposedTask>) -> StateResponse<ExpansionOutcome> {
        debug!(%milestone, count = proposals.len(), "apply_expansion: called");
        self.request(|reply| StateCommand::ApplyExpansion {
            milestone: milestone.to_string(),
            proposals,
            reply,
        })
        .await
    }

    // === Run bookkeeping ===

    pub async fn set_run_state(&self, state: RunState) -> StateResponse<()> {
        debug!(?state, "set_run_state: called");
        self.request(|reply| StateCommand::SetRunState { state, reply }).await
    }

    /// Save the checkpoint now, reporting any failure
    pub async fn checkpoint(&self) -> StateResponse<()> {
        debug!("checkpoint: called");
        self.request(|reply| StateCommand::Checkpoint { reply }).await
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

struct Actor {
    workflow: Workflow,
    checkpoint: Option<PathBuf>,
    gate: ExpansionGate,
}

impl Actor {
    fn save(&self) -> StateResponse<()> {
        match &self.checkpoint {
            Some(path) => Ok(self.workflow.save_checkpoint(path)?),
            None => Ok(()),
        }
    }

    /// Persist after a successful mutation
    ///
    /// A failed save is logged and does not undo the mutation; the next save
    /// writes the full state again.
    fn persist<T>(&self, result: StateResponse<T>) -> StateResponse<T> {
        if result.is_ok() {
            if let Err(e) = self.save() {
                error!(error = %e, "StateManager: checkpoint save failed");
            }
        }
        result
    }

    fn stage_context(&self, id: &str, stage: Stage) -> StateResponse<StageContext> {
        let task = self
            .workflow
            .graph()
            .get(id)
            .ok_or_else(|| StateError::NotFound(format!("Task {}", id)))?;
        let milestone_description = self
            .workflow
            .registry()
            .get(&task.milestone)
            .map(|m| m.description.as_str())
            .unwrap_or_default();
        Ok(StageContext::for_task(
            &self.workflow.id,
            &self.workflow.request,
            milestone_description,
            task,
            stage,
        ))
    }
}

async fn actor_loop(mut actor: Actor, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(actor.workflow.clone()));
            }

            StateCommand::NextTask { reply } => {
                let next = actor.workflow.next_task().map(|t| t.id.clone());
                debug!(?next, "actor_loop: NextTask command");
                let _ = reply.send(Ok(next));
            }

            StateCommand::StageContext { id, stage, reply } => {
                let _ = reply.send(actor.stage_context(&id, stage));
            }

            StateCommand::GateContext { reply } => {
                let _ = reply.send(Ok(GateContext::for_active(&actor.workflow)));
            }

            StateCommand::Begin { id, reply } => {
                debug!(%id, "actor_loop: Begin command");
                let result = actor.workflow.graph_mut().begin(&id).map_err(StateError::from);
                let _ = reply.send(actor.persist(result));
            }

            StateCommand::SetStage { id, stage, reply } => {
                debug!(%id, %stage, "actor_loop: SetStage command");
                let result = actor.workflow.graph_mut().set_stage(&id, stage).map_err(StateError::from);
                let _ = reply.send(actor.persist(result));
            }

            StateCommand::RecordArtifact {
                id,
                stage,
                payload,
                reply,
            } => {
                debug!(%id, %stage, "actor_loop: RecordArtifact command");
                let result = actor
                    .workflow
                    .graph_mut()
                    .record_artifact(&id, stage, &payload)
                    .map_err(StateError::from);
                let _ = reply.send(actor.persist(result));
            }

            StateCommand::RecordFailure {
                id,
                stage,
                reason,
                reply,
            } => {
                debug!(%id, %stage, "actor_loop: RecordFailure command");
                let result = actor
                    .workflow
                    .graph_mut()
                    .record_failure(&id, stage, &reason)
                    .map_err(StateError::from);
                let _ = reply.send(actor.persist(result));
            }

            StateCommand::MarkComplete { id, reply } => {
                debug!(%id, "actor_loop: MarkComplete command");
                let result = actor.workflow.graph_mut().mark_complete(&id).map_err(StateError::from);
                let _ = reply.send(actor.persist(result));
            }

            StateCommand::MarkFailed {
                id,
                reason,
                stage,
                reply,
            } => {
                debug!(%id, %stage, "actor_loop: MarkFailed command");
                let result = actor
                    .workflow
                    .graph_mut()
                    .mark_failed(&id, &reason, stage)
                    .map_err(StateError::from);
                let _ = reply.send(actor.persist(result));
            }

            StateCommand::Defer { id, reason, reply } => {
                debug!(%id, "actor_loop: Defer command");
                let result = actor.workflow.defer(&id, &reason).map_err(StateError::from);
                let _ = reply.send(actor.persist(result));
            }

            StateCommand::EvaluateGate { assessment, reply } => {
                debug!("actor_loop: EvaluateGate command");
                let outcome = actor.gate.evaluate(&mut actor.workflow, assessment.as_ref());
                let _ = reply.send(actor.persist(Ok(outcome)));
            }

            StateCommand::ApplyExpansion {
                milestone,
                proposals,
                reply,
            } => {
                debug!(%milestone, "actor_loop: ApplyExpansion command");
                let result = actor
                    .workflow
                    .apply_expansion(&milestone, proposals)
                    .map_err(StateError::from);
                let _ = reply.send(actor.persist(result));
            }

            StateCommand::SetRunState { state, reply } => {
                debug!(?state, "actor_loop: SetRunState command");
                actor.workflow.set_run_state(state);
                let _ = reply.send(actor.persist(Ok(())));
            }

            StateCommand::Checkpoint { reply } => {
                debug!("actor_loop: Checkpoint command");
                let _ = reply.send(actor.save());
            }

            StateCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Milestone, Task, TaskStatus};
    use crate::gate::GateDecision;
    use tempfile::tempdir;

    fn workflow() -> Workflow {
        let mut wf = Workflow::new("Build it", vec![Milestone::with_id("m1", "First")], 2).unwrap();
        wf.add_task(Task::with_id("a", "m1", "A")).unwrap();
        wf.add_task(Task::with_id("b", "m1", "B").depends_on("a")).unwrap();
        wf
    }

    fn manager(checkpoint: Option<PathBuf>) -> StateManager {
        StateManager::spawn(workflow(), checkpoint, ExpansionGate::new(2, 2))
    }

    #[tokio::test]
    async fn test_task_lifecycle_through_actor() {
        let manager = manager(None);

        assert_eq!(manager.next_task().await.unwrap().as_deref(), Some("a"));
        assert_eq!(manager.begin("a").await.unwrap(), Stage::GapAnalysis);
        manager.set_stage("a", Stage::Implement).await.unwrap();
        manager.record_artifact("a", Stage::Implement, "diff").await.unwrap();

        let ctx = manager.stage_context("a", Stage::Implement).await.unwrap();
        assert_eq!(ctx.milestone_description, "First");
        assert_eq!(ctx.request, "Build it");

        let promoted = manager.mark_complete("a").await.unwrap();
        assert_eq!(promoted, vec!["b".to_string()]);

        let wf = manager.snapshot().await.unwrap();
        assert_eq!(wf.graph().get("b").unwrap().status, TaskStatus::Ready);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_cascade_visible_atomically() {
        let manager = manager(None);
        manager.begin("a").await.unwrap();
        assert_eq!(manager.record_failure("a", Stage::Validate, "red").await.unwrap(), 1);

        let blocked = manager.mark_failed("a", "red", Stage::Validate).await.unwrap();
        assert_eq!(blocked, vec!["b".to_string()]);

        let stats = manager.snapshot().await.unwrap().graph().get_statistics();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(manager.next_task().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let manager = manager(None);
        let err = manager.stage_context("ghost", Stage::Plan).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));

        let err = manager.begin("ghost").await.unwrap_err();
        assert!(matches!(err, StateError::Graph(_)));
    }

    #[tokio::test]
    async fn test_mutations_are_checkpointed() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("run").join("checkpoint.json");
        let manager = manager(Some(path.clone()));

        manager.begin("a").await.unwrap();
        let restored = Workflow::load_checkpoint(&path).unwrap();
        assert_eq!(restored.graph().get("a").unwrap().status, TaskStatus::InProgress);

        manager.mark_complete("a").await.unwrap();
        manager.begin("b").await.unwrap();
        manager.mark_complete("b").await.unwrap();

        let outcome = manager.evaluate_gate(Some(AssessmentReport::default())).await.unwrap();
        assert_eq!(
            outcome.decision,
            GateDecision::Finished {
                completed: "m1".to_string()
            }
        );

        manager.set_run_state(RunState::Finished).await.unwrap();
        let restored = Workflow::load_checkpoint(&path).unwrap();
        assert!(restored.run_state().is_finished());
        assert_eq!(restored.counters().iteration, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_channel() {
        let manager = manager(None);
        manager.shutdown().await.unwrap();
        tokio::task::yield_now().await;

        let err = manager.snapshot().await.unwrap_err();
        assert!(matches!(err, StateError::ChannelError));
    }
}
