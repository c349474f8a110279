//! Orchestrator - drives tasks through their stages and consults the gate
//!
//! One task at a time: the head of the active milestone's ready set is driven
//! through gap analysis, plan, implement, validate and quality check (retries
//! included) before the ready set is read again. When nothing is selectable the
//! expansion gate decides whether to expand, advance, wait or stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::domain::Stage;
use crate::events::EventEmitter;
use crate::gate::{Assessment, Expansion, GateDecision};
use crate::policy::{RetryPolicy, Route};
use crate::stage::{StageExecutor, StageResult};
use crate::state::{StateManager, StateResponse};
use crate::workflow::RunState;

use super::report::FinalReport;

/// How a task drive ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskRun {
    /// The task reached Complete or Failed
    Settled,
    /// Cancellation stopped it mid-pipeline; it stays InProgress
    Interrupted,
}

/// What the run loop does after a gate step
#[derive(Debug, Clone, PartialEq, Eq)]
enum GateStep {
    Continue,
    Stop(RunState),
}

pub struct Orchestrator {
    state: StateManager,
    executor: Arc<dyn StageExecutor>,
    assessment: Arc<dyn Assessment>,
    expansion: Arc<dyn Expansion>,
    emitter: EventEmitter,
    policy: RetryPolicy,
    assessment_retry: Duration,
    resumed: bool,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        state: StateManager,
        executor: Arc<dyn StageExecutor>,
        assessment: Arc<dyn Assessment>,
        expansion: Arc<dyn Expansion>,
        emitter: EventEmitter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            executor,
            assessment,
            expansion,
            emitter,
            policy: RetryPolicy,
            assessment_retry: WorkflowConfig::default().assessment_retry(),
            resumed: false,
            cancel,
        }
    }

    /// Delay before asking an unavailable assessment again
    pub fn with_assessment_retry(mut self, delay: Duration) -> Self {
        self.assessment_retry = delay;
        self
    }

    /// Mark the run as a continuation of a checkpoint
    pub fn resumed(mut self, resumed: bool) -> Self {
        self.resumed = resumed;
        self
    }

    /// Run until the workflow finishes, stalls or is cancelled
    ///
    /// Always returns a report unless the state actor itself is gone.
    pub async fn run(&self) -> StateResponse<FinalReport> {
        let snapshot = self.state.snapshot().await?;
        info!(
            workflow_id = %snapshot.id,
            milestones = snapshot.registry().milestones().len(),
            tasks = snapshot.graph().len(),
            resumed = self.resumed,
            "Workflow starting"
        );
        self.emitter
            .workflow_started(&snapshot.request, snapshot.registry().milestones().len(), self.resumed);
        self.state.set_run_state(RunState::Running).await?;

        let final_state = loop {
            if self.cancel.is_cancelled() {
                break RunState::Interrupted;
            }

            match self.state.next_task().await? {
                Some(id) => {
                    if self.drive_task(&id).await? == TaskRun::Interrupted {
                        break RunState::Interrupted;
                    }
                }
                None => match self.gate_step().await? {
                    GateStep::Continue => {}
                    GateStep::Stop(state) => break state,
                },
            }
        };

        self.state.set_run_state(final_state).await?;
        let report = FinalReport::from_workflow(&self.state.snapshot().await?);
        info!(workflow_id = %report.workflow_id, outcome = %report.outcome, "Workflow stopped");
        self.emitter.workflow_finished(report.outcome.as_str());
        Ok(report)
    }

    /// Drive one task through its stages until it settles
    async fn drive_task(&self, id: &str) -> StateResponse<TaskRun> {
        let mut stage = self.state.begin(id).await?;
        let first = self.state.stage_context(id, stage).await?;
        info!(task_id = %id, milestone = %first.milestone, %stage, "Task started");
        self.emitter.task_started(id, &first.milestone, stage);

        loop {
            if self.cancel.is_cancelled() {
                debug!(task_id = %id, %stage, "drive_task: cancelled between stages");
                return Ok(TaskRun::Interrupted);
            }

            let context = self.state.stage_context(id, stage).await?;
            self.emitter.stage_started(id, stage, context.attempt);

            let started = Instant::now();
            let outcome = self.executor.execute(&context, &self.cancel).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            // A call abandoned for shutdown is not the stage's fault
            if self.cancel.is_cancelled() && matches!(&outcome, Err(e) if e.is_cancelled()) {
                debug!(task_id = %id, %stage, "drive_task: stage call cancelled");
                return Ok(TaskRun::Interrupted);
            }

            let (kind, detail) = match &outcome {
                Ok(result @ (StageResult::RecoverableFailure { reason, .. } | StageResult::FatalFailure { reason })) => {
                    (result.kind(), Some(reason.clone()))
                }
                Ok(result) => (result.kind(), None),
                Err(e) => ("error", Some(e.to_string())),
            };
            self.emitter.stage_finished(id, stage, kind, detail, duration_ms);

            if let Ok(StageResult::Success { payload }) = &outcome {
                self.state.record_artifact(id, stage, payload).await?;
            }

            let route = self.policy.route(stage, &outcome, context.attempt, context.max_attempts);
            match route {
                Route::Advance { stage: next } => {
                    if let (Stage::GapAnalysis, Err(e)) = (stage, &outcome) {
                        warn!(task_id = %id, error = %e, "Gap analysis failed, continuing to plan");
                    }
                    self.state.set_stage(id, next).await?;
                    stage = next;
                }
                Route::Complete => {
                    let promoted = self.state.mark_complete(id).await?;
                    self.emitter.task_completed(id, promoted);
                    return Ok(TaskRun::Settled);
                }
                Route::Retry { stage: target, reason } => {
                    let attempts = self.state.record_failure(id, stage, &reason).await?;
                    self.state.set_stage(id, target).await?;
                    warn!(
                        task_id = %id,
                        failed_stage = %stage,
                        retry_stage = %target,
                        attempts,
                        max_attempts = context.max_attempts,
                        %reason,
                        "Stage failed, retrying"
                    );
                    self.emitter
                        .task_retried(id, stage, target, attempts, context.max_attempts, &reason);
                    stage = target;
                }
                Route::Exhausted { reason } => {
                    let attempts = self.state.record_failure(id, stage, &reason).await?;
                    let blocked = self.state.mark_failed(id, &reason, stage).await?;
                    self.emitter.task_failed(id, stage, &reason, attempts, blocked);
                    return Ok(TaskRun::Settled);
                }
                Route::Fatal { reason } => {
                    let blocked = self.state.mark_failed(id, &reason, stage).await?;
                    self.emitter.task_failed(id, stage, &reason, context.attempt, blocked);
                    return Ok(TaskRun::Settled);
                }
            }
        }
    }

    /// Assess the active milestone and act on the gate's decision
    async fn gate_step(&self) -> StateResponse<GateStep> {
        let Some(context) = self.state.gate_context().await? else {
            debug!("gate_step: no active milestone");
            return Ok(GateStep::Stop(RunState::Finished));
        };

        let assessed = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(GateStep::Stop(RunState::Interrupted)),
            result = self.assessment.assess(&context, &self.cancel) => result,
        };
        let report = match assessed {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(milestone = %context.milestone, error = %e, "Assessment unavailable");
                None
            }
        };

        let outcome = self.state.evaluate_gate(report).await?;
        self.emitter.gate_evaluated(&outcome);

        let step = match outcome.decision {
            GateDecision::Continue => {
                if self.state.next_task().await?.is_some() {
                    GateStep::Continue
                } else {
                    GateStep::Stop(RunState::Stalled {
                        reason: format!("milestone '{}' has open tasks but none can run", context.milestone),
                    })
                }
            }
            GateDecision::Expand { gaps } => {
                self.expand(&context.milestone, gaps).await?;
                if self.cancel.is_cancelled() {
                    GateStep::Stop(RunState::Interrupted)
                } else {
                    GateStep::Continue
                }
            }
            GateDecision::Advance { completed, next } => {
                info!(%completed, %next, "Milestone advanced");
                self.emitter.milestone_advanced(&completed, Some(next));
                GateStep::Continue
            }
            GateDecision::Finished { completed } => {
                info!(%completed, "Last milestone complete");
                self.emitter.milestone_advanced(&completed, None);
                GateStep::Stop(RunState::Finished)
            }
            GateDecision::Wait { failures } => {
                debug!(failures, delay = ?self.assessment_retry, "gate_step: waiting for assessment");
                tokio::select! {
                    _ = self.cancel.cancelled() => GateStep::Stop(RunState::Interrupted),
                    _ = tokio::time::sleep(self.assessment_retry) => GateStep::Continue,
                }
            }
            GateDecision::Stalled { reason } => {
                warn!(%reason, "Workflow stalled");
                GateStep::Stop(RunState::Stalled { reason })
            }
        };

        Ok(step)
    }

    /// Ask for tasks covering `gaps` and add them to `milestone`
    ///
    /// A failed or empty expansion still spends the round the gate counted.
    async fn expand(&self, milestone: &str, gaps: Vec<String>) -> StateResponse<()> {
        let Some(context) = self.state.gate_context().await? else {
            return Ok(());
        };
        let context = context.with_gaps(gaps);

        let proposals = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            result = self.expansion.expand(&context, &self.cancel) => result,
        };

        match proposals {
            Ok(proposals) => {
                let outcome = self.state.apply_expansion(milestone, proposals).await?;
                if outcome.accepted.is_empty() {
                    warn!(%milestone, "Expansion produced no tasks");
                }
                self.emitter.expansion_applied(milestone, &outcome);
            }
            Err(e) => {
                warn!(%milestone, error = %e, "Expansion failed");
            }
        }
        Ok(())
    }
}
