//! Workflow - graph, milestone registry and gate counters for one request
//!
//! A Workflow is the unit the state actor owns and the unit a checkpoint
//! captures. Every task enters through [`Workflow::add_task`] so creation
//! iteration, attempt budget and the per-iteration creation counter stay
//! consistent.

mod checkpoint;
mod plan;
mod registry;

pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointError};
pub use plan::{PlanFile, PlanMilestone, PlanTask};
pub use registry::{MilestoneRegistry, RegistryError};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Milestone, Task, TaskStatus, generate_id, now_ms};
use crate::gate::{DropReason, DroppedDependency, ExpansionOutcome, ProposedTask};
use crate::graph::{GraphError, TaskGraph};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Unknown milestone: {0}")]
    UnknownMilestone(String),
}

/// Gate bookkeeping carried across iterations and checkpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowCounters {
    /// Gate evaluations so far
    pub iteration: u32,
    /// Tasks created since the last gate evaluation
    pub tasks_created_this_iteration: u32,
    /// Expansion rounds spent on the active milestone
    pub expansion_rounds: u32,
    /// Consecutive assessment failures
    pub assessment_failures: u32,
}

/// Where a workflow run stands
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Running,
    /// Every milestone advanced
    Finished,
    /// Nothing runnable and nothing left to try
    Stalled { reason: String },
    /// Cancelled before finishing
    Interrupted,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub request: String,
    pub created_at: i64,
    graph: TaskGraph,
    registry: MilestoneRegistry,
    counters: WorkflowCounters,
    run_state: RunState,
    max_attempts: u32,
}

impl Workflow {
    /// Create an empty workflow whose first milestone is active
    pub fn new(request: impl Into<String>, milestones: Vec<Milestone>, max_attempts: u32) -> Result<Self, WorkflowError> {
        let request = request.into();
        debug!(%request, milestones = milestones.len(), max_attempts, "Workflow::new: called");
        Ok(Self {
            id: generate_id("wf", &request),
            request,
            created_at: now_ms(),
            graph: TaskGraph::new(),
            registry: MilestoneRegistry::new(milestones)?,
            counters: WorkflowCounters::default(),
            run_state: RunState::Running,
            max_attempts,
        })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }

    pub fn registry(&self) -> &MilestoneRegistry {
        &self.registry
    }

    pub fn counters(&self) -> WorkflowCounters {
        self.counters
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    pub fn set_run_state(&mut self, state: RunState) {
        debug!(?state, "set_run_state: called");
        self.run_state = state;
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn active_milestone(&self) -> Option<&Milestone> {
        self.registry.active()
    }

    /// The task the orchestrator should drive next
    ///
    /// A task left InProgress by an interrupted run comes first; otherwise the
    /// head of the active milestone's ready set.
    pub fn next_task(&self) -> Option<&Task> {
        let milestone = self.registry.active()?;
        self.graph
            .milestone_tasks(&milestone.id)
            .find(|t| t.status == TaskStatus::InProgress)
            .or_else(|| self.graph.get_ready_tasks(Some(&milestone.id)).into_iter().next())
    }

    /// Operator deferral of a task and its open dependents
    pub fn defer(&mut self, id: &str, reason: &str) -> Result<Vec<String>, WorkflowError> {
        Ok(self.graph.defer(id, reason)?)
    }

    /// Insert a task stamped with the current iteration and the workflow's
    /// attempt budget
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskStatus, WorkflowError> {
        if !self.registry.contains(&task.milestone) {
            return Err(WorkflowError::UnknownMilestone(task.milestone));
        }
        task.created_iteration = self.counters.iteration;
        task.max_attempts = self.max_attempts;
        task.attempt_count = 0;

        let status = self.graph.add_task(task)?;
        self.counters.tasks_created_this_iteration += 1;
        Ok(status)
    }

    /// Turn expansion proposals into tasks of `milestone`
    ///
    /// Dependencies may name existing tasks or the `key` of an earlier proposal
    /// in the same batch. Unknown dependencies and dependencies on another
    /// milestone's tasks are dropped with a warning; the proposal itself is
    /// still added.
    pub fn apply_expansion(
        &mut self,
        milestone: &str,
        proposals: Vec<ProposedTask>,
    ) -> Result<ExpansionOutcome, WorkflowError> {
        debug!(%milestone, count = proposals.len(), "apply_expansion: called");
        if !self.registry.contains(milestone) {
            return Err(WorkflowError::UnknownMilestone(milestone.to_string()));
        }

        let mut outcome = ExpansionOutcome::default();
        let mut keys: HashMap<String, String> = HashMap::new();

        for proposal in proposals {
            let ProposedTask {
                key,
                description,
                outcome: expected,
                tags,
                complexity,
                depends_on,
            } = proposal;

            if description.trim().is_empty() {
                warn!(%milestone, ?key, "apply_expansion: proposal without description rejected");
                outcome.rejected.push(key.unwrap_or_default());
                continue;
            }

            let mut task = Task::new(milestone, description)
                .with_outcome(expected)
                .with_tags(tags)
                .with_complexity(complexity);

            for dep in depends_on {
                let resolved = keys
                    .get(&dep)
                    .cloned()
                    .or_else(|| self.graph.contains(&dep).then(|| dep.clone()));

                let reason = match resolved.as_deref().and_then(|id| self.graph.get(id)) {
                    None => Some(DropReason::UnknownTask),
                    Some(existing) if existing.milestone != milestone => Some(DropReason::OtherMilestone),
                    Some(existing) => {
                        task = task.depends_on(existing.id.clone());
                        None
                    }
                };

                if let Some(reason) = reason {
                    warn!(task_id = %task.id, dependency = %dep, ?reason, "apply_expansion: dependency dropped");
                    outcome.dropped.push(DroppedDependency {
                        task: task.id.clone(),
                        dependency: dep,
                        reason,
                    });
                }
            }

            let id = task.id.clone();
            match self.add_task(task) {
                Ok(status) => {
                    debug!(task_id = %id, %status, "apply_expansion: task added");
                    if let Some(key) = key {
                        keys.insert(key, id.clone());
                    }
                    outcome.accepted.push(id);
                }
                Err(e) => {
                    warn!(task_id = %id, error = %e, "apply_expansion: proposal rejected");
                    outcome.rejected.push(id);
                }
            }
        }

        info!(
            %milestone,
            accepted = outcome.accepted.len(),
            dropped = outcome.dropped.len(),
            rejected = outcome.rejected.len(),
            "Expansion applied"
        );
        Ok(outcome)
    }

    /// Close the current gate iteration
    ///
    /// Returns whether the closing iteration was stable: nothing was created
    /// during it and every task is final.
    pub(crate) fn close_iteration(&mut self) -> bool {
        let stable = self.counters.tasks_created_this_iteration == 0 && self.graph.all_final();
        self.counters.iteration += 1;
        self.counters.tasks_created_this_iteration = 0;
        stable
    }

    pub(crate) fn counters_mut(&mut self) -> &mut WorkflowCounters {
        &mut self.counters
    }

    /// Complete the active milestone and activate the next
    ///
    /// Returns the next milestone's ID, `None` when none remain.
    pub(crate) fn advance_milestone(&mut self) -> Option<String> {
        self.counters.expansion_rounds = 0;
        self.counters.assessment_failures = 0;
        self.registry.advance().map(|m| m.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Complexity;

    fn workflow() -> Workflow {
        Workflow::new(
            "Add login",
            vec![Milestone::with_id("m1", "Form"), Milestone::with_id("m2", "Session")],
            3,
        )
        .unwrap()
    }

    fn proposal(key: &str, deps: &[&str]) -> ProposedTask {
        ProposedTask {
            key: Some(key.to_string()),
            description: format!("Do {}", key),
            outcome: String::new(),
            tags: vec![],
            complexity: Complexity::Simple,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_add_task_stamps_iteration_and_budget() {
        let mut wf = workflow();
        wf.close_iteration();
        wf.add_task(Task::with_id("a", "m1", "A").with_max_attempts(9)).unwrap();

        let a = wf.graph().get("a").unwrap();
        assert_eq!(a.created_iteration, 1);
        assert_eq!(a.max_attempts, 3);
        assert_eq!(wf.counters().tasks_created_this_iteration, 1);
    }

    #[test]
    fn test_add_task_unknown_milestone() {
        let mut wf = workflow();
        let err = wf.add_task(Task::with_id("a", "m9", "A")).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownMilestone(ref m) if m == "m9"));
        assert!(wf.graph().is_empty());
    }

    #[test]
    fn test_expansion_resolves_batch_keys() {
        let mut wf = workflow();
        let outcome = wf
            .apply_expansion("m1", vec![proposal("first", &[]), proposal("second", &["first"])])
            .unwrap();

        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.dropped.is_empty());
        let second = wf.graph().get(&outcome.accepted[1]).unwrap();
        assert!(second.depends_on.contains(&outcome.accepted[0]));
        assert_eq!(second.status, TaskStatus::Pending);
    }

    #[test]
    fn test_expansion_drops_unknown_and_cross_milestone_deps() {
        let mut wf = workflow();
        wf.add_task(Task::with_id("other", "m2", "Other")).unwrap();
        wf.add_task(Task::with_id("same", "m1", "Same")).unwrap();

        let outcome = wf
            .apply_expansion("m1", vec![proposal("new", &["other", "ghost", "same"])])
            .unwrap();

        assert_eq!(outcome.accepted.len(), 1);
        let reasons: Vec<DropReason> = outcome.dropped.iter().map(|d| d.reason).collect();
        assert_eq!(reasons, vec![DropReason::OtherMilestone, DropReason::UnknownTask]);

        let added = wf.graph().get(&outcome.accepted[0]).unwrap();
        assert_eq!(added.depends_on.len(), 1);
        assert!(added.depends_on.contains("same"));
    }

    #[test]
    fn test_close_iteration_stability() {
        let mut wf = workflow();
        wf.add_task(Task::with_id("a", "m1", "A")).unwrap();
        assert!(!wf.close_iteration());

        // Nothing created, but "a" is not final
        assert!(!wf.close_iteration());

        wf.graph_mut().mark_complete("a").unwrap();
        assert!(wf.close_iteration());
        assert_eq!(wf.counters().iteration, 3);
    }

    #[test]
    fn test_next_task_prefers_in_progress_then_active_milestone() {
        let mut wf = workflow();
        wf.add_task(Task::with_id("later", "m2", "Later")).unwrap();
        wf.add_task(Task::with_id("a", "m1", "A")).unwrap();
        wf.add_task(Task::with_id("b", "m1", "B")).unwrap();
        assert_eq!(wf.next_task().map(|t| t.id.as_str()), Some("a"));

        wf.graph_mut().begin("b").unwrap();
        assert_eq!(wf.next_task().map(|t| t.id.as_str()), Some("b"));

        wf.graph_mut().mark_complete("b").unwrap();
        wf.defer("a", "not now").unwrap();
        assert!(wf.next_task().is_none());
    }

    #[test]
    fn test_advance_resets_milestone_counters() {
        let mut wf = workflow();
        wf.counters_mut().expansion_rounds = 2;
        wf.counters_mut().assessment_failures = 1;
        assert_eq!(wf.advance_milestone().as_deref(), Some("m2"));
        assert_eq!(wf.counters().expansion_rounds, 0);
        assert_eq!(wf.counters().assessment_failures, 0);
        assert_eq!(wf.advance_milestone(), None);
    }
}
