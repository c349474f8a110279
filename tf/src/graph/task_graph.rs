//! TaskGraph - owned dependency graph of tasks
//!
//! The graph is the only place task status changes. It keeps `blocks` in sync
//! with `depends_on`, refuses edges that would close a cycle, promotes
//! dependents when a task completes and cascades Blocked when one fails.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Stage, Task, TaskStatus};

use super::error::GraphError;

/// Per-status task counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStatistics {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub in_progress: usize,
    pub complete: usize,
    pub failed: usize,
    pub blocked: usize,
    pub deferred: usize,
    /// Retry budget consumed across all tasks
    pub total_attempts: u64,
}

/// Dependency graph of tasks, keyed by task ID
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: HashMap<String, Task>,
    /// Insertion order, the final ready-set tie-breaker
    order: Vec<String>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// All tasks in insertion order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Tasks owned by a milestone, in insertion order
    pub fn milestone_tasks<'a>(&'a self, milestone: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks().filter(move |t| t.milestone == milestone)
    }

    /// Insert a task and its dependency edges
    ///
    /// All checks run before anything is mutated, so a rejected task leaves the
    /// graph exactly as it was. Returns the status the task was given.
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskStatus, GraphError> {
        debug!(task_id = %task.id, deps = ?task.depends_on, "add_task: called");

        if task.depends_on.contains(&task.id) {
            return Err(GraphError::CycleDetected {
                task: task.id.clone(),
                path: vec![task.id.clone(), task.id.clone()],
            });
        }

        if let Some(missing) = task.depends_on.iter().find(|dep| !self.tasks.contains_key(*dep)) {
            return Err(GraphError::UnknownDependency {
                task: task.id.clone(),
                dependency: missing.clone(),
            });
        }

        if let Some(path) = self.find_dependency_path(&task.depends_on, &task.id) {
            warn!(task_id = %task.id, ?path, "add_task: rejected, edge would close a cycle");
            return Err(GraphError::CycleDetected {
                task: task.id.clone(),
                path,
            });
        }

        if self.tasks.contains_key(&task.id) {
            return Err(GraphError::DuplicateTask(task.id.clone()));
        }

        let status = self.initial_status(&task.depends_on);
        task.blocks.clear();
        task.set_status(status);

        for dep in &task.depends_on {
            if let Some(dep_task) = self.tasks.get_mut(dep) {
                dep_task.blocks.insert(task.id.clone());
            }
        }

        debug!(task_id = %task.id, %status, "add_task: inserted");
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        Ok(status)
    }

    /// Ready tasks sorted by the scheduling order
    ///
    /// Order: most direct dependents first, then earlier creation iteration,
    /// earlier creation timestamp, lower complexity, earlier insertion.
    pub fn get_ready_tasks(&self, milestone: Option<&str>) -> Vec<&Task> {
        let mut ready: Vec<(usize, &Task)> = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(seq, id)| self.tasks.get(id).map(|t| (seq, t)))
            .filter(|(_, t)| milestone.is_none_or(|m| t.milestone == m))
            .filter(|(_, t)| self.is_ready(t))
            .collect();

        ready.sort_by_key(|(seq, t)| {
            (
                Reverse(t.blocks.len()),
                t.created_iteration,
                t.created_at,
                t.complexity,
                *seq,
            )
        });

        ready.into_iter().map(|(_, t)| t).collect()
    }

    /// Move a ready task to InProgress
    ///
    /// A task already InProgress (resumed from a checkpoint) is accepted as is.
    pub fn begin(&mut self, id: &str) -> Result<Stage, GraphError> {
        debug!(%id, "begin: called");
        let task = self.tasks.get(id).ok_or_else(|| GraphError::TaskNotFound(id.to_string()))?;

        match task.status {
            TaskStatus::InProgress => {}
            status if status.is_open() => {
                if !self.dependencies_complete(task) {
                    return Err(GraphError::NotReady(id.to_string()));
                }
            }
            status => {
                return Err(GraphError::InvalidTransition {
                    task: id.to_string(),
                    from: status,
                    to: TaskStatus::InProgress,
                });
            }
        }

        let task = self.task_mut(id)?;
        task.set_status(TaskStatus::InProgress);
        Ok(*task.current_stage.get_or_insert(Stage::GapAnalysis))
    }

    /// Record the next stage an InProgress task will run
    pub fn set_stage(&mut self, id: &str, stage: Stage) -> Result<(), GraphError> {
        let task = self.in_progress_mut(id)?;
        task.current_stage = Some(stage);
        Ok(())
    }

    /// Store a successful stage's payload on the task
    pub fn record_artifact(&mut self, id: &str, stage: Stage, payload: &str) -> Result<(), GraphError> {
        let task = self.in_progress_mut(id)?;
        task.artifacts.record(stage, payload);
        Ok(())
    }

    /// Consume one attempt from the task's shared budget
    ///
    /// Returns the attempt count after the increment.
    pub fn record_failure(&mut self, id: &str, stage: Stage, reason: &str) -> Result<u32, GraphError> {
        let task = self.in_progress_mut(id)?;
        task.attempt_count += 1;
        task.last_failure_stage = Some(stage);
        task.last_failure_reason = Some(reason.to_string());
        debug!(%id, %stage, attempts = task.attempt_count, max = task.max_attempts, "record_failure: attempt consumed");
        Ok(task.attempt_count)
    }

    /// Mark a task Complete and promote dependents whose dependencies are now met
    ///
    /// Returns the IDs promoted to Ready.
    pub fn mark_complete(&mut self, id: &str) -> Result<Vec<String>, GraphError> {
        debug!(%id, "mark_complete: called");
        let task = self.tasks.get(id).ok_or_else(|| GraphError::TaskNotFound(id.to_string()))?;

        match task.status {
            TaskStatus::Complete => return Ok(Vec::new()),
            TaskStatus::InProgress => {}
            status if status.is_open() => {
                if !self.dependencies_complete(task) {
                    return Err(GraphError::NotReady(id.to_string()));
                }
            }
            status => {
                return Err(GraphError::InvalidTransition {
                    task: id.to_string(),
                    from: status,
                    to: TaskStatus::Complete,
                });
            }
        }

        let dependents: Vec<String> = task.blocks.iter().cloned().collect();
        let task = self.task_mut(id)?;
        task.set_status(TaskStatus::Complete);
        task.current_stage = None;

        let mut promoted = Vec::new();
        for dep_id in dependents {
            let promote = self
                .tasks
                .get(&dep_id)
                .is_some_and(|t| t.status == TaskStatus::Pending && self.dependencies_complete(t));
            if !promote {
                continue;
            }
            if let Some(dependent) = self.tasks.get_mut(&dep_id) {
                dependent.set_status(TaskStatus::Ready);
                promoted.push(dep_id);
            }
        }

        info!(%id, ?promoted, "Task complete");
        Ok(promoted)
    }

    /// Mark a task Failed and block every transitive dependent
    ///
    /// Dependents that are already terminal are left as they are. Returns the
    /// IDs newly set to Blocked, in breadth-first order.
    pub fn mark_failed(&mut self, id: &str, reason: &str, stage: Stage) -> Result<Vec<String>, GraphError> {
        debug!(%id, %reason, %stage, "mark_failed: called");
        let task = self.tasks.get(id).ok_or_else(|| GraphError::TaskNotFound(id.to_string()))?;

        match task.status {
            TaskStatus::Failed => return Ok(Vec::new()),
            TaskStatus::InProgress => {}
            status if status.is_open() => {}
            status => {
                return Err(GraphError::InvalidTransition {
                    task: id.to_string(),
                    from: status,
                    to: TaskStatus::Failed,
                });
            }
        }

        let task = self.task_mut(id)?;
        task.set_status(TaskStatus::Failed);
        task.last_failure_stage = Some(stage);
        task.last_failure_reason = Some(reason.to_string());
        task.current_stage = None;

        let blocked = self.cascade(id, TaskStatus::Blocked);
        warn!(%id, %reason, %stage, blocked = blocked.len(), "Task failed");
        Ok(blocked)
    }

    /// Set aside a task that has not started, and every open dependent of it
    ///
    /// Returns the dependents deferred along with it.
    pub fn defer(&mut self, id: &str, reason: &str) -> Result<Vec<String>, GraphError> {
        debug!(%id, %reason, "defer: called");
        let task = self.task_mut(id)?;

        match task.status {
            TaskStatus::Deferred => return Ok(Vec::new()),
            status if status.is_open() || status == TaskStatus::Blocked => {}
            status => {
                return Err(GraphError::InvalidTransition {
                    task: id.to_string(),
                    from: status,
                    to: TaskStatus::Deferred,
                });
            }
        }

        task.set_status(TaskStatus::Deferred);
        task.last_failure_reason = Some(reason.to_string());

        let deferred = self.cascade(id, TaskStatus::Deferred);
        info!(%id, cascaded = deferred.len(), "Task deferred");
        Ok(deferred)
    }

    /// True when every task of the milestone is Complete, Failed or Deferred
    pub fn is_milestone_complete(&self, milestone: &str) -> bool {
        self.milestone_tasks(milestone).all(|t| t.status.is_final())
    }

    /// Number of not-yet-started tasks in a milestone (ready or waiting)
    pub fn open_count(&self, milestone: &str) -> usize {
        self.milestone_tasks(milestone).filter(|t| t.status.is_open()).count()
    }

    /// True when every known task is in a final state
    pub fn all_final(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_final())
    }

    pub fn get_statistics(&self) -> GraphStatistics {
        let mut stats = GraphStatistics {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            stats.total_attempts += u64::from(task.attempt_count);
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Ready => stats.ready += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Complete => stats.complete += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Blocked => stats.blocked += 1,
                TaskStatus::Deferred => stats.deferred += 1,
            }
        }
        stats
    }

    /// Plain task records in insertion order, for checkpoints
    pub fn serialize(&self) -> Vec<Task> {
        self.tasks().cloned().collect()
    }

    /// Rebuild a graph from checkpoint records
    ///
    /// Rejects duplicate IDs, unknown dependencies, reverse edges that do not
    /// match `depends_on`, and cycles.
    pub fn deserialize(records: Vec<Task>) -> Result<Self, GraphError> {
        debug!(count = records.len(), "deserialize: called");
        let mut graph = Self::new();

        for task in records {
            if graph.tasks.contains_key(&task.id) {
                return Err(GraphError::DuplicateTask(task.id));
            }
            graph.order.push(task.id.clone());
            graph.tasks.insert(task.id.clone(), task);
        }

        let mut expected: HashMap<&str, BTreeSet<String>> =
            graph.tasks.keys().map(|id| (id.as_str(), BTreeSet::new())).collect();
        for task in graph.tasks.values() {
            for dep in &task.depends_on {
                match expected.get_mut(dep.as_str()) {
                    Some(blocks) => {
                        blocks.insert(task.id.clone());
                    }
                    None => {
                        return Err(GraphError::UnknownDependency {
                            task: task.id.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        for task in graph.tasks.values() {
            if expected.get(task.id.as_str()) != Some(&task.blocks) {
                return Err(GraphError::Inconsistent(format!(
                    "blocks of '{}' do not match the tasks depending on it",
                    task.id
                )));
            }
        }

        graph.validate_acyclic()?;
        Ok(graph)
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut Task, GraphError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| GraphError::TaskNotFound(id.to_string()))
    }

    fn in_progress_mut(&mut self, id: &str) -> Result<&mut Task, GraphError> {
        let task = self.task_mut(id)?;
        if task.status != TaskStatus::InProgress {
            return Err(GraphError::InvalidTransition {
                task: id.to_string(),
                from: task.status,
                to: TaskStatus::InProgress,
            });
        }
        Ok(task)
    }

    fn is_ready(&self, task: &Task) -> bool {
        task.status.is_open() && self.dependencies_complete(task)
    }

    fn dependencies_complete(&self, task: &Task) -> bool {
        task.depends_on
            .iter()
            .all(|dep| self.tasks.get(dep).is_some_and(|d| d.status == TaskStatus::Complete))
    }

    fn initial_status(&self, deps: &BTreeSet<String>) -> TaskStatus {
        let statuses: Vec<TaskStatus> = deps.iter().filter_map(|d| self.tasks.get(d)).map(|d| d.status).collect();
        if statuses.iter().any(|s| matches!(s, TaskStatus::Failed | TaskStatus::Blocked)) {
            TaskStatus::Blocked
        } else if statuses.contains(&TaskStatus::Deferred) {
            TaskStatus::Deferred
        } else if statuses.iter().all(|s| *s == TaskStatus::Complete) {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        }
    }

    /// Breadth-first walk over `blocks` from `root`, moving every open (and, for
    /// deferral, blocked) dependent to `status`
    fn cascade(&mut self, root: &str, status: TaskStatus) -> Vec<String> {
        let mut changed = Vec::new();
        let mut queue: VecDeque<String> = self
            .tasks
            .get(root)
            .map(|t| t.blocks.iter().cloned().collect())
            .unwrap_or_default();
        let mut seen: HashSet<String> = queue.iter().cloned().collect();

        while let Some(current) = queue.pop_front() {
            let Some(task) = self.tasks.get_mut(&current) else {
                continue;
            };

            let movable = task.status.is_open() || (status == TaskStatus::Deferred && task.status == TaskStatus::Blocked);
            if movable {
                task.set_status(status);
                changed.push(current.clone());
            }

            for next in &task.blocks {
                if seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }

        changed
    }

    /// Path over `depends_on` edges from any of `starts` to `target`, returned
    /// as `target -> start -> ... -> target`
    fn find_dependency_path(&self, starts: &BTreeSet<String>, target: &str) -> Option<Vec<String>> {
        let mut parents: HashMap<String, String> = HashMap::new();
        let mut seen: HashSet<String> = starts.iter().cloned().collect();
        let mut queue: VecDeque<String> = starts.iter().cloned().collect();

        while let Some(current) = queue.pop_front() {
            if current == target {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(parent) = parents.get(&cursor) {
                    path.push(parent.clone());
                    cursor = parent.clone();
                }
                path.push(target.to_string());
                path.reverse();
                return Some(path);
            }

            if let Some(task) = self.tasks.get(&current) {
                for dep in &task.depends_on {
                    if seen.insert(dep.clone()) {
                        parents.insert(dep.clone(), current.clone());
                        queue.push_back(dep.clone());
                    }
                }
            }
        }

        None
    }

    /// Whole-graph cycle check, used when loading records that bypassed `add_task`
    fn validate_acyclic(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut cycle_path = Vec::new();

        for id in &self.order {
            if !visited.contains(id.as_str())
                && self.has_cycle_dfs(id, &mut visited, &mut rec_stack, &mut cycle_path)
            {
                return Err(GraphError::CycleDetected {
                    task: id.clone(),
                    path: cycle_path,
                });
            }
        }

        Ok(())
    }

    fn has_cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        cycle_path: &mut Vec<String>,
    ) -> bool {
        visited.insert(node);
        rec_stack.insert(node);
        cycle_path.push(node.to_string());

        if let Some(task) = self.tasks.get(node) {
            for dep in &task.depends_on {
                if !visited.contains(dep.as_str()) {
                    if self.has_cycle_dfs(dep, visited, rec_stack, cycle_path) {
                        return true;
                    }
                } else if rec_stack.contains(dep.as_str()) {
                    cycle_path.push(dep.clone());
                    return true;
                }
            }
        }

        rec_stack.remove(node);
        cycle_path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        deps.iter()
            .fold(Task::with_id(id, "m1", format!("Task {}", id)), |t, d| t.depends_on(*d))
    }

    fn status(graph: &TaskGraph, id: &str) -> TaskStatus {
        graph.get(id).unwrap().status
    }

    fn ready_ids(graph: &TaskGraph) -> Vec<String> {
        graph.get_ready_tasks(None).iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn test_add_sets_initial_status_and_reverse_edges() {
        let mut graph = TaskGraph::new();
        assert_eq!(graph.add_task(task("a", &[])).unwrap(), TaskStatus::Ready);
        assert_eq!(graph.add_task(task("b", &["a"])).unwrap(), TaskStatus::Pending);

        assert!(graph.get("a").unwrap().blocks.contains("b"));
        assert!(graph.get("b").unwrap().blocks.is_empty());
    }

    #[test]
    fn test_ready_then_complete_promotes_dependent() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        assert_eq!(ready_ids(&graph), vec!["a"]);

        let promoted = graph.mark_complete("a").unwrap();
        assert_eq!(promoted, vec!["b"]);
        assert_eq!(ready_ids(&graph), vec!["b"]);
    }

    #[test]
    fn test_complete_waits_for_all_dependencies() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &[])).unwrap();
        graph.add_task(task("c", &["a", "b"])).unwrap();

        assert!(graph.mark_complete("a").unwrap().is_empty());
        assert_eq!(status(&graph, "c"), TaskStatus::Pending);
        assert_eq!(graph.mark_complete("b").unwrap(), vec!["c"]);
    }

    #[test]
    fn test_failure_cascades_through_chain() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        graph.add_task(task("c", &["b"])).unwrap();

        let blocked = graph.mark_failed("a", "x", Stage::Implement).unwrap();
        assert_eq!(blocked, vec!["b", "c"]);
        assert_eq!(status(&graph, "a"), TaskStatus::Failed);
        assert_eq!(status(&graph, "b"), TaskStatus::Blocked);
        assert_eq!(status(&graph, "c"), TaskStatus::Blocked);

        let a = graph.get("a").unwrap();
        assert_eq!(a.last_failure_stage, Some(Stage::Implement));
        assert_eq!(a.last_failure_reason.as_deref(), Some("x"));
    }

    #[test]
    fn test_failure_leaves_ancestors_and_siblings_alone() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("root", &[])).unwrap();
        graph.mark_complete("root").unwrap();
        graph.add_task(task("mid", &["root"])).unwrap();
        graph.add_task(task("sibling", &["root"])).unwrap();
        graph.add_task(task("leaf", &["mid"])).unwrap();

        graph.mark_failed("mid", "broken", Stage::Validate).unwrap();
        assert_eq!(status(&graph, "root"), TaskStatus::Complete);
        assert_eq!(status(&graph, "sibling"), TaskStatus::Ready);
        assert_eq!(status(&graph, "leaf"), TaskStatus::Blocked);
    }

    #[test]
    fn test_mark_failed_is_idempotent() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        graph.mark_failed("a", "x", Stage::Plan).unwrap();
        assert!(graph.mark_failed("a", "x", Stage::Plan).unwrap().is_empty());
        assert_eq!(status(&graph, "b"), TaskStatus::Blocked);
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("c", &["a"])).unwrap();
        let before = graph.serialize();

        let err = graph.add_task(task("a", &["c"])).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { ref path, .. } if path == &["a", "c", "a"]));

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.serialize(), before);
        assert_eq!(graph.get("a").unwrap().blocks.len(), 1);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut graph = TaskGraph::new();
        let err = graph.add_task(task("a", &["a"])).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        let err = graph.add_task(task("b", &["a", "ghost"])).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                task: "b".to_string(),
                dependency: "ghost".to_string()
            }
        );
        assert!(graph.get("a").unwrap().blocks.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        assert_eq!(
            graph.add_task(task("a", &[])).unwrap_err(),
            GraphError::DuplicateTask("a".to_string())
        );
    }

    #[test]
    fn test_task_added_under_failed_dependency_is_blocked() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.mark_failed("a", "x", Stage::Implement).unwrap();
        assert_eq!(graph.add_task(task("b", &["a"])).unwrap(), TaskStatus::Blocked);
    }

    #[test]
    fn test_ready_order_prefers_impact() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("low", &[])).unwrap();
        graph.add_task(task("high", &[])).unwrap();
        graph.add_task(task("x", &["high"])).unwrap();
        graph.add_task(task("y", &["high"])).unwrap();
        graph.add_task(task("z", &["low"])).unwrap();

        assert_eq!(ready_ids(&graph), vec!["high", "low"]);
    }

    #[test]
    fn test_ready_order_tie_breakers() {
        let mut graph = TaskGraph::new();
        graph
            .add_task(task("late-iter", &[]).with_iteration(2).with_created_at(1))
            .unwrap();
        graph
            .add_task(task("late-time", &[]).with_iteration(1).with_created_at(50))
            .unwrap();
        graph
            .add_task(
                task("complex", &[])
                    .with_iteration(1)
                    .with_created_at(10)
                    .with_complexity(crate::domain::Complexity::Complex),
            )
            .unwrap();
        graph
            .add_task(
                task("simple", &[])
                    .with_iteration(1)
                    .with_created_at(10)
                    .with_complexity(crate::domain::Complexity::Simple),
            )
            .unwrap();
        graph
            .add_task(
                task("simple-2", &[])
                    .with_iteration(1)
                    .with_created_at(10)
                    .with_complexity(crate::domain::Complexity::Simple),
            )
            .unwrap();

        assert_eq!(
            ready_ids(&graph),
            vec!["simple", "simple-2", "complex", "late-time", "late-iter"]
        );
    }

    #[test]
    fn test_ready_filter_by_milestone() {
        let mut graph = TaskGraph::new();
        graph.add_task(Task::with_id("a", "m1", "A")).unwrap();
        graph.add_task(Task::with_id("b", "m2", "B")).unwrap();
        let ids: Vec<&str> = graph.get_ready_tasks(Some("m2")).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn test_begin_requires_readiness() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();

        assert_eq!(graph.begin("b").unwrap_err(), GraphError::NotReady("b".to_string()));
        assert_eq!(graph.begin("a").unwrap(), Stage::GapAnalysis);
        assert_eq!(status(&graph, "a"), TaskStatus::InProgress);
        assert!(ready_ids(&graph).is_empty());

        // Resuming an in-progress task keeps its stage
        graph.set_stage("a", Stage::Validate).unwrap();
        assert_eq!(graph.begin("a").unwrap(), Stage::Validate);
    }

    #[test]
    fn test_record_failure_counts_attempts() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        assert!(graph.record_failure("a", Stage::Validate, "tests fail").is_err());

        graph.begin("a").unwrap();
        assert_eq!(graph.record_failure("a", Stage::Validate, "tests fail").unwrap(), 1);
        assert_eq!(graph.record_failure("a", Stage::Plan, "bad plan").unwrap(), 2);
        let a = graph.get("a").unwrap();
        assert_eq!(a.last_failure_stage, Some(Stage::Plan));
        assert_eq!(a.last_failure_reason.as_deref(), Some("bad plan"));
    }

    #[test]
    fn test_complete_rejected_after_failure() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.mark_failed("a", "x", Stage::Plan).unwrap();
        assert!(matches!(
            graph.mark_complete("a").unwrap_err(),
            GraphError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_milestone_complete_counts_final_states() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &[])).unwrap();
        graph.add_task(task("c", &[])).unwrap();
        assert!(!graph.is_milestone_complete("m1"));

        graph.mark_complete("a").unwrap();
        graph.mark_complete("b").unwrap();
        graph.mark_failed("c", "x", Stage::Implement).unwrap();
        assert!(graph.is_milestone_complete("m1"));
        assert!(graph.is_milestone_complete("empty"));
    }

    #[test]
    fn test_blocked_task_keeps_milestone_open_until_deferred() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        graph.add_task(task("c", &["b"])).unwrap();
        graph.mark_failed("a", "x", Stage::Implement).unwrap();
        assert!(!graph.is_milestone_complete("m1"));

        let cascaded = graph.defer("b", "superseded").unwrap();
        assert_eq!(cascaded, vec!["c"]);
        assert!(graph.is_milestone_complete("m1"));
    }

    #[test]
    fn test_statistics() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        graph.begin("a").unwrap();
        graph.record_failure("a", Stage::Plan, "x").unwrap();

        let stats = graph.get_statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total_attempts, 1);
    }

    #[test]
    fn test_serialize_roundtrip_preserves_order() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("z", &[])).unwrap();
        graph.add_task(task("a", &["z"])).unwrap();

        let restored = TaskGraph::deserialize(graph.serialize()).unwrap();
        let ids: Vec<&str> = restored.tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
        assert_eq!(restored.get_ready_tasks(None).len(), 1);
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_blocks() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a", &[])).unwrap();
        graph.add_task(task("b", &["a"])).unwrap();
        let mut records = graph.serialize();
        records[0].blocks.clear();

        assert!(matches!(
            TaskGraph::deserialize(records).unwrap_err(),
            GraphError::Inconsistent(_)
        ));
    }

    #[test]
    fn test_deserialize_rejects_cycle() {
        let mut a = task("a", &["b"]);
        let mut b = task("b", &["a"]);
        a.blocks.insert("b".to_string());
        b.blocks.insert("a".to_string());

        assert!(matches!(
            TaskGraph::deserialize(vec![a, b]).unwrap_err(),
            GraphError::CycleDetected { .. }
        ));
    }
}
