//! YAML plan files that seed a workflow

use std::path::Path;

use eyre::{Context, Result, eyre};
use serde::Deserialize;
use tracing::debug;

use crate::domain::{Complexity, Milestone, Task, generate_id};

use super::Workflow;

/// A request decomposed into ordered milestones and initial tasks
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PlanFile {
    pub request: String,
    pub milestones: Vec<PlanMilestone>,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PlanMilestone {
    /// Generated from the description when omitted
    #[serde(default)]
    pub id: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PlanTask {
    /// Becomes the task ID; `depends-on` entries refer to these
    pub key: String,
    /// Milestone ID
    pub milestone: String,
    pub description: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "PlanFile::load: called");
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read plan file: {}", path.display()))?;
        Self::parse(&content).context(format!("Invalid plan file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let plan: Self = serde_yaml::from_str(content).context("Failed to parse plan YAML")?;
        if plan.request.trim().is_empty() {
            return Err(eyre!("Plan request must not be empty"));
        }
        Ok(plan)
    }

    /// Build a workflow, inserting tasks in file order
    ///
    /// A task may only depend on tasks listed before it; anything else is
    /// reported as an unknown dependency. Dependencies must also sit in the
    /// same or an earlier milestone.
    pub fn into_workflow(self, max_attempts: u32) -> Result<Workflow> {
        debug!(milestones = self.milestones.len(), tasks = self.tasks.len(), "into_workflow: called");
        let milestones = self
            .milestones
            .into_iter()
            .map(|m| {
                let id = m.id.unwrap_or_else(|| generate_id("ms", &m.description));
                Milestone::with_id(id, m.description)
            })
            .collect();

        let mut workflow = Workflow::new(self.request, milestones, max_attempts)?;

        for plan_task in self.tasks {
            let key = plan_task.key.clone();
            check_milestone_order(&workflow, &plan_task)?;
            let task = plan_task
                .depends_on
                .into_iter()
                .fold(Task::with_id(plan_task.key, plan_task.milestone, plan_task.description), |t, dep| {
                    t.depends_on(dep)
                })
                .with_outcome(plan_task.outcome)
                .with_tags(plan_task.tags)
                .with_complexity(plan_task.complexity);

            workflow
                .add_task(task)
                .context(format!("Plan task '{}' rejected", key))?;
        }

        Ok(workflow)
    }
}

/// Milestones run in order, so a dependency on a later milestone's task can
/// never complete before the dependent is selected
fn check_milestone_order(workflow: &Workflow, plan_task: &PlanTask) -> Result<()> {
    let Some(own) = workflow.registry().get(&plan_task.milestone) else {
        return Ok(());
    };
    for dep in &plan_task.depends_on {
        let Some(dep_milestone) = workflow
            .graph()
            .get(dep)
            .and_then(|t| workflow.registry().get(&t.milestone))
        else {
            continue;
        };
        if dep_milestone.ordinal > own.ordinal {
            return Err(eyre!(
                "Plan task '{}' in milestone '{}' depends on '{}' in later milestone '{}'",
                plan_task.key,
                own.id,
                dep,
                dep_milestone.id
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;

    const PLAN: &str = r#"
request: Users can log in
milestones:
  - id: form
    description: Login form renders
  - description: Sessions persist
tasks:
  - key: route
    milestone: form
    description: Add /login route
    outcome: GET /login returns 200
    complexity: simple
  - key: template
    milestone: form
    description: Render the form
    depends-on: [route]
"#;

    #[test]
    fn test_parse_and_build() {
        let workflow = PlanFile::parse(PLAN).unwrap().into_workflow(3).unwrap();

        assert_eq!(workflow.request, "Users can log in");
        assert_eq!(workflow.registry().milestones().len(), 2);
        assert_eq!(workflow.active_milestone().unwrap().id, "form");
        assert!(workflow.registry().milestones()[1].id.contains("-ms-sessions-persist"));

        let route = workflow.graph().get("route").unwrap();
        assert_eq!(route.status, TaskStatus::Ready);
        assert_eq!(route.complexity, Complexity::Simple);
        assert_eq!(workflow.graph().get("template").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_forward_reference_rejected() {
        let plan = r#"
request: r
milestones:
  - id: m
    description: d
tasks:
  - key: a
    milestone: m
    description: A
    depends-on: [b]
  - key: b
    milestone: m
    description: B
"#;
        let err = PlanFile::parse(plan).unwrap().into_workflow(3).unwrap_err();
        assert!(err.chain().any(|cause| cause.to_string().contains("unknown task 'b'")));
    }

    #[test]
    fn test_dependency_on_later_milestone_rejected() {
        let plan = r#"
request: r
milestones:
  - id: m1
    description: First
  - id: m2
    description: Second
tasks:
  - key: later
    milestone: m2
    description: Later work
  - key: early
    milestone: m1
    description: Early work
    depends-on: [later]
"#;
        let err = PlanFile::parse(plan).unwrap().into_workflow(3).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'early'"), "{}", message);
        assert!(message.contains("later milestone 'm2'"), "{}", message);
    }

    #[test]
    fn test_dependency_on_earlier_milestone_accepted() {
        let plan = r#"
request: r
milestones:
  - id: m1
    description: First
  - id: m2
    description: Second
tasks:
  - key: base
    milestone: m1
    description: Base work
  - key: follow
    milestone: m2
    description: Follow-up
    depends-on: [base]
"#;
        let workflow = PlanFile::parse(plan).unwrap().into_workflow(3).unwrap();
        assert_eq!(workflow.graph().get("follow").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let plan = "request: r\nmilestones: []\npriority: high\n";
        assert!(PlanFile::parse(plan).is_err());
    }

    #[test]
    fn test_empty_milestones_rejected() {
        let plan = PlanFile::parse("request: r\nmilestones: []\n").unwrap();
        assert!(plan.into_workflow(3).is_err());
    }
}
