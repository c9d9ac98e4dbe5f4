use crate::agent::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One step of a reusable workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepTemplate {
    /// Step name, used as the instantiated step's title.
    pub name: String,
    /// Capability an agent must declare to execute this step.
    pub required_capability: Capability,
    /// What the step does.
    #[serde(default)]
    pub description: String,
    /// Whether instantiated steps are gated behind human approval.
    #[serde(default)]
    pub requires_approval: bool,
}

/// A named, versioned template for a linear step sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Catalog name, unique per version.
    pub name: String,
    /// Template version.
    pub version: u32,
    /// What kind of goals this workflow covers.
    #[serde(default)]
    pub description: String,
    /// Keywords matched against incoming goals.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ordered step templates.
    pub steps: Vec<WorkflowStepTemplate>,
}

impl Workflow {
    /// Create an empty version-1 workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            description: String::new(),
            tags: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Append a step template.
    pub fn with_step(mut self, step: WorkflowStepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the matching tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whether any tag of this workflow occurs in the goal text.
    pub fn matches_goal(&self, goal: &str) -> bool {
        let goal = goal.to_lowercase();
        self.tags.iter().any(|t| goal.contains(&t.to_lowercase()))
    }
}

/// A runtime instance binding a [`Workflow`] template to a concrete task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier.
    pub id: Uuid,
    /// Name of the instantiated template.
    pub workflow_name: String,
    /// Version of the instantiated template.
    pub workflow_version: u32,
    /// The task the template was instantiated into.
    pub task_id: Uuid,
    /// Accumulated per-step results, in step order.
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the owning task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Create an execution record for a template bound to `task_id`.
    pub fn new(workflow: &Workflow, task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_name: workflow.name.clone(),
            workflow_version: workflow.version,
            task_id,
            results: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_workflow() -> Workflow {
        Workflow::new("feature-delivery")
            .with_tags(vec!["build".into(), "implement".into()])
            .with_step(WorkflowStepTemplate {
                name: "Research".into(),
                required_capability: Capability::Research,
                description: "gather requirements".into(),
                requires_approval: false,
            })
            .with_step(WorkflowStepTemplate {
                name: "Implement".into(),
                required_capability: Capability::Coding,
                description: "write the code".into(),
                requires_approval: false,
            })
            .with_step(WorkflowStepTemplate {
                name: "Deploy".into(),
                required_capability: Capability::Coding,
                description: "ship it".into(),
                requires_approval: true,
            })
    }

    #[test]
    fn test_goal_matching() {
        let wf = sample_workflow();
        assert!(wf.matches_goal("please BUILD a login page"));
        assert!(wf.matches_goal("implement feature X"));
        assert!(!wf.matches_goal("summarize this paper"));
    }

    #[test]
    fn test_execution_binding() {
        let wf = sample_workflow();
        let task_id = Uuid::new_v4();
        let exec = WorkflowExecution::new(&wf, task_id);
        assert_eq!(exec.workflow_name, "feature-delivery");
        assert_eq!(exec.workflow_version, 1);
        assert_eq!(exec.task_id, task_id);
        assert!(exec.results.is_empty());
    }

    #[test]
    fn test_workflow_serialization() {
        let wf = sample_workflow();
        let json = serde_json::to_string(&wf).unwrap();
        let parsed: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.steps.len(), 3);
        assert!(parsed.steps[2].requires_approval);
    }
}
