use async_trait::async_trait;
use conductor_core::{Capability, ConductorResult, Workflow};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// One step of a resolved plan, before it is bound to a task.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    /// Step title.
    pub title: String,
    /// What the step does.
    pub description: String,
    /// Capability an agent must declare to execute it.
    pub capability: Capability,
    /// Whether the step is gated behind human approval.
    pub requires_approval: bool,
}

/// An ordered step sequence resolved from a goal.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The steps, in execution order.
    pub steps: Vec<PlannedStep>,
    /// The workflow template the plan was instantiated from, if any.
    pub workflow: Option<Workflow>,
}

/// Turns a free-text goal into an ordered step sequence.
///
/// The production planner (an LLM call) is an external collaborator;
/// [`CatalogPlanner`] is the in-repo implementation backed by the
/// [`WorkflowCatalog`].
#[async_trait]
pub trait Planner: Send + Sync {
    /// Resolve a goal into a plan.
    async fn plan(&self, goal: &str) -> ConductorResult<Plan>;
}

/// Stores reusable, versioned workflow templates.
pub struct WorkflowCatalog {
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl WorkflowCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Register a workflow template. A newer version replaces the stored
    /// one; an older version is ignored.
    pub async fn register(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        match workflows.get(&workflow.name) {
            Some(existing) if existing.version >= workflow.version => {
                debug!(
                    name = %workflow.name,
                    stored = existing.version,
                    offered = workflow.version,
                    "ignoring older workflow version"
                );
            }
            _ => {
                workflows.insert(workflow.name.clone(), workflow);
            }
        }
    }

    /// Look up a template by name.
    pub async fn get(&self, name: &str) -> Option<Workflow> {
        self.workflows.read().await.get(name).cloned()
    }

    /// All registered templates, sorted by name.
    pub async fn list(&self) -> Vec<Workflow> {
        let mut all: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// The first template (by name order) whose tags match the goal text.
    pub async fn match_goal(&self, goal: &str) -> Option<Workflow> {
        self.list()
            .await
            .into_iter()
            .find(|wf| wf.matches_goal(goal))
    }
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Planner backed by the workflow catalog.
///
/// Falls back to a single general-capability step when no template matches,
/// so every non-empty goal resolves to at least one step.
pub struct CatalogPlanner {
    catalog: std::sync::Arc<WorkflowCatalog>,
}

impl CatalogPlanner {
    /// Create a planner over the given catalog.
    pub fn new(catalog: std::sync::Arc<WorkflowCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Planner for CatalogPlanner {
    async fn plan(&self, goal: &str) -> ConductorResult<Plan> {
        if let Some(workflow) = self.catalog.match_goal(goal).await {
            debug!(workflow = %workflow.name, version = workflow.version, "goal matched workflow");
            let steps = workflow
                .steps
                .iter()
                .map(|t| PlannedStep {
                    title: t.name.clone(),
                    description: if t.description.is_empty() {
                        format!("{}: {}", t.name, goal)
                    } else {
                        t.description.clone()
                    },
                    capability: t.required_capability,
                    requires_approval: t.requires_approval,
                })
                .collect();
            return Ok(Plan {
                steps,
                workflow: Some(workflow),
            });
        }

        Ok(Plan {
            steps: vec![PlannedStep {
                title: "Execute goal".to_string(),
                description: goal.to_string(),
                capability: Capability::General,
                requires_approval: false,
            }],
            workflow: None,
        })
    }
}
