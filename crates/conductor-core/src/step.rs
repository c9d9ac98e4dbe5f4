use crate::agent::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a [`TaskStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for its turn (earlier steps incomplete, or no agent available).
    Pending,
    /// Blocked on a pending approval.
    WaitingApproval,
    /// Dispatched to an agent and executing.
    Running,
    /// Finished successfully.
    Completed,
    /// The capability provider reported an error.
    Failed,
    /// Deliberately skipped; does not block later steps.
    Skipped,
    /// The owning task was cancelled before this step finished.
    Cancelled,
}

impl StepStatus {
    /// Whether this state can never be left again (retry excepted).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
        )
    }

    /// Whether a later step may run past this one.
    pub fn unblocks_successors(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// One ordered unit of work within a task.
///
/// Step numbers within a task form a contiguous sequence starting at 1.
/// A step cannot transition to `running` while an earlier, non-skipped
/// step in the same task is not completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    /// Unique identifier.
    pub id: Uuid,
    /// The task this step belongs to.
    pub task_id: Uuid,
    /// 1-based position within the task, unique per task.
    pub number: u32,
    /// Short human-readable title.
    pub title: String,
    /// What this step is supposed to do.
    pub description: String,
    /// The capability an agent must declare to be eligible.
    pub required_capability: Capability,
    /// Current lifecycle state.
    pub status: StepStatus,
    /// Name of the agent this step was dispatched to; `None` until dispatch.
    pub assigned_agent: Option<String>,
    /// Whether a human approval must resolve before this step may run.
    #[serde(default)]
    pub requires_approval: bool,
    /// The approval gating this step, if one was created.
    pub approval_id: Option<Uuid>,
    /// Result payload reported by the capability provider.
    pub result: Option<serde_json::Value>,
    /// Error message, verbatim from the provider, if the step failed.
    pub error: Option<String>,
    /// When the step started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStep {
    /// Create a pending step at the given 1-based position.
    pub fn new(
        task_id: Uuid,
        number: u32,
        title: impl Into<String>,
        capability: Capability,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            number,
            title: title.into(),
            description: String::new(),
            required_capability: capability,
            status: StepStatus::Pending,
            assigned_agent: None,
            requires_approval: false,
            approval_id: None,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Flag this step as requiring human approval before it may run.
    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }
}
