use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Scheduling priority of a task or approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work, scheduled last.
    Low,
    /// Default priority.
    Normal,
    /// Scheduled ahead of normal work.
    High,
    /// Requires immediate attention.
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    /// Parse a priority from its wire name. Unknown values fall back to `Normal`.
    pub fn parse_level(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Why a task ended in `failed`.
///
/// Distinguishes "human said no" from "timed out" from "execution crashed"
/// so that operators and UIs can react differently to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The capability provider reported a failure for the current step.
    ExecutionError,
    /// A human reviewer rejected the gating approval.
    ApprovalRejected,
    /// The gating approval expired before anyone resolved it.
    ApprovalExpired,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::ExecutionError => write!(f, "execution_error"),
            FailureReason::ApprovalRejected => write!(f, "approval_rejected"),
            FailureReason::ApprovalExpired => write!(f, "approval_expired"),
        }
    }
}

/// Lifecycle state of a [`Task`].
///
/// `pending → running → {completed | failed | cancelled}`, with
/// `running ⇄ paused`, `running ⇄ waiting_approval` (a sub-state entered
/// while the current step is gated), and `failed → running` on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet dispatched.
    Pending,
    /// Steps are being scheduled and executed.
    Running,
    /// Progression suspended by an operator; the in-flight step is not
    /// rolled back, only the next dispatch is withheld.
    Paused,
    /// The current step is blocked on a pending approval.
    WaitingApproval,
    /// All steps completed.
    Completed,
    /// Cancelled by an operator; terminal.
    Cancelled,
    /// A step failed or an approval was rejected/expired; retryable.
    Failed {
        /// Machine-readable reason code.
        reason: FailureReason,
    },
}

impl TaskStatus {
    /// Whether this state can never be left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed { .. }
        )
    }

    /// Whether the scheduler may dispatch the next step in this state.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::WaitingApproval)
    }
}

/// A unit of work derived from a user goal, owning an ordered step sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Short human-readable title.
    pub title: String,
    /// The original free-text goal.
    pub description: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Scheduling priority.
    pub priority: Priority,
    /// Who created the task.
    pub created_by: String,
    /// Parent task ID if this is a sub-task spawned by another task.
    #[serde(default)]
    pub parent_task: Option<Uuid>,
    /// Free-form context carried through planning and execution.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Classification tags, also used for workflow matching.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Derived completion percentage (0–100), monotonically non-decreasing
    /// while the task is not terminal.
    pub progress: u8,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the first step started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Optional soft deadline; informational, not auto-enforced.
    pub deadline: Option<DateTime<Utc>>,
    /// Last error surfaced from a failed step, verbatim.
    pub error: Option<String>,
}

impl Task {
    /// Create a new pending task from a goal.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: Priority::Normal,
            created_by: "anonymous".to_string(),
            parent_task: None,
            context: HashMap::new(),
            tags: Vec::new(),
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deadline: None,
            error: None,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the creator reference.
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.created_by = creator.into();
        self
    }

    /// Attach classification tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the soft deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
