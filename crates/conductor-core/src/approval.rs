use crate::task::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// What kind of action an approval gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// Sign-off on running a whole task (coarse pre-check).
    TaskExecution,
    /// Sign-off on a single sensitive workflow step.
    WorkflowStep,
    /// Sign-off on accessing a protected resource.
    ResourceAccess,
    /// Sign-off on a deployment.
    Deployment,
}

/// Resolution state of an [`Approval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting a human decision.
    Pending,
    /// A reviewer approved; the gated step may proceed.
    Approved,
    /// A reviewer rejected; the gated step and its task fail.
    Rejected,
    /// `expires_at` passed without a decision; treated like a rejection.
    Expired,
    /// The owning task was cancelled; a late human decision is a no-op.
    Cancelled,
}

impl ApprovalStatus {
    /// Whether the approval can still be resolved by a human.
    pub fn is_actionable(&self) -> bool {
        matches!(self, ApprovalStatus::Pending)
    }
}

/// A gate instance tied to a task and optionally a specific step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    /// Unique identifier.
    pub id: Uuid,
    /// The task this approval belongs to.
    pub task_id: Uuid,
    /// The specific step being gated, if step-level.
    pub step_id: Option<Uuid>,
    /// The agent (or subsystem) that requested the approval.
    pub requested_by: String,
    /// What kind of action is being gated.
    pub kind: ApprovalKind,
    /// Review priority.
    pub priority: Priority,
    /// Short human-readable title.
    pub title: String,
    /// What the reviewer is being asked to sign off on.
    pub description: String,
    /// Context snapshot for the reviewer.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Current resolution state.
    pub status: ApprovalStatus,
    /// The user who resolved the approval.
    pub approver: Option<String>,
    /// Free-text notes left by the approver.
    pub notes: Option<String>,
    /// When the approval was created.
    pub created_at: DateTime<Utc>,
    /// When the approval was resolved (approved/rejected/expired/cancelled).
    pub resolved_at: Option<DateTime<Utc>>,
    /// When a pending approval stops being actionable.
    pub expires_at: DateTime<Utc>,
}

impl Approval {
    /// Create a pending approval expiring after `ttl`.
    pub fn new(
        task_id: Uuid,
        step_id: Option<Uuid>,
        kind: ApprovalKind,
        title: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            step_id,
            requested_by: "scheduler".to_string(),
            kind,
            priority: Priority::Normal,
            title: title.into(),
            description: String::new(),
            context: HashMap::new(),
            status: ApprovalStatus::Pending,
            approver: None,
            notes: None,
            created_at: now,
            resolved_at: None,
            expires_at: now + ttl,
        }
    }

    /// Set the description shown to the reviewer.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the review priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this pending approval is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now > self.expires_at
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_creation() {
        let task_id = Uuid::new_v4();
        let approval = Approval::new(
            task_id,
            None,
            ApprovalKind::Deployment,
            "Deploy to production",
            chrono::Duration::minutes(30),
        )
        .with_priority(Priority::High);

        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert!(approval.status.is_actionable());
        assert_eq!(approval.task_id, task_id);
        assert!(approval.expires_at > approval.created_at);
    }

    #[test]
    fn test_expiry_check() {
        let approval = Approval::new(
            Uuid::new_v4(),
            None,
            ApprovalKind::WorkflowStep,
            "Sensitive step",
            chrono::Duration::seconds(1),
        );
        assert!(!approval.is_expired_at(Utc::now()));
        assert!(approval.is_expired_at(Utc::now() + chrono::Duration::seconds(2)));
    }

    #[test]
    fn test_resolved_approval_never_expires() {
        let mut approval = Approval::new(
            Uuid::new_v4(),
            None,
            ApprovalKind::ResourceAccess,
            "Access prod DB",
            chrono::Duration::seconds(1),
        );
        approval.status = ApprovalStatus::Approved;
        assert!(!approval.is_expired_at(Utc::now() + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_terminal_states_not_actionable() {
        for status in [
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Expired,
            ApprovalStatus::Cancelled,
        ] {
            assert!(!status.is_actionable());
        }
    }
}
