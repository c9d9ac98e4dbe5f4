use chrono::{DateTime, Utc};
use conductor_core::{Approval, ApprovalStatus, ConductorError, ConductorResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Creates, resolves, and expires the approvals that block step progression.
///
/// The gate only owns approval records and their transitions; reacting to a
/// resolution (re-scheduling a step, failing a task) is the task manager's
/// job, so resolution handlers stay in one place.
pub struct ApprovalGate {
    approvals: RwLock<HashMap<Uuid, Approval>>,
}

impl ApprovalGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self {
            approvals: RwLock::new(HashMap::new()),
        }
    }

    /// Store a new pending approval and return it.
    pub async fn request(&self, approval: Approval) -> Approval {
        info!(
            approval_id = %approval.id,
            task_id = %approval.task_id,
            kind = ?approval.kind,
            "approval requested"
        );
        self.approvals
            .write()
            .await
            .insert(approval.id, approval.clone());
        approval
    }

    /// Look up an approval.
    pub async fn get(&self, id: Uuid) -> Option<Approval> {
        self.approvals.read().await.get(&id).cloned()
    }

    /// Resolve a pending approval to approved or rejected.
    ///
    /// Fails for unknown ids and for approvals no longer actionable, so a
    /// late human response to an expired or cancelled approval is an
    /// explicit error rather than a silent state revival.
    pub async fn resolve(
        &self,
        id: Uuid,
        approved: bool,
        approver: &str,
        notes: Option<String>,
    ) -> ConductorResult<Approval> {
        let mut approvals = self.approvals.write().await;
        let approval = approvals
            .get_mut(&id)
            .ok_or_else(|| ConductorError::NotFound(format!("approval {id}")))?;
        if !approval.status.is_actionable() {
            return Err(ConductorError::Approval(format!(
                "approval {id} is already {:?}",
                approval.status
            )));
        }
        approval.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        approval.approver = Some(approver.to_string());
        approval.notes = notes;
        approval.resolved_at = Some(Utc::now());
        info!(approval_id = %id, approved, approver, "approval resolved");
        Ok(approval.clone())
    }

    /// Transition every pending approval past its expiry to `expired`.
    ///
    /// Returns the newly expired approvals so the caller can fail the
    /// linked steps and tasks.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Approval> {
        let mut approvals = self.approvals.write().await;
        let mut expired = Vec::new();
        for approval in approvals.values_mut() {
            if approval.is_expired_at(now) {
                approval.status = ApprovalStatus::Expired;
                approval.resolved_at = Some(now);
                warn!(approval_id = %approval.id, task_id = %approval.task_id, "approval expired");
                expired.push(approval.clone());
            }
        }
        expired
    }

    /// Cancel a single pending approval.
    ///
    /// Used when the step an approval was created for could not be parked
    /// on it (the task was cancelled in between); the record would
    /// otherwise linger as pending until TTL expiry. A no-op for unknown
    /// or already-resolved approvals.
    pub async fn cancel(&self, id: Uuid) {
        let mut approvals = self.approvals.write().await;
        if let Some(approval) = approvals.get_mut(&id) {
            if approval.status.is_actionable() {
                approval.status = ApprovalStatus::Cancelled;
                approval.resolved_at = Some(Utc::now());
            }
        }
    }

    /// Cancel every pending approval of a task.
    ///
    /// Used when the task is cancelled: the approvals become terminal and
    /// non-actionable, so a late human response is a no-op instead of
    /// reviving a dead task.
    pub async fn cancel_for_task(&self, task_id: Uuid) -> Vec<Uuid> {
        let mut approvals = self.approvals.write().await;
        let mut cancelled = Vec::new();
        for approval in approvals.values_mut() {
            if approval.task_id == task_id && approval.status.is_actionable() {
                approval.status = ApprovalStatus::Cancelled;
                approval.resolved_at = Some(Utc::now());
                cancelled.push(approval.id);
            }
        }
        cancelled
    }

    /// All approvals still awaiting a decision, oldest first.
    pub async fn pending(&self) -> Vec<Approval> {
        let mut pending: Vec<Approval> = self
            .approvals
            .read()
            .await
            .values()
            .filter(|a| a.status.is_actionable())
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.created_at);
        pending
    }

    /// Number of approvals awaiting a decision.
    pub async fn pending_count(&self) -> usize {
        self.approvals
            .read()
            .await
            .values()
            .filter(|a| a.status.is_actionable())
            .count()
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}
