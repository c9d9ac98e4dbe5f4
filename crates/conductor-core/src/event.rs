use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The type key of a [`MonitoringEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EventKind {
    TaskCreated,
    TaskStarted,
    TaskPaused,
    TaskResumed,
    TaskCancelled,
    TaskCompleted,
    TaskFailed,
    TaskRetried,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepWaitingApproval,
    ApprovalRequested,
    ApprovalResolved,
    ApprovalExpired,
    AgentRegistered,
    AgentDeregistered,
    AgentStatusChanged,
}

/// Severity of a monitoring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine transition.
    Info,
    /// Degraded but recoverable condition.
    Warning,
    /// A failure; surfaced as an alert to subscribers.
    Error,
}

/// An immutable, timestamped record of a state transition.
///
/// Events carry a bus-assigned sequence number; within one task the
/// sequence is totally ordered (step N's completion always precedes
/// step N+1's start).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringEvent {
    /// Unique identifier.
    pub id: Uuid,
    /// Bus-assigned position in the global append-only log; 0 until published.
    #[serde(default)]
    pub seq: u64,
    /// The task this event concerns, if any.
    pub task_id: Option<Uuid>,
    /// What happened.
    pub kind: EventKind,
    /// How bad it is.
    pub severity: Severity,
    /// Free-form detail map.
    #[serde(default)]
    pub detail: HashMap<String, serde_json::Value>,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

impl MonitoringEvent {
    /// Create an info-severity event.
    pub fn new(kind: EventKind, task_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            task_id,
            kind,
            severity: Severity::Info,
            detail: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let task_id = Uuid::new_v4();
        let event = MonitoringEvent::new(EventKind::StepFailed, Some(task_id))
            .with_severity(Severity::Error)
            .with_detail("step", 2)
            .with_detail("error", "compile failed");

        assert_eq!(event.kind, EventKind::StepFailed);
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.detail["step"], 2);
        assert_eq!(event.seq, 0);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&EventKind::StepWaitingApproval).unwrap();
        assert_eq!(json, "\"step_waiting_approval\"");
        let parsed: EventKind = serde_json::from_str("\"task_retried\"").unwrap();
        assert_eq!(parsed, EventKind::TaskRetried);
    }
}
