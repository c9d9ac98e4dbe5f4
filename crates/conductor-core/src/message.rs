use crate::task::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a directed inter-agent message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A step was assigned to the recipient.
    TaskAssignment,
    /// Progress or completion notification.
    StatusUpdate,
    /// A request to collaborate on a step.
    Collaboration,
    /// A request for a resource held by another agent.
    ResourceRequest,
}

/// A directed coordination message between two agents.
///
/// Used for hand-offs, not for carrying step data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique identifier.
    pub id: Uuid,
    /// Sending agent (or subsystem) name.
    pub from_agent: String,
    /// Receiving agent name.
    pub to_agent: String,
    /// What the message is about.
    pub kind: MessageKind,
    /// Delivery priority.
    pub priority: Priority,
    /// Message body.
    pub body: String,
    /// The task this message relates to, if any.
    pub task_id: Option<Uuid>,
    /// Whether the recipient has read the message.
    #[serde(default)]
    pub read: bool,
    /// When the message was sent.
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    /// Create an unread message.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageKind,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from.into(),
            to_agent: to.into(),
            kind,
            priority: Priority::Normal,
            body: body.into(),
            task_id: None,
            read: false,
            created_at: Utc::now(),
        }
    }

    /// Associate the message with a task.
    pub fn about_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Set the delivery priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let task_id = Uuid::new_v4();
        let msg = AgentMessage::new(
            "scheduler",
            "coder-1",
            MessageKind::TaskAssignment,
            "step 2 assigned",
        )
        .about_task(task_id)
        .with_priority(Priority::High);

        assert!(!msg.read);
        assert_eq!(msg.task_id, Some(task_id));
        assert_eq!(msg.kind, MessageKind::TaskAssignment);
        assert_eq!(msg.priority, Priority::High);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&MessageKind::ResourceRequest).unwrap();
        assert_eq!(json, "\"resource_request\"");
    }
}
