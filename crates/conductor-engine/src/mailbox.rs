use conductor_core::{AgentMessage, ConductorError, ConductorResult};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory store of directed agent-to-agent messages.
///
/// Messages are retained after being read so that a task's coordination
/// history stays inspectable alongside its event log.
pub struct Mailbox {
    messages: RwLock<Vec<AgentMessage>>,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Deliver a message.
    pub async fn send(&self, message: AgentMessage) -> Uuid {
        debug!(
            from = %message.from_agent,
            to = %message.to_agent,
            kind = ?message.kind,
            "message sent"
        );
        let id = message.id;
        self.messages.write().await.push(message);
        id
    }

    /// All messages addressed to an agent, oldest first.
    pub async fn inbox(&self, agent: &str) -> Vec<AgentMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.to_agent == agent)
            .cloned()
            .collect()
    }

    /// Number of unread messages addressed to an agent.
    pub async fn unread_count(&self, agent: &str) -> usize {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.to_agent == agent && !m.read)
            .count()
    }

    /// Mark one message as read.
    pub async fn mark_read(&self, id: Uuid) -> ConductorResult<()> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ConductorError::NotFound(format!("message {id}")))?;
        message.read = true;
        Ok(())
    }

    /// All messages relating to a task, oldest first.
    pub async fn for_task(&self, task_id: Uuid) -> Vec<AgentMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.task_id == Some(task_id))
            .cloned()
            .collect()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
