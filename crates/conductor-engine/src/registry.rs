use conductor_core::{Agent, AgentStatus, Capability, ConductorError, ConductorResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct RegistryInner {
    agents: HashMap<String, Agent>,
    /// Registration order; the deterministic tie-breaker for dispatch.
    order: Vec<String>,
}

/// The single source of truth for agent availability.
///
/// Dispatch never reads agent state and writes it later from another call
/// site: [`AgentRegistry::claim`] and [`AgentRegistry::release`] are the one
/// mutation path per agent record, each a single write-lock section, so two
/// concurrent scheduler passes can never double-assign an agent.
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                agents: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Register a new agent. Fails if the name is already taken.
    pub async fn register(&self, agent: Agent) -> ConductorResult<()> {
        let mut inner = self.inner.write().await;
        if inner.agents.contains_key(&agent.name) {
            return Err(ConductorError::Registry(format!(
                "agent '{}' is already registered",
                agent.name
            )));
        }
        info!(agent = %agent.name, capabilities = ?agent.capabilities, "agent registered");
        inner.order.push(agent.name.clone());
        inner.agents.insert(agent.name.clone(), agent);
        Ok(())
    }

    /// Remove an agent from the registry, returning its final record.
    ///
    /// Historical steps keep referencing the agent by name; deregistration
    /// never touches them.
    pub async fn deregister(&self, name: &str) -> ConductorResult<Agent> {
        let mut inner = self.inner.write().await;
        let agent = inner
            .agents
            .remove(name)
            .ok_or_else(|| ConductorError::NotFound(format!("agent '{name}'")))?;
        inner.order.retain(|n| n != name);
        info!(agent = %name, "agent deregistered");
        Ok(agent)
    }

    /// Set an agent's availability state.
    pub async fn set_status(&self, name: &str, status: AgentStatus) -> ConductorResult<()> {
        let mut inner = self.inner.write().await;
        let agent = inner
            .agents
            .get_mut(name)
            .ok_or_else(|| ConductorError::NotFound(format!("agent '{name}'")))?;
        agent.status = status;
        if status != AgentStatus::Busy {
            agent.current_step = None;
        }
        Ok(())
    }

    /// Name of an idle agent declaring `capability`, if any (read-only probe).
    ///
    /// "No agent found" is a normal, retryable condition, never an error.
    pub async fn find_available(&self, capability: Capability) -> Option<String> {
        let inner = self.inner.read().await;
        Self::pick(&inner, capability).map(String::from)
    }

    /// Atomically select an idle agent with `capability` and mark it busy on
    /// `step_id`.
    ///
    /// Ties are broken by lowest completed-steps load, then by registration
    /// order, so selection is deterministic.
    pub async fn claim(&self, capability: Capability, step_id: Uuid) -> Option<Agent> {
        let mut inner = self.inner.write().await;
        let name = Self::pick(&inner, capability)?.to_string();
        let agent = inner.agents.get_mut(&name)?;
        agent.status = AgentStatus::Busy;
        agent.current_step = Some(step_id);
        debug!(agent = %name, step_id = %step_id, "agent claimed");
        Some(agent.clone())
    }

    /// Return a claimed agent to the idle pool and bump its load counter.
    ///
    /// A no-op if the agent was deregistered while busy.
    pub async fn release(&self, name: &str) {
        let mut inner = self.inner.write().await;
        match inner.agents.get_mut(name) {
            Some(agent) => {
                agent.status = AgentStatus::Idle;
                agent.current_step = None;
                agent.completed_steps += 1;
                debug!(agent = %name, "agent released");
            }
            None => warn!(agent = %name, "released agent is no longer registered"),
        }
    }

    /// Snapshot of all registered agents, in registration order.
    pub async fn snapshot(&self) -> Vec<Agent> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|name| inner.agents.get(name))
            .cloned()
            .collect()
    }

    /// Number of registered agents.
    pub async fn count(&self) -> usize {
        self.inner.read().await.agents.len()
    }

    fn pick(inner: &RegistryInner, capability: Capability) -> Option<&str> {
        let mut best: Option<(u64, usize, &str)> = None;
        for (position, name) in inner.order.iter().enumerate() {
            let Some(agent) = inner.agents.get(name) else {
                continue;
            };
            if !agent.is_available() || !agent.has_capability(capability) {
                continue;
            }
            let key = (agent.completed_steps, position, name.as_str());
            match best {
                Some((load, pos, _)) if (load, pos) <= (key.0, key.1) => {}
                _ => best = Some(key),
            }
        }
        best.map(|(_, _, name)| name)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let registry = AgentRegistry::new();
        registry
            .register(Agent::new("a", [Capability::Coding]))
            .await
            .unwrap();
        let dup = registry.register(Agent::new("a", [Capability::Coding])).await;
        assert!(dup.is_err());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_find_available_matches_capability() {
        let registry = AgentRegistry::new();
        registry
            .register(Agent::new("coder", [Capability::Coding]))
            .await
            .unwrap();
        registry
            .register(Agent::new("tester", [Capability::Testing]))
            .await
            .unwrap();

        assert_eq!(
            registry.find_available(Capability::Testing).await.as_deref(),
            Some("tester")
        );
        assert!(registry.find_available(Capability::Design).await.is_none());
    }

    #[tokio::test]
    async fn test_claim_marks_busy_and_release_restores() {
        let registry = AgentRegistry::new();
        registry
            .register(Agent::new("coder", [Capability::Coding]))
            .await
            .unwrap();

        let step_id = Uuid::new_v4();
        let claimed = registry.claim(Capability::Coding, step_id).await.unwrap();
        assert_eq!(claimed.status, AgentStatus::Busy);
        assert_eq!(claimed.current_step, Some(step_id));

        // Busy agent cannot be claimed again.
        assert!(registry.claim(Capability::Coding, Uuid::new_v4()).await.is_none());

        registry.release("coder").await;
        let snap = registry.snapshot().await;
        assert_eq!(snap[0].status, AgentStatus::Idle);
        assert_eq!(snap[0].completed_steps, 1);
    }

    #[tokio::test]
    async fn test_tie_break_by_load_then_order() {
        let registry = AgentRegistry::new();
        registry
            .register(Agent::new("first", [Capability::Coding]))
            .await
            .unwrap();
        registry
            .register(Agent::new("second", [Capability::Coding]))
            .await
            .unwrap();

        // Equal load: registration order wins.
        let a = registry.claim(Capability::Coding, Uuid::new_v4()).await.unwrap();
        assert_eq!(a.name, "first");
        registry.release("first").await;

        // "first" now has load 1, so "second" is preferred.
        let b = registry.claim(Capability::Coding, Uuid::new_v4()).await.unwrap();
        assert_eq!(b.name, "second");
    }

    #[tokio::test]
    async fn test_offline_agent_excluded() {
        let registry = AgentRegistry::new();
        registry
            .register(Agent::new("a", [Capability::Coding]))
            .await
            .unwrap();
        registry.set_status("a", AgentStatus::Offline).await.unwrap();
        assert!(registry.claim(Capability::Coding, Uuid::new_v4()).await.is_none());

        registry.set_status("a", AgentStatus::Idle).await.unwrap();
        assert!(registry.claim(Capability::Coding, Uuid::new_v4()).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_double_assign() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(Agent::new("only", [Capability::Coding]))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let reg = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                reg.claim(Capability::Coding, Uuid::new_v4()).await.is_some()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1, "exactly one concurrent claim may succeed");
    }

    #[tokio::test]
    async fn test_release_after_deregister_is_noop() {
        let registry = AgentRegistry::new();
        registry
            .register(Agent::new("a", [Capability::Coding]))
            .await
            .unwrap();
        registry.claim(Capability::Coding, Uuid::new_v4()).await.unwrap();
        registry.deregister("a").await.unwrap();
        registry.release("a").await;
        assert_eq!(registry.count().await, 0);
    }
}
