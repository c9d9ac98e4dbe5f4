use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A capability tag an agent can declare.
///
/// Dispatch is a set-intersection query over these tags; agent
/// "specialization" is data, not a type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Writing and refactoring code.
    Coding,
    /// Web/document research and summarization.
    Research,
    /// UI/UX and visual design work.
    Design,
    /// Writing and executing tests.
    Testing,
    /// Security review and hardening.
    Security,
    /// Data analysis and modelling.
    DataScience,
    /// Catch-all for steps with no specialised requirement.
    General,
}

impl Capability {
    /// Parse a capability tag from its wire name.
    pub fn parse_tag(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "coding" => Some(Capability::Coding),
            "research" => Some(Capability::Research),
            "design" => Some(Capability::Design),
            "testing" => Some(Capability::Testing),
            "security" => Some(Capability::Security),
            "data_science" | "data-science" => Some(Capability::DataScience),
            "general" => Some(Capability::General),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Coding => write!(f, "coding"),
            Capability::Research => write!(f, "research"),
            Capability::Design => write!(f, "design"),
            Capability::Testing => write!(f, "testing"),
            Capability::Security => write!(f, "security"),
            Capability::DataScience => write!(f, "data_science"),
            Capability::General => write!(f, "general"),
        }
    }
}

/// Availability state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Available for dispatch.
    Idle,
    /// Executing a step.
    Busy,
    /// Not accepting work.
    Offline,
    /// In an error state; excluded from dispatch until reset.
    Error,
}

/// A named worker with a capability tag set.
///
/// An agent is the assignee of at most one running step at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique registry name.
    pub name: String,
    /// Declared capability tags.
    pub capabilities: BTreeSet<Capability>,
    /// Current availability.
    pub status: AgentStatus,
    /// Free-form personality/configuration map.
    #[serde(default)]
    pub personality: HashMap<String, serde_json::Value>,
    /// The step this agent is currently running, if any.
    pub current_step: Option<Uuid>,
    /// Number of steps this agent has finished; used as the load metric
    /// for dispatch tie-breaking.
    pub completed_steps: u64,
    /// When the agent was registered.
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    /// Create an idle agent with the given name and capabilities.
    pub fn new(name: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
            status: AgentStatus::Idle,
            personality: HashMap::new(),
            current_step: None,
            completed_steps: 0,
            registered_at: Utc::now(),
        }
    }

    /// Whether this agent declares the given capability.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Whether this agent may be claimed for dispatch right now.
    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Idle
    }
}
