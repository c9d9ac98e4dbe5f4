use async_trait::async_trait;
use conductor_core::{Agent, Capability, ConductorResult};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Everything a capability provider needs to execute one step.
#[derive(Debug, Clone)]
pub struct StepPayload {
    /// The owning task.
    pub task_id: Uuid,
    /// The step being executed.
    pub step_id: Uuid,
    /// 1-based position of the step within its task.
    pub step_number: u32,
    /// Step title.
    pub title: String,
    /// What the step is supposed to do.
    pub description: String,
    /// The capability the step was dispatched under.
    pub capability: Capability,
    /// Task context, as set at creation time.
    pub context: HashMap<String, serde_json::Value>,
    /// Results of the already-completed steps of the task, in step order.
    pub prior_results: Vec<serde_json::Value>,
}

/// Executes dispatched steps on behalf of an agent.
///
/// This is the seam between the engine and whatever actually does the work
/// (an LLM session, a subprocess, a remote worker). The scheduler treats an
/// `Err` as a step failure that fails the task.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Execute one step and return its result payload.
    async fn execute(&self, agent: &Agent, payload: StepPayload) -> ConductorResult<serde_json::Value>;

    /// Best-effort abort of an in-flight step after its task was cancelled.
    ///
    /// The engine discards the step's result either way; this only gives
    /// the provider a chance to stop spending resources.
    async fn abort(&self, step_id: Uuid) {
        debug!(step_id = %step_id, "abort requested, provider has no abort support");
    }
}

/// Provider that completes every step immediately with an echo of its
/// payload. The default for local runs and demos.
pub struct LoopbackProvider;

#[async_trait]
impl CapabilityProvider for LoopbackProvider {
    async fn execute(&self, agent: &Agent, payload: StepPayload) -> ConductorResult<serde_json::Value> {
        debug!(agent = %agent.name, step_id = %payload.step_id, "loopback execution");
        Ok(json!({
            "agent": agent.name,
            "step": payload.step_number,
            "title": payload.title,
            "capability": payload.capability.to_string(),
        }))
    }
}
