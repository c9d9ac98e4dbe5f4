//! The orchestration engine: task lifecycle, sequential step scheduling,
//! capability-based agent dispatch, and human approval gates.
//!
//! [`TaskManager`] is the facade the gateway and CLI talk to. Internally it
//! wires a [`TaskStore`], an [`AgentRegistry`], an [`ApprovalGate`], a
//! [`WorkflowCatalog`]-backed [`Planner`], and a [`StepScheduler`] around a
//! shared monitoring [`conductor_events::EventBus`].

/// Workflow templates and goal-to-plan resolution.
pub mod catalog;
/// Approval lifecycle: request, resolve, expire, cancel.
pub mod gate;
/// Directed agent-to-agent coordination messages.
pub mod mailbox;
/// The lifecycle facade wiring all engine collaborators together.
pub mod manager;
/// The step execution seam and the loopback default.
pub mod provider;
/// Agent availability and atomic claim/release.
pub mod registry;
/// Sequential step dispatch with approval gating and backoff.
pub mod scheduler;
/// Shared task/step records and their store.
pub mod store;

pub use catalog::{CatalogPlanner, Plan, PlannedStep, Planner, WorkflowCatalog};
pub use gate::ApprovalGate;
pub use mailbox::Mailbox;
pub use manager::{CreateTaskOptions, TaskManager, TaskManagerBuilder};
pub use provider::{CapabilityProvider, LoopbackProvider, StepPayload};
pub use registry::AgentRegistry;
pub use scheduler::StepScheduler;
pub use store::{TaskRecord, TaskStore};
