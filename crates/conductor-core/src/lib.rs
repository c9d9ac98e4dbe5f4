//! Core types and error definitions for the Conductor orchestration engine.
//!
//! This crate provides the foundational types shared across all Conductor
//! crates: the task/step data model, agent and approval records, workflow
//! templates, inter-agent messages, and monitoring events.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`Task`] / [`TaskStep`] — A unit of orchestrated work and its ordered steps.
//! - [`Agent`] — A capability-tagged worker that executes one step at a time.
//! - [`Approval`] — A human sign-off gate blocking a sensitive step.
//! - [`MonitoringEvent`] — An immutable record of a state transition.

/// Agent record, capability tags, and availability states.
pub mod agent;
/// Approval records and resolution states.
pub mod approval;
/// Monitoring event taxonomy.
pub mod event;
/// Directed inter-agent messages.
pub mod message;
/// Ordered task steps.
pub mod step;
/// Tasks and their lifecycle states.
pub mod task;
/// Reusable workflow templates and their runtime executions.
pub mod workflow;

pub use agent::{Agent, AgentStatus, Capability};
pub use approval::{Approval, ApprovalKind, ApprovalStatus};
pub use event::{EventKind, MonitoringEvent, Severity};
pub use message::{AgentMessage, MessageKind};
pub use step::{StepStatus, TaskStep};
pub use task::{FailureReason, Priority, Task, TaskStatus};
pub use workflow::{Workflow, WorkflowExecution, WorkflowStepTemplate};

/// Top-level error type for the Conductor engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// A request was rejected synchronously before any state was persisted
    /// (empty prompt, unknown priority, malformed input).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A lifecycle operation was attempted from a state that does not
    /// permit it (e.g. pausing a completed task).
    #[error("Invalid transition: {0}")]
    Transition(String),

    /// A referenced task, step, agent, or approval does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An error from the agent registry.
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error from the approval gate.
    #[error("Approval error: {0}")]
    Approval(String),

    /// A capability provider reported a step execution failure.
    #[error("Execution error: {0}")]
    Execution(String),

    /// An error from the planner or workflow catalog.
    #[error("Planner error: {0}")]
    Planner(String),

    /// An error from the gateway layer.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConductorError::Validation("prompt must not be empty".into());
        assert_eq!(err.to_string(), "Validation error: prompt must not be empty");

        let err = ConductorError::Transition("cannot pause a completed task".into());
        assert!(err.to_string().starts_with("Invalid transition"));
    }

    #[test]
    fn test_json_error_conversion() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("not json");
        let err: ConductorError = bad.unwrap_err().into();
        assert!(matches!(err, ConductorError::Json(_)));
    }
}
