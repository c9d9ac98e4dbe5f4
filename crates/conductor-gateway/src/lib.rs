//! HTTP and WebSocket gateway over the orchestration engine.
//!
//! REST endpoints cover the task lifecycle, approvals, agents, and
//! workflows; `/ws` streams the monitoring event log to dashboards with an
//! atomic snapshot-then-follow handshake.

pub mod rest;
pub mod server;
pub mod ws;

pub use rest::{CreateTaskRequest, RegisterAgentRequest, ResolveApprovalRequest, TaskSummary, TaskView};
pub use server::{AppState, GatewayServer};
