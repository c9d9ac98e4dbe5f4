//! Event distribution for the Conductor engine.
//!
//! Converts internal lifecycle transitions into ordered, per-task event
//! streams for external subscribers, and maintains a process-wide live
//! dashboard read model built from the same append-only log.
//!
//! # Main types
//!
//! - [`EventBus`] — Non-blocking fan-out of [`MonitoringEvent`]s with
//!   replayable history and bounded per-subscriber buffers.
//! - [`Subscription`] — A filtered handle yielding [`BusItem`]s.
//! - [`Dashboard`] — Aggregate counters maintained incrementally from the
//!   event log.

/// Append-only event log with broadcast fan-out.
pub mod bus;
/// Live aggregate read model.
pub mod dashboard;

pub use bus::{BusItem, EventBus, EventFilter, Subscription};
pub use conductor_core::MonitoringEvent;
pub use dashboard::{spawn_follower, Dashboard, DashboardSnapshot};
