use crate::bus::{BusItem, EventBus, EventFilter};
use conductor_core::{EventKind, MonitoringEvent, Severity};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
struct TaskGauge {
    step_running: bool,
}

/// Process-wide aggregate read model over the monitoring event log.
///
/// Built from the log at startup via [`Dashboard::from_log`], then updated
/// incrementally with [`Dashboard::apply`] — never an ad hoc mutable array.
#[derive(Debug, Default)]
pub struct Dashboard {
    active: HashMap<Uuid, TaskGauge>,
    completed_tasks: u64,
    failed_tasks: u64,
    cancelled_tasks: u64,
    pending_approvals: u64,
    registered_agents: u64,
    info_events: u64,
    warning_events: u64,
    error_events: u64,
    last_seq: u64,
}

/// A serializable point-in-time copy of the dashboard counters.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    /// Tasks not yet in a terminal state.
    pub active_tasks: u64,
    /// Steps currently running across all tasks.
    pub running_steps: u64,
    /// Tasks that reached `completed`.
    pub completed_tasks: u64,
    /// Tasks that reached `failed`.
    pub failed_tasks: u64,
    /// Tasks that reached `cancelled`.
    pub cancelled_tasks: u64,
    /// Approvals awaiting a decision.
    pub pending_approvals: u64,
    /// Agents currently registered.
    pub registered_agents: u64,
    /// Events observed per severity.
    pub info_events: u64,
    /// Warning-severity events observed.
    pub warning_events: u64,
    /// Error-severity events observed.
    pub error_events: u64,
    /// Sequence number of the last applied event.
    pub last_seq: u64,
}

impl Dashboard {
    /// Empty dashboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the read model from an event log.
    pub fn from_log(events: &[MonitoringEvent]) -> Self {
        let mut dash = Self::new();
        for event in events {
            dash.apply(event);
        }
        dash
    }

    /// Fold one event into the counters.
    pub fn apply(&mut self, event: &MonitoringEvent) {
        match event.severity {
            Severity::Info => self.info_events += 1,
            Severity::Warning => self.warning_events += 1,
            Severity::Error => self.error_events += 1,
        }
        if event.seq > self.last_seq {
            self.last_seq = event.seq;
        }

        match event.kind {
            EventKind::TaskCreated => {
                if let Some(id) = event.task_id {
                    self.active.insert(id, TaskGauge::default());
                }
            }
            EventKind::TaskRetried => {
                if let Some(id) = event.task_id {
                    self.active.insert(id, TaskGauge::default());
                    self.failed_tasks = self.failed_tasks.saturating_sub(1);
                }
            }
            EventKind::StepStarted => {
                if let Some(gauge) = event.task_id.and_then(|id| self.active.get_mut(&id)) {
                    gauge.step_running = true;
                }
            }
            EventKind::StepCompleted | EventKind::StepFailed => {
                if let Some(gauge) = event.task_id.and_then(|id| self.active.get_mut(&id)) {
                    gauge.step_running = false;
                }
            }
            EventKind::TaskCompleted => {
                if let Some(id) = event.task_id {
                    self.active.remove(&id);
                    self.completed_tasks += 1;
                }
            }
            EventKind::TaskFailed => {
                if let Some(id) = event.task_id {
                    self.active.remove(&id);
                    self.failed_tasks += 1;
                }
            }
            EventKind::TaskCancelled => {
                if let Some(id) = event.task_id {
                    self.active.remove(&id);
                    self.cancelled_tasks += 1;
                }
            }
            EventKind::ApprovalRequested => self.pending_approvals += 1,
            EventKind::ApprovalResolved | EventKind::ApprovalExpired => {
                self.pending_approvals = self.pending_approvals.saturating_sub(1);
            }
            EventKind::AgentRegistered => self.registered_agents += 1,
            EventKind::AgentDeregistered => {
                self.registered_agents = self.registered_agents.saturating_sub(1);
            }
            _ => {}
        }
    }

    /// Current counters.
    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            active_tasks: self.active.len() as u64,
            running_steps: self.active.values().filter(|g| g.step_running).count() as u64,
            completed_tasks: self.completed_tasks,
            failed_tasks: self.failed_tasks,
            cancelled_tasks: self.cancelled_tasks,
            pending_approvals: self.pending_approvals,
            registered_agents: self.registered_agents,
            info_events: self.info_events,
            warning_events: self.warning_events,
            error_events: self.error_events,
            last_seq: self.last_seq,
        }
    }
}

/// Spawn a follower that keeps a shared dashboard current against the bus.
///
/// Seeds the dashboard from the log, then applies live events. Returns the
/// shared handle; the follower task runs until the bus is dropped. A gap in
/// the follower's own stream triggers a full rebuild from the log.
pub async fn spawn_follower(bus: Arc<EventBus>) -> Arc<RwLock<Dashboard>> {
    let (history, mut sub) = bus.subscribe_with_replay(EventFilter::default()).await;
    let dashboard = Arc::new(RwLock::new(Dashboard::from_log(&history)));

    let dash = Arc::clone(&dashboard);
    let bus_for_rebuild = Arc::clone(&bus);
    tokio::spawn(async move {
        while let Some(item) = sub.next().await {
            match item {
                BusItem::Event(event) => {
                    dash.write().await.apply(&event);
                }
                BusItem::Gap { missed } => {
                    tracing::warn!(missed, "dashboard follower lagged; rebuilding from log");
                    let log = bus_for_rebuild.log_snapshot().await;
                    *dash.write().await = Dashboard::from_log(&log);
                }
            }
        }
    });

    dashboard
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, task_id: Option<Uuid>, seq: u64) -> MonitoringEvent {
        let mut e = MonitoringEvent::new(kind, task_id);
        e.seq = seq;
        e
    }

    #[test]
    fn test_task_lifecycle_counters() {
        let id = Uuid::new_v4();
        let mut dash = Dashboard::new();
        dash.apply(&ev(EventKind::TaskCreated, Some(id), 1));
        assert_eq!(dash.snapshot().active_tasks, 1);

        dash.apply(&ev(EventKind::StepStarted, Some(id), 2));
        assert_eq!(dash.snapshot().running_steps, 1);

        dash.apply(&ev(EventKind::StepCompleted, Some(id), 3));
        assert_eq!(dash.snapshot().running_steps, 0);

        dash.apply(&ev(EventKind::TaskCompleted, Some(id), 4));
        let snap = dash.snapshot();
        assert_eq!(snap.active_tasks, 0);
        assert_eq!(snap.completed_tasks, 1);
        assert_eq!(snap.last_seq, 4);
    }

    #[test]
    fn test_cancel_clears_running_step() {
        let id = Uuid::new_v4();
        let mut dash = Dashboard::new();
        dash.apply(&ev(EventKind::TaskCreated, Some(id), 1));
        dash.apply(&ev(EventKind::StepStarted, Some(id), 2));
        dash.apply(&ev(EventKind::TaskCancelled, Some(id), 3));
        let snap = dash.snapshot();
        assert_eq!(snap.active_tasks, 0);
        assert_eq!(snap.running_steps, 0);
        assert_eq!(snap.cancelled_tasks, 1);
    }

    #[test]
    fn test_retry_moves_failed_back_to_active() {
        let id = Uuid::new_v4();
        let mut dash = Dashboard::new();
        dash.apply(&ev(EventKind::TaskCreated, Some(id), 1));
        dash.apply(&ev(EventKind::TaskFailed, Some(id), 2));
        assert_eq!(dash.snapshot().failed_tasks, 1);

        dash.apply(&ev(EventKind::TaskRetried, Some(id), 3));
        let snap = dash.snapshot();
        assert_eq!(snap.failed_tasks, 0);
        assert_eq!(snap.active_tasks, 1);
    }

    #[test]
    fn test_approval_and_agent_gauges() {
        let mut dash = Dashboard::new();
        dash.apply(&ev(EventKind::AgentRegistered, None, 1));
        dash.apply(&ev(EventKind::ApprovalRequested, Some(Uuid::new_v4()), 2));
        let snap = dash.snapshot();
        assert_eq!(snap.registered_agents, 1);
        assert_eq!(snap.pending_approvals, 1);

        dash.apply(&ev(EventKind::ApprovalExpired, None, 3));
        dash.apply(&ev(EventKind::AgentDeregistered, None, 4));
        let snap = dash.snapshot();
        assert_eq!(snap.pending_approvals, 0);
        assert_eq!(snap.registered_agents, 0);
    }

    #[test]
    fn test_from_log_equals_incremental() {
        let id = Uuid::new_v4();
        let events = vec![
            ev(EventKind::TaskCreated, Some(id), 1),
            ev(EventKind::StepStarted, Some(id), 2),
            ev(EventKind::StepFailed, Some(id), 3).with_severity(Severity::Error),
            ev(EventKind::TaskFailed, Some(id), 4).with_severity(Severity::Error),
        ];
        let rebuilt = Dashboard::from_log(&events);
        let mut incremental = Dashboard::new();
        for e in &events {
            incremental.apply(e);
        }
        assert_eq!(rebuilt.snapshot().failed_tasks, incremental.snapshot().failed_tasks);
        assert_eq!(rebuilt.snapshot().error_events, 2);
        assert_eq!(rebuilt.snapshot().last_seq, 4);
    }

    #[tokio::test]
    async fn test_follower_tracks_bus() {
        let bus = Arc::new(EventBus::new());
        let id = Uuid::new_v4();
        bus.publish(MonitoringEvent::new(EventKind::TaskCreated, Some(id)))
            .await;

        let dash = spawn_follower(Arc::clone(&bus)).await;
        // Seeded from history.
        assert_eq!(dash.read().await.snapshot().active_tasks, 1);

        bus.publish(MonitoringEvent::new(EventKind::TaskCompleted, Some(id)))
            .await;
        // Give the follower a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let snap = dash.read().await.snapshot();
        assert_eq!(snap.active_tasks, 0);
        assert_eq!(snap.completed_tasks, 1);
    }
}
