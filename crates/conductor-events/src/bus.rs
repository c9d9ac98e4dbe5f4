use conductor_core::{MonitoringEvent, Severity};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Default per-subscriber buffer capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Optional constraints a subscriber places on its stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFilter {
    /// Only events for this task (events without a task id are dropped).
    pub task_id: Option<Uuid>,
    /// Only events at or above this severity.
    pub min_severity: Option<Severity>,
}

impl EventFilter {
    /// Whether an event passes this filter.
    pub fn matches(&self, event: &MonitoringEvent) -> bool {
        if let Some(task_id) = self.task_id {
            if event.task_id != Some(task_id) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        true
    }
}

/// One item yielded by a [`Subscription`].
#[derive(Debug, Clone)]
pub enum BusItem {
    /// An event matching the subscription's filter.
    Event(MonitoringEvent),
    /// The subscriber fell behind its bounded buffer and `missed` events
    /// were dropped; the stream continues from the current position.
    Gap {
        /// How many events were skipped.
        missed: u64,
    },
}

struct BusInner {
    log: Vec<MonitoringEvent>,
    next_seq: u64,
    tx: broadcast::Sender<MonitoringEvent>,
}

/// Ordered fan-out channel for [`MonitoringEvent`]s.
///
/// `publish` is non-blocking from the publisher's perspective: slow or
/// disconnected subscribers never block task execution. The append to the
/// in-memory log and the broadcast send happen under one lock, so a
/// subscriber created via [`EventBus::subscribe_with_replay`] observes every
/// event exactly once — either in the replayed history or on the live
/// stream, never neither.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Mutex::new(BusInner {
                log: Vec::new(),
                next_seq: 1,
                tx,
            }),
        }
    }

    /// Create a bus with the default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Append an event to the log and fan it out to all subscribers.
    ///
    /// Assigns the event's sequence number and returns the stamped event.
    pub async fn publish(&self, mut event: MonitoringEvent) -> MonitoringEvent {
        let mut inner = self.inner.lock().await;
        event.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.log.push(event.clone());
        // send only fails when there are no subscribers; that is fine.
        let _ = inner.tx.send(event.clone());
        debug!(seq = event.seq, kind = ?event.kind, "event published");
        event
    }

    /// Subscribe to events published after this call.
    pub async fn subscribe(&self, filter: EventFilter) -> Subscription {
        let inner = self.inner.lock().await;
        Subscription {
            rx: inner.tx.subscribe(),
            filter,
        }
    }

    /// Subscribe and atomically receive the matching history so far.
    ///
    /// The returned vector is the replay; the subscription yields everything
    /// published afterwards. No event falls between the two.
    pub async fn subscribe_with_replay(
        &self,
        filter: EventFilter,
    ) -> (Vec<MonitoringEvent>, Subscription) {
        let inner = self.inner.lock().await;
        let history: Vec<MonitoringEvent> = inner
            .log
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        let sub = Subscription {
            rx: inner.tx.subscribe(),
            filter,
        };
        (history, sub)
    }

    /// Clone of the full append-only log.
    pub async fn log_snapshot(&self) -> Vec<MonitoringEvent> {
        self.inner.lock().await.log.clone()
    }

    /// Number of events published so far.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.log.len()
    }

    /// Whether no event has been published yet.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live, filtered event stream handle.
pub struct Subscription {
    rx: broadcast::Receiver<MonitoringEvent>,
    filter: EventFilter,
}

impl Subscription {
    /// Wait for the next matching item.
    ///
    /// Returns `None` once the bus is dropped. A subscriber that lagged its
    /// bounded buffer receives a single [`BusItem::Gap`] marker instead of
    /// the dropped events.
    pub async fn next(&mut self) -> Option<BusItem> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(BusItem::Event(event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Some(BusItem::Gap { missed });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
