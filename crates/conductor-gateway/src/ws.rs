//! WebSocket event streaming for dashboards.
//!
//! A client opens `/ws` and sends one subscribe frame:
//!
//! ```json
//! {"type": "subscribe", "subscriptions": ["monitoring", "alerts"], "task_id": null}
//! ```
//!
//! The server answers with a `snapshot` frame (current tasks, agents,
//! pending approvals, dashboard counters, and the event cursor) and then
//! streams `event` frames — `alert` for error-severity events — plus a
//! `status_update` frame with fresh counters after every lifecycle-level
//! event. A subscriber that falls behind its bounded buffer receives a
//! `gap` frame and the stream continues from the current position.

use crate::rest::TaskSummary;
use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use conductor_core::{EventKind, MonitoringEvent, Severity};
use conductor_events::{BusItem, EventFilter};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct SubscribeFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    subscriptions: Vec<String>,
    #[serde(default)]
    task_id: Option<Uuid>,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // The first frame must be a subscribe.
    let subscribe = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<SubscribeFrame>(&text) {
                Ok(frame) if frame.frame_type == "subscribe" => break frame,
                _ => {
                    let _ = sender
                        .send(Message::Text(
                            json!({
                                "type": "error",
                                "error": "expected a subscribe frame",
                            })
                            .to_string()
                            .into(),
                        ))
                        .await;
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    };

    // "monitoring" streams everything; "alerts" alone narrows the stream to
    // error-severity events.
    let wants_events = subscribe.subscriptions.is_empty()
        || subscribe.subscriptions.iter().any(|s| s == "monitoring");
    let filter = EventFilter {
        task_id: subscribe.task_id,
        min_severity: if wants_events { None } else { Some(Severity::Error) },
    };

    // Replay position and live stream are taken atomically, so the snapshot
    // cursor and the first streamed event never leave a hole between them.
    let (history, mut subscription) = state.manager.bus().subscribe_with_replay(filter).await;
    let cursor = history.last().map_or(0, |e| e.seq);

    let tasks: Vec<TaskSummary> = state
        .manager
        .list_tasks()
        .await
        .iter()
        .map(TaskSummary::from)
        .collect();
    let snapshot = json!({
        "type": "snapshot",
        "data": {
            "tasks": tasks,
            "agents": state.manager.agents().await,
            "approvals": state.manager.pending_approvals().await,
            "dashboard": state.dashboard.read().await.snapshot(),
            "cursor": cursor,
        }
    });
    if sender
        .send(Message::Text(snapshot.to_string().into()))
        .await
        .is_err()
    {
        return;
    }
    info!(connection_id = %connection_id, task_id = ?subscribe.task_id, "event stream subscribed");

    loop {
        tokio::select! {
            item = subscription.next() => {
                let Some(item) = item else { break };
                let frame = match item {
                    BusItem::Event(event) => event_frame(&event),
                    BusItem::Gap { missed } => {
                        warn!(connection_id = %connection_id, missed, "subscriber lagged");
                        json!({ "type": "gap", "missed": missed })
                    }
                };
                if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
                if let Some(update) = status_update(&state, &frame).await {
                    if sender.send(Message::Text(update.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => debug!(connection_id = %connection_id, "ignoring frame after subscribe"),
                }
            }
        }
    }

    info!(connection_id = %connection_id, "event stream disconnected");
}

fn event_frame(event: &MonitoringEvent) -> serde_json::Value {
    let frame_type = if event.severity == Severity::Error {
        "alert"
    } else {
        "event"
    };
    json!({ "type": frame_type, "data": event })
}

/// A counters frame, sent after lifecycle-level events so dashboards stay
/// current without polling.
async fn status_update(state: &AppState, frame: &serde_json::Value) -> Option<serde_json::Value> {
    let kind = frame.get("data")?.get("kind")?.as_str()?;
    let lifecycle: EventKind = serde_json::from_value(json!(kind)).ok()?;
    if !matches!(
        lifecycle,
        EventKind::TaskCreated
            | EventKind::TaskCompleted
            | EventKind::TaskFailed
            | EventKind::TaskCancelled
            | EventKind::TaskRetried
            | EventKind::TaskPaused
            | EventKind::TaskResumed
            | EventKind::ApprovalRequested
            | EventKind::ApprovalResolved
            | EventKind::ApprovalExpired
    ) {
        return None;
    }
    Some(json!({
        "type": "status_update",
        "data": state.dashboard.read().await.snapshot(),
    }))
}
