//! Router assembly and the serve entry point.

use crate::{rest, ws};
use axum::routing::{delete, get, post};
use axum::Router;
use conductor_core::ConductorResult;
use conductor_engine::TaskManager;
use conductor_events::{spawn_follower, Dashboard};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Shared application state.
pub struct AppState {
    /// The engine facade.
    pub manager: Arc<TaskManager>,
    /// Live dashboard read model, kept current by a bus follower.
    pub dashboard: Arc<RwLock<Dashboard>>,
}

/// The HTTP and WebSocket surface over a [`TaskManager`].
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router over an engine instance.
    pub async fn build(manager: Arc<TaskManager>) -> Router {
        let dashboard = spawn_follower(manager.bus()).await;
        let state = Arc::new(AppState { manager, dashboard });

        Router::new()
            .route("/health", get(rest::health))
            .route("/tasks", post(rest::create_task).get(rest::list_tasks))
            .route("/tasks/{id}", get(rest::get_task))
            .route("/tasks/{id}/pause", post(rest::pause_task))
            .route("/tasks/{id}/resume", post(rest::resume_task))
            .route("/tasks/{id}/cancel", post(rest::cancel_task))
            .route("/tasks/{id}/retry", post(rest::retry_task))
            .route("/approvals", get(rest::list_approvals))
            .route("/approvals/{id}/resolve", post(rest::resolve_approval))
            .route("/agents", get(rest::list_agents).post(rest::register_agent))
            .route("/agents/{name}", delete(rest::deregister_agent))
            .route(
                "/workflows",
                get(rest::list_workflows).post(rest::register_workflow),
            )
            .route("/dashboard", get(rest::dashboard))
            .route("/ws", get(ws::ws_handler))
            .with_state(state)
    }

    /// Bind and serve until the process is stopped.
    pub async fn serve(manager: Arc<TaskManager>, addr: SocketAddr) -> ConductorResult<()> {
        let app = Self::build(manager).await;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "gateway listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}
