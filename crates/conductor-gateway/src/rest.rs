//! REST surface: task lifecycle, approvals, agents, and workflows.

use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use conductor_core::{
    Agent, Approval, Capability, ConductorError, Priority, Task, TaskStatus, TaskStep, Workflow,
};
use conductor_engine::{CreateTaskOptions, TaskRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// An engine error carried to an HTTP response.
pub struct ApiError(ConductorError);

impl From<ConductorError> for ApiError {
    fn from(err: ConductorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ConductorError::Validation(_) => StatusCode::BAD_REQUEST,
            ConductorError::NotFound(_) => StatusCode::NOT_FOUND,
            ConductorError::Transition(_)
            | ConductorError::Approval(_)
            | ConductorError::Registry(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /tasks`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// The free-text goal.
    pub prompt: String,
    /// Explicit title; derived from the prompt when absent.
    #[serde(default)]
    pub title: Option<String>,
    /// Priority name; unknown values fall back to `normal`.
    #[serde(default)]
    pub priority: Option<String>,
    /// Who is creating the task.
    #[serde(default)]
    pub created_by: Option<String>,
    /// Classification tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form context handed to every step.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Gate the first step behind a human approval.
    #[serde(default)]
    pub require_approval: bool,
    /// Truncate the plan to at most this many steps.
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Soft deadline, minutes from creation.
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

/// Full task snapshot returned by the task endpoints.
#[derive(Debug, Serialize)]
pub struct TaskView {
    /// The task itself.
    pub task: Task,
    /// Its steps, in order.
    pub steps: Vec<TaskStep>,
    /// Name of the workflow template the task was planned from, if any.
    pub workflow: Option<String>,
}

impl From<TaskRecord> for TaskView {
    fn from(record: TaskRecord) -> Self {
        Self {
            task: record.task,
            steps: record.steps,
            workflow: record.execution.map(|e| e.workflow_name),
        }
    }
}

/// One row of the task index.
#[derive(Debug, Serialize)]
pub struct TaskSummary {
    /// Task id.
    pub id: Uuid,
    /// Task title.
    pub title: String,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Scheduling priority.
    pub priority: Priority,
    /// Completion percentage.
    pub progress: u8,
    /// Total number of steps.
    pub steps_total: usize,
    /// Number of completed steps.
    pub steps_completed: usize,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl From<&TaskRecord> for TaskSummary {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.task.id,
            title: record.task.title.clone(),
            status: record.task.status.clone(),
            priority: record.task.priority,
            progress: record.task.progress,
            steps_total: record.steps.len(),
            steps_completed: record
                .steps
                .iter()
                .filter(|s| s.status == conductor_core::StepStatus::Completed)
                .count(),
            created_at: record.task.created_at,
        }
    }
}

/// Body of `POST /approvals/{id}/resolve`.
#[derive(Debug, Deserialize)]
pub struct ResolveApprovalRequest {
    /// `approved` or `rejected`.
    pub decision: String,
    /// Who is deciding.
    #[serde(default)]
    pub approver: Option<String>,
    /// Free-text reviewer notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of `POST /agents`.
#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    /// Unique agent name.
    pub name: String,
    /// Capability tags; unknown tags are rejected.
    pub capabilities: Vec<String>,
}

pub(crate) async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "conductor" }))
}

pub(crate) async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let options = CreateTaskOptions {
        title: req.title,
        priority: req
            .priority
            .as_deref()
            .map_or(Priority::Normal, Priority::parse_level),
        created_by: req.created_by,
        tags: req.tags,
        context: req.context,
        require_approval: req.require_approval,
        max_steps: req.max_steps,
        timeout_minutes: req.timeout_minutes,
        auto_start: true,
    };
    let record = state.manager.create_task(&req.prompt, options).await?;
    Ok((StatusCode::CREATED, Json(TaskView::from(record))))
}

pub(crate) async fn list_tasks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summaries: Vec<TaskSummary> = state
        .manager
        .list_tasks()
        .await
        .iter()
        .map(TaskSummary::from)
        .collect();
    Json(summaries)
}

pub(crate) async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskView>> {
    let record = state.manager.get_task(id).await?;
    Ok(Json(TaskView::from(record)))
}

async fn task_status(state: &AppState, id: Uuid) -> ApiResult<Json<serde_json::Value>> {
    let record = state.manager.get_task(id).await?;
    Ok(Json(json!({ "status": record.task.status })))
}

pub(crate) async fn pause_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.pause_task(id).await?;
    task_status(&state, id).await
}

pub(crate) async fn resume_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.resume_task(id).await?;
    task_status(&state, id).await
}

pub(crate) async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.cancel_task(id).await?;
    task_status(&state, id).await
}

pub(crate) async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.retry_task(id).await?;
    task_status(&state, id).await
}

pub(crate) async fn list_approvals(State(state): State<Arc<AppState>>) -> Json<Vec<Approval>> {
    Json(state.manager.pending_approvals().await)
}

pub(crate) async fn resolve_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveApprovalRequest>,
) -> ApiResult<Json<Approval>> {
    let approved = match req.decision.as_str() {
        "approved" => true,
        "rejected" => false,
        other => {
            return Err(ApiError(ConductorError::Validation(format!(
                "unknown decision '{other}', expected 'approved' or 'rejected'"
            ))))
        }
    };
    let approver = req.approver.as_deref().unwrap_or("dashboard");
    let approval = state
        .manager
        .resolve_approval(id, approved, approver, req.notes)
        .await?;
    Ok(Json(approval))
}

pub(crate) async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<Agent>> {
    Json(state.manager.agents().await)
}

pub(crate) async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterAgentRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError(ConductorError::Validation(
            "agent name must not be empty".into(),
        )));
    }
    let mut capabilities = Vec::new();
    for tag in &req.capabilities {
        let capability = Capability::parse_tag(tag).ok_or_else(|| {
            ApiError(ConductorError::Validation(format!(
                "unknown capability '{tag}'"
            )))
        })?;
        capabilities.push(capability);
    }
    if capabilities.is_empty() {
        capabilities.push(Capability::General);
    }
    let agent = Agent::new(req.name.trim(), capabilities);
    state.manager.register_agent(agent.clone()).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub(crate) async fn deregister_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Agent>> {
    let agent = state.manager.deregister_agent(&name).await?;
    Ok(Json(agent))
}

pub(crate) async fn list_workflows(State(state): State<Arc<AppState>>) -> Json<Vec<Workflow>> {
    Json(state.manager.workflows().await)
}

pub(crate) async fn register_workflow(
    State(state): State<Arc<AppState>>,
    Json(workflow): Json<Workflow>,
) -> ApiResult<impl IntoResponse> {
    if workflow.steps.is_empty() {
        return Err(ApiError(ConductorError::Validation(
            "workflow must have at least one step".into(),
        )));
    }
    state.manager.register_workflow(workflow).await;
    Ok(StatusCode::CREATED)
}

pub(crate) async fn dashboard(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.dashboard.read().await.snapshot();
    Json(json!(snapshot))
}
