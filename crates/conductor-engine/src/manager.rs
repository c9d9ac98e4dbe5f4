use crate::catalog::{CatalogPlanner, Planner, WorkflowCatalog};
use crate::gate::ApprovalGate;
use crate::mailbox::Mailbox;
use crate::provider::CapabilityProvider;
use crate::registry::AgentRegistry;
use crate::scheduler::StepScheduler;
use crate::store::{finish_step, new_record, TaskRecord, TaskStore};
use chrono::Utc;
use conductor_core::{
    Agent, AgentStatus, Approval, ConductorError, ConductorResult, EventKind, FailureReason,
    MonitoringEvent, Priority, Severity, StepStatus, Task, TaskStatus, TaskStep, Workflow,
    WorkflowExecution,
};
use conductor_events::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Options accepted when creating a task.
#[derive(Debug, Clone)]
pub struct CreateTaskOptions {
    /// Explicit title; derived from the goal when absent.
    pub title: Option<String>,
    /// Scheduling priority.
    pub priority: Priority,
    /// Who is creating the task.
    pub created_by: Option<String>,
    /// Classification tags, also used for workflow matching.
    pub tags: Vec<String>,
    /// Free-form context handed to every step's provider call.
    pub context: HashMap<String, serde_json::Value>,
    /// Gate the first step behind a human approval.
    pub require_approval: bool,
    /// Truncate the planned step sequence to at most this many steps.
    pub max_steps: Option<u32>,
    /// Soft deadline, minutes from creation; informational only.
    pub timeout_minutes: Option<u32>,
    /// Start scheduling immediately after creation.
    pub auto_start: bool,
}

impl Default for CreateTaskOptions {
    fn default() -> Self {
        Self {
            title: None,
            priority: Priority::Normal,
            created_by: None,
            tags: Vec::new(),
            context: HashMap::new(),
            require_approval: false,
            max_steps: None,
            timeout_minutes: None,
            auto_start: true,
        }
    }
}

/// Builder for [`TaskManager`].
pub struct TaskManagerBuilder {
    provider: Arc<dyn CapabilityProvider>,
    planner: Option<Arc<dyn Planner>>,
    approval_ttl: chrono::Duration,
    event_capacity: usize,
}

impl TaskManagerBuilder {
    /// Override the planner (default: catalog-backed).
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Override how long approvals stay actionable (default: 30 minutes).
    pub fn with_approval_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.approval_ttl = ttl;
        self
    }

    /// Override the event bus buffer size.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Assemble the manager and its collaborators.
    pub fn build(self) -> Arc<TaskManager> {
        let store = Arc::new(TaskStore::new());
        let registry = Arc::new(AgentRegistry::new());
        let gate = Arc::new(ApprovalGate::new());
        let mailbox = Arc::new(Mailbox::new());
        let catalog = Arc::new(WorkflowCatalog::new());
        let bus = Arc::new(EventBus::with_capacity(self.event_capacity));
        let planner = self
            .planner
            .unwrap_or_else(|| Arc::new(CatalogPlanner::new(Arc::clone(&catalog))));
        let scheduler = Arc::new(StepScheduler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&gate),
            Arc::clone(&mailbox),
            Arc::clone(&bus),
            Arc::clone(&self.provider),
            self.approval_ttl,
        ));
        Arc::new(TaskManager {
            store,
            registry,
            gate,
            mailbox,
            catalog,
            bus,
            planner,
            scheduler,
            provider: self.provider,
        })
    }
}

/// The engine facade: owns every task's lifecycle and fans work out to the
/// scheduler.
///
/// All lifecycle operations go through here so that the corresponding
/// monitoring events are published exactly once, next to the state change.
pub struct TaskManager {
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    gate: Arc<ApprovalGate>,
    mailbox: Arc<Mailbox>,
    catalog: Arc<WorkflowCatalog>,
    bus: Arc<EventBus>,
    planner: Arc<dyn Planner>,
    scheduler: Arc<StepScheduler>,
    provider: Arc<dyn CapabilityProvider>,
}

impl TaskManager {
    /// Start building a manager around a capability provider.
    pub fn builder(provider: Arc<dyn CapabilityProvider>) -> TaskManagerBuilder {
        TaskManagerBuilder {
            provider,
            planner: None,
            approval_ttl: chrono::Duration::minutes(30),
            event_capacity: 256,
        }
    }

    /// The monitoring event bus.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// The workflow catalog.
    pub fn catalog(&self) -> Arc<WorkflowCatalog> {
        Arc::clone(&self.catalog)
    }

    /// The inter-agent mailbox.
    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    // ---- tasks ----------------------------------------------------------

    /// Plan a goal into steps and create (and usually start) the task.
    pub async fn create_task(
        self: &Arc<Self>,
        goal: &str,
        options: CreateTaskOptions,
    ) -> ConductorResult<TaskRecord> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(ConductorError::Validation("goal must not be empty".into()));
        }

        let plan = self.planner.plan(goal).await?;
        let title = options
            .title
            .unwrap_or_else(|| goal.chars().take(60).collect());
        let mut task = Task::new(title, goal)
            .with_priority(options.priority)
            .with_tags(options.tags);
        if let Some(creator) = options.created_by {
            task = task.with_creator(creator);
        }
        if let Some(minutes) = options.timeout_minutes {
            task = task.with_deadline(Utc::now() + chrono::Duration::minutes(i64::from(minutes)));
        }
        task.context = options.context;

        let mut steps: Vec<TaskStep> = plan
            .steps
            .iter()
            .take(options.max_steps.map_or(usize::MAX, |n| n.max(1) as usize))
            .enumerate()
            .map(|(index, planned)| {
                TaskStep::new(task.id, index as u32 + 1, planned.title.clone(), planned.capability)
                    .with_description(planned.description.clone())
                    .with_approval_required(planned.requires_approval)
            })
            .collect();
        if options.require_approval {
            if let Some(first) = steps.first_mut() {
                first.requires_approval = true;
            }
        }

        let execution = plan
            .workflow
            .as_ref()
            .map(|workflow| WorkflowExecution::new(workflow, task.id));

        let task_id = task.id;
        let record = new_record(task, steps, execution);
        self.store.insert(record.clone()).await;
        info!(task_id = %task_id, steps = record.steps.len(), "task created");
        self.bus
            .publish(
                MonitoringEvent::new(EventKind::TaskCreated, Some(task_id))
                    .with_detail("steps", record.steps.len()),
            )
            .await;

        if options.auto_start {
            self.start_task(task_id).await?;
        }
        self.store.get(task_id).await
    }

    /// Move a pending task to running and kick its first scheduling pass.
    pub async fn start_task(self: &Arc<Self>, task_id: Uuid) -> ConductorResult<()> {
        self.store
            .with_record(task_id, |record| {
                if record.task.status != TaskStatus::Pending {
                    return Err(ConductorError::Transition(format!(
                        "task {task_id} cannot start from {:?}",
                        record.task.status
                    )));
                }
                record.task.status = TaskStatus::Running;
                Ok(())
            })
            .await??;
        self.bus
            .publish(MonitoringEvent::new(EventKind::TaskStarted, Some(task_id)))
            .await;
        self.scheduler.kick(task_id);
        Ok(())
    }

    /// Snapshot of one task with its steps.
    pub async fn get_task(&self, task_id: Uuid) -> ConductorResult<TaskRecord> {
        self.store.get(task_id).await
    }

    /// Snapshot of all tasks, newest first.
    pub async fn list_tasks(&self) -> Vec<TaskRecord> {
        self.store.list().await
    }

    /// Withhold further step dispatch. The in-flight step, if any, keeps
    /// running and its result is still applied.
    pub async fn pause_task(&self, task_id: Uuid) -> ConductorResult<()> {
        self.store
            .with_record(task_id, |record| {
                if record.task.status != TaskStatus::Running {
                    return Err(ConductorError::Transition(format!(
                        "task {task_id} cannot pause from {:?}",
                        record.task.status
                    )));
                }
                record.task.status = TaskStatus::Paused;
                Ok(())
            })
            .await??;
        info!(task_id = %task_id, "task paused");
        self.bus
            .publish(MonitoringEvent::new(EventKind::TaskPaused, Some(task_id)))
            .await;
        Ok(())
    }

    /// Resume a paused task and kick a scheduling pass.
    pub async fn resume_task(self: &Arc<Self>, task_id: Uuid) -> ConductorResult<()> {
        self.store
            .with_record(task_id, |record| {
                if record.task.status != TaskStatus::Paused {
                    return Err(ConductorError::Transition(format!(
                        "task {task_id} cannot resume from {:?}",
                        record.task.status
                    )));
                }
                record.task.status = TaskStatus::Running;
                Ok(())
            })
            .await??;
        info!(task_id = %task_id, "task resumed");
        self.bus
            .publish(MonitoringEvent::new(EventKind::TaskResumed, Some(task_id)))
            .await;
        self.scheduler.kick(task_id);
        Ok(())
    }

    /// Cancel a non-terminal task: terminal for the task, all unfinished
    /// steps become `cancelled`, pending approvals are neutralized, and a
    /// late result from an in-flight step is discarded.
    pub async fn cancel_task(&self, task_id: Uuid) -> ConductorResult<()> {
        let in_flight = self
            .store
            .with_record(task_id, |record| {
                if record.task.status.is_terminal() {
                    return Err(ConductorError::Transition(format!(
                        "task {task_id} is already {:?}",
                        record.task.status
                    )));
                }
                let mut in_flight = Vec::new();
                for step in &mut record.steps {
                    if step.status == StepStatus::Running {
                        in_flight.push(step.id);
                    }
                    if !step.status.is_terminal() {
                        finish_step(step, StepStatus::Cancelled);
                    }
                }
                record.task.status = TaskStatus::Cancelled;
                record.task.completed_at = Some(Utc::now());
                Ok(in_flight)
            })
            .await??;

        let cancelled_approvals = self.gate.cancel_for_task(task_id).await;
        info!(
            task_id = %task_id,
            approvals = cancelled_approvals.len(),
            "task cancelled"
        );
        for step_id in in_flight {
            self.provider.abort(step_id).await;
        }
        self.bus
            .publish(
                MonitoringEvent::new(EventKind::TaskCancelled, Some(task_id))
                    .with_severity(Severity::Warning),
            )
            .await;
        Ok(())
    }

    /// Retry a failed task: failed and cancelled steps are reset to
    /// pending (re-requesting any gating approval), completed steps are
    /// kept, and scheduling resumes.
    pub async fn retry_task(self: &Arc<Self>, task_id: Uuid) -> ConductorResult<()> {
        self.store
            .with_record(task_id, |record| {
                if !matches!(record.task.status, TaskStatus::Failed { .. }) {
                    return Err(ConductorError::Transition(format!(
                        "task {task_id} cannot retry from {:?}",
                        record.task.status
                    )));
                }
                for step in &mut record.steps {
                    if matches!(step.status, StepStatus::Failed | StepStatus::Cancelled) {
                        step.status = StepStatus::Pending;
                        step.assigned_agent = None;
                        step.approval_id = None;
                        step.error = None;
                        step.started_at = None;
                        step.completed_at = None;
                    }
                }
                record.task.status = TaskStatus::Running;
                record.task.error = None;
                record.task.completed_at = None;
                Ok(())
            })
            .await??;
        info!(task_id = %task_id, "task retried");
        self.bus
            .publish(MonitoringEvent::new(EventKind::TaskRetried, Some(task_id)))
            .await;
        self.scheduler.kick(task_id);
        Ok(())
    }

    // ---- approvals ------------------------------------------------------

    /// All approvals still awaiting a decision, oldest first.
    pub async fn pending_approvals(&self) -> Vec<Approval> {
        self.gate.pending().await
    }

    /// Resolve a pending approval and propagate the decision to the gated
    /// step: approved unblocks it, rejected fails the step and its task.
    pub async fn resolve_approval(
        self: &Arc<Self>,
        approval_id: Uuid,
        approved: bool,
        approver: &str,
        notes: Option<String>,
    ) -> ConductorResult<Approval> {
        let approval = self.gate.resolve(approval_id, approved, approver, notes).await?;
        self.bus
            .publish(
                MonitoringEvent::new(EventKind::ApprovalResolved, Some(approval.task_id))
                    .with_detail("approval_id", approval_id.to_string())
                    .with_detail("approved", approved),
            )
            .await;

        let Some(step_id) = approval.step_id else {
            return Ok(approval);
        };
        if approved {
            self.store
                .with_record(approval.task_id, |record| {
                    if let Some(step) = record.step_mut(step_id) {
                        if step.status == StepStatus::WaitingApproval {
                            step.status = StepStatus::Pending;
                        }
                    }
                    if record.task.status == TaskStatus::WaitingApproval {
                        record.task.status = TaskStatus::Running;
                    }
                })
                .await?;
            self.scheduler.kick(approval.task_id);
        } else {
            self.fail_gated_step(approval.task_id, step_id, FailureReason::ApprovalRejected)
                .await?;
        }
        Ok(approval)
    }

    /// Expire overdue approvals and fail the tasks they were gating.
    ///
    /// Returns the number of approvals expired in this sweep.
    pub async fn run_expiry_sweep(self: &Arc<Self>) -> usize {
        let expired = self.gate.sweep_expired(Utc::now()).await;
        for approval in &expired {
            self.bus
                .publish(
                    MonitoringEvent::new(EventKind::ApprovalExpired, Some(approval.task_id))
                        .with_severity(Severity::Warning)
                        .with_detail("approval_id", approval.id.to_string()),
                )
                .await;
            if let Some(step_id) = approval.step_id {
                if let Err(err) = self
                    .fail_gated_step(approval.task_id, step_id, FailureReason::ApprovalExpired)
                    .await
                {
                    warn!(task_id = %approval.task_id, error = %err, "expiry propagation failed");
                }
            }
        }
        expired.len()
    }

    /// Run the expiry sweep on a fixed interval until the handle is dropped
    /// or aborted.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.run_expiry_sweep().await;
            }
        })
    }

    async fn fail_gated_step(
        &self,
        task_id: Uuid,
        step_id: Uuid,
        reason: FailureReason,
    ) -> ConductorResult<()> {
        let failed = self
            .store
            .with_record(task_id, |record| {
                let Some(step) = record.step_mut(step_id) else {
                    return false;
                };
                if step.status != StepStatus::WaitingApproval {
                    return false;
                }
                step.error = Some(reason.to_string());
                finish_step(step, StepStatus::Failed);
                record.task.status = TaskStatus::Failed { reason };
                record.task.error = Some(reason.to_string());
                record.task.completed_at = Some(Utc::now());
                true
            })
            .await?;
        if failed {
            self.bus
                .publish(
                    MonitoringEvent::new(EventKind::TaskFailed, Some(task_id))
                        .with_severity(Severity::Error)
                        .with_detail("reason", reason.to_string()),
                )
                .await;
        }
        Ok(())
    }

    // ---- agents ---------------------------------------------------------

    /// Register an agent and announce it on the bus.
    pub async fn register_agent(&self, agent: Agent) -> ConductorResult<()> {
        let name = agent.name.clone();
        self.registry.register(agent).await?;
        self.bus
            .publish(
                MonitoringEvent::new(EventKind::AgentRegistered, None).with_detail("agent", name),
            )
            .await;
        Ok(())
    }

    /// Deregister an agent; historical step assignments keep its name.
    pub async fn deregister_agent(&self, name: &str) -> ConductorResult<Agent> {
        let agent = self.registry.deregister(name).await?;
        self.bus
            .publish(
                MonitoringEvent::new(EventKind::AgentDeregistered, None)
                    .with_detail("agent", name.to_string()),
            )
            .await;
        Ok(agent)
    }

    /// Update an agent's availability and announce the change.
    pub async fn set_agent_status(&self, name: &str, status: AgentStatus) -> ConductorResult<()> {
        self.registry.set_status(name, status).await?;
        self.bus
            .publish(
                MonitoringEvent::new(EventKind::AgentStatusChanged, None)
                    .with_detail("agent", name.to_string())
                    .with_detail("status", format!("{status:?}").to_lowercase()),
            )
            .await;
        Ok(())
    }

    /// Snapshot of all registered agents.
    pub async fn agents(&self) -> Vec<Agent> {
        self.registry.snapshot().await
    }

    // ---- workflows ------------------------------------------------------

    /// Register a workflow template in the catalog.
    pub async fn register_workflow(&self, workflow: Workflow) {
        self.catalog.register(workflow).await;
    }

    /// All registered workflow templates.
    pub async fn workflows(&self) -> Vec<Workflow> {
        self.catalog.list().await
    }
}
