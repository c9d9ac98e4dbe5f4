use crate::gate::ApprovalGate;
use crate::mailbox::Mailbox;
use crate::provider::{CapabilityProvider, StepPayload};
use crate::registry::AgentRegistry;
use crate::store::{finish_step, TaskStore};
use chrono::Utc;
use conductor_core::{
    Agent, AgentMessage, Approval, ApprovalKind, EventKind, FailureReason, MessageKind,
    MonitoringEvent, Severity, StepStatus, TaskStatus, TaskStep,
};
use conductor_events::EventBus;
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// First retry delay when no eligible agent is free.
const BACKOFF_BASE: Duration = Duration::from_millis(250);
/// Upper bound on the retry delay.
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// What the scheduler decided to do with a task on one pass.
enum Action {
    /// Task is terminal, paused, or gone; nothing to do.
    Stop,
    /// The current step is in flight or gated; its completion or approval
    /// resolution will re-kick the task.
    Blocked,
    /// No eligible agent is free; re-check after the delay.
    Backoff(Duration),
    /// A step was claimed and marked running; execute it.
    Execute { step: TaskStep, agent: Agent },
    /// All steps unblock their successors; close the task out.
    Finalize,
}

/// Drives one task's steps, strictly in order, to eligible agents.
///
/// Each task is driven by at most one logical pass at a time: a pass runs
/// until the task blocks (in-flight step, pending approval, no free agent)
/// or ends, and every unblocking event (step completion, approval
/// resolution, resume, retry) kicks a fresh pass. Step-state checks inside
/// the store's write lock make overlapping passes harmless.
pub struct StepScheduler {
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    gate: Arc<ApprovalGate>,
    mailbox: Arc<Mailbox>,
    bus: Arc<EventBus>,
    provider: Arc<dyn CapabilityProvider>,
    approval_ttl: chrono::Duration,
    /// Per-task count of consecutive no-agent passes, for backoff.
    stalls: Mutex<HashMap<Uuid, u32>>,
}

impl StepScheduler {
    /// Wire a scheduler to its collaborators.
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<AgentRegistry>,
        gate: Arc<ApprovalGate>,
        mailbox: Arc<Mailbox>,
        bus: Arc<EventBus>,
        provider: Arc<dyn CapabilityProvider>,
        approval_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            registry,
            gate,
            mailbox,
            bus,
            provider,
            approval_ttl,
            stalls: Mutex::new(HashMap::new()),
        }
    }

    /// Start a scheduling pass for a task in the background.
    pub fn kick(self: &Arc<Self>, task_id: Uuid) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.drive(task_id).await;
        });
    }

    /// Run one scheduling pass: dispatch and execute steps until the task
    /// blocks or ends.
    pub async fn drive(self: Arc<Self>, task_id: Uuid) {
        loop {
            match self.next_action(task_id).await {
                Action::Stop | Action::Blocked => break,
                Action::Backoff(delay) => {
                    self.schedule_recheck(task_id, delay);
                    break;
                }
                Action::Execute { step, agent } => {
                    self.execute_step(task_id, step, agent).await;
                }
                Action::Finalize => {
                    self.finalize(task_id).await;
                    break;
                }
            }
        }
    }

    /// Re-run `drive` after a delay. Boxing the future breaks the type
    /// recursion between `drive` and the rescheduled pass.
    fn schedule_recheck(self: &Arc<Self>, task_id: Uuid, delay: Duration) {
        debug!(task_id = %task_id, ?delay, "no eligible agent, backing off");
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let pass: BoxFuture<'static, ()> = scheduler.drive(task_id).boxed();
            pass.await;
        });
    }

    /// Decide what to do with the task's first actionable step.
    async fn next_action(&self, task_id: Uuid) -> Action {
        let record = match self.store.get(task_id).await {
            Ok(record) => record,
            Err(_) => return Action::Stop,
        };
        if !record.task.status.is_schedulable() {
            return Action::Stop;
        }
        let Some(step) = record.first_actionable_step().cloned() else {
            return Action::Finalize;
        };

        match step.status {
            StepStatus::Running | StepStatus::WaitingApproval => Action::Blocked,
            StepStatus::Pending if step.requires_approval && step.approval_id.is_none() => {
                self.request_step_approval(task_id, &step).await;
                Action::Blocked
            }
            StepStatus::Pending => self.try_dispatch(task_id, step).await,
            // Failed/Cancelled first step with a schedulable task should not
            // happen; stop rather than dispatch out of order.
            _ => Action::Stop,
        }
    }

    /// Create the approval gating a step and park the step and task on it.
    async fn request_step_approval(&self, task_id: Uuid, step: &TaskStep) {
        let approval = self
            .gate
            .request(
                Approval::new(
                    task_id,
                    Some(step.id),
                    ApprovalKind::WorkflowStep,
                    format!("Approve step {}: {}", step.number, step.title),
                    self.approval_ttl,
                )
                .with_description(step.description.clone()),
            )
            .await;

        let parked = self
            .store
            .with_record(task_id, |record| {
                let Some(s) = record.step_mut(step.id) else {
                    return false;
                };
                if s.status != StepStatus::Pending {
                    return false;
                }
                s.status = StepStatus::WaitingApproval;
                s.approval_id = Some(approval.id);
                record.task.status = TaskStatus::WaitingApproval;
                true
            })
            .await
            .unwrap_or(false);

        if !parked {
            // The task was cancelled (or the step moved on) between the gate
            // insert and the store write; drop the now-orphaned approval so
            // it does not linger in the pending list until TTL expiry.
            debug!(task_id = %task_id, approval_id = %approval.id, "step could not be parked, cancelling approval");
            self.gate.cancel(approval.id).await;
            return;
        }

        info!(task_id = %task_id, step = step.number, approval_id = %approval.id, "step gated on approval");
        self.publish(
            MonitoringEvent::new(EventKind::StepWaitingApproval, Some(task_id))
                .with_detail("step", step.number)
                .with_detail("approval_id", approval.id.to_string()),
        )
        .await;
        self.publish(
            MonitoringEvent::new(EventKind::ApprovalRequested, Some(task_id))
                .with_severity(Severity::Warning)
                .with_detail("approval_id", approval.id.to_string())
                .with_detail("expires_at", approval.expires_at.to_rfc3339()),
        )
        .await;
    }

    /// Claim an agent for a pending step and mark the step running.
    async fn try_dispatch(&self, task_id: Uuid, step: TaskStep) -> Action {
        let Some(agent) = self.registry.claim(step.required_capability, step.id).await else {
            return Action::Backoff(self.next_backoff(task_id).await);
        };

        // Re-check under the write lock: another pass may have dispatched,
        // or the task may have been paused or cancelled since the snapshot.
        let dispatched = self
            .store
            .with_record(task_id, |record| {
                if !record.task.status.is_schedulable() {
                    return None;
                }
                let agent_name = agent.name.clone();
                let s = record.step_mut(step.id)?;
                if s.status != StepStatus::Pending {
                    return None;
                }
                s.status = StepStatus::Running;
                s.assigned_agent = Some(agent_name);
                s.started_at = Some(Utc::now());
                let snapshot = s.clone();
                record.task.status = TaskStatus::Running;
                if record.task.started_at.is_none() {
                    record.task.started_at = Some(Utc::now());
                }
                Some(snapshot)
            })
            .await
            .ok()
            .flatten();

        let Some(step) = dispatched else {
            self.registry.release(&agent.name).await;
            return Action::Blocked;
        };

        self.reset_backoff(task_id).await;
        info!(task_id = %task_id, step = step.number, agent = %agent.name, "step dispatched");
        self.mailbox
            .send(
                AgentMessage::new(
                    "scheduler",
                    &agent.name,
                    MessageKind::TaskAssignment,
                    format!("step {} assigned: {}", step.number, step.title),
                )
                .about_task(task_id),
            )
            .await;
        self.publish(
            MonitoringEvent::new(EventKind::StepStarted, Some(task_id))
                .with_detail("step", step.number)
                .with_detail("agent", agent.name.clone()),
        )
        .await;
        Action::Execute { step, agent }
    }

    /// Run the provider for a dispatched step and apply its outcome.
    async fn execute_step(&self, task_id: Uuid, step: TaskStep, agent: Agent) {
        let prior_results = self
            .store
            .get(task_id)
            .await
            .map(|record| {
                record
                    .steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Completed)
                    .filter_map(|s| s.result.clone())
                    .collect()
            })
            .unwrap_or_default();
        let context = self
            .store
            .get(task_id)
            .await
            .map(|record| record.task.context)
            .unwrap_or_default();

        let payload = StepPayload {
            task_id,
            step_id: step.id,
            step_number: step.number,
            title: step.title.clone(),
            description: step.description.clone(),
            capability: step.required_capability,
            context,
            prior_results,
        };

        let outcome = self.provider.execute(&agent, payload).await;
        self.complete_step(task_id, step.id, outcome).await;
        self.registry.release(&agent.name).await;
    }

    /// Apply a provider outcome to a step.
    ///
    /// Results for steps that are no longer running (task cancelled or
    /// retried meanwhile) are discarded, never applied to the replacement
    /// state. Returns whether the outcome was applied.
    pub async fn complete_step(
        &self,
        task_id: Uuid,
        step_id: Uuid,
        outcome: conductor_core::ConductorResult<serde_json::Value>,
    ) -> bool {
        let applied = self
            .store
            .with_record(task_id, |record| {
                let Some(s) = record.step_mut(step_id) else {
                    return None;
                };
                if s.status != StepStatus::Running {
                    return None;
                }
                let worker = s.assigned_agent.clone();
                match outcome {
                    Ok(result) => {
                        s.result = Some(result);
                        finish_step(s, StepStatus::Completed);
                        let number = s.number;
                        record.recompute_progress();
                        Some((number, worker, None))
                    }
                    Err(err) => {
                        let message = err.to_string();
                        s.error = Some(message.clone());
                        finish_step(s, StepStatus::Failed);
                        let number = s.number;
                        record.task.status = TaskStatus::Failed {
                            reason: FailureReason::ExecutionError,
                        };
                        record.task.error = Some(message.clone());
                        record.task.completed_at = Some(Utc::now());
                        Some((number, worker, Some(message)))
                    }
                }
            })
            .await
            .ok()
            .flatten();

        if let Some((number, Some(worker), outcome)) =
            applied.as_ref().map(|(n, w, e)| (*n, w.clone(), e.clone()))
        {
            let body = match outcome {
                None => format!("step {number} completed"),
                Some(ref message) => format!("step {number} failed: {message}"),
            };
            self.mailbox
                .send(
                    AgentMessage::new(&worker, "scheduler", MessageKind::StatusUpdate, body)
                        .about_task(task_id),
                )
                .await;
        }

        match applied {
            Some((number, _, None)) => {
                info!(task_id = %task_id, step = number, "step completed");
                self.publish(
                    MonitoringEvent::new(EventKind::StepCompleted, Some(task_id))
                        .with_detail("step", number),
                )
                .await;
                true
            }
            Some((number, _, Some(message))) => {
                error!(task_id = %task_id, step = number, error = %message, "step failed");
                self.publish(
                    MonitoringEvent::new(EventKind::StepFailed, Some(task_id))
                        .with_severity(Severity::Error)
                        .with_detail("step", number)
                        .with_detail("error", message.clone()),
                )
                .await;
                self.publish(
                    MonitoringEvent::new(EventKind::TaskFailed, Some(task_id))
                        .with_severity(Severity::Error)
                        .with_detail("reason", "execution_error")
                        .with_detail("error", message),
                )
                .await;
                true
            }
            None => {
                warn!(task_id = %task_id, step_id = %step_id, "discarding result for a step that is no longer running");
                false
            }
        }
    }

    /// Close out a task whose steps all unblock their successors.
    async fn finalize(&self, task_id: Uuid) {
        let completed = self
            .store
            .with_record(task_id, |record| {
                if !record.task.status.is_schedulable() {
                    return false;
                }
                record.task.status = TaskStatus::Completed;
                record.task.progress = 100;
                record.task.completed_at = Some(Utc::now());
                true
            })
            .await
            .unwrap_or(false);

        if completed {
            info!(task_id = %task_id, "task completed");
            self.stalls.lock().await.remove(&task_id);
            self.publish(MonitoringEvent::new(EventKind::TaskCompleted, Some(task_id)))
                .await;
        }
    }

    async fn next_backoff(&self, task_id: Uuid) -> Duration {
        let mut stalls = self.stalls.lock().await;
        let attempt = stalls.entry(task_id).or_insert(0);
        *attempt = attempt.saturating_add(1);
        let shift = (*attempt - 1).min(8);
        BACKOFF_CAP.min(BACKOFF_BASE * 2u32.pow(shift))
    }

    async fn reset_backoff(&self, task_id: Uuid) {
        self.stalls.lock().await.remove(&task_id);
    }

    async fn publish(&self, event: MonitoringEvent) {
        self.bus.publish(event).await;
    }
}
