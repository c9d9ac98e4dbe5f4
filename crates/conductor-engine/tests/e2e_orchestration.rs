//! End-to-end engine tests: full task lifecycles through the manager,
//! scheduler, registry, approval gate, and event bus.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use conductor_core::{
    Agent, Capability, ConductorError, ConductorResult, EventKind, FailureReason, MessageKind,
    StepStatus, TaskStatus, Workflow, WorkflowStepTemplate,
};
use conductor_engine::{
    CapabilityProvider, CreateTaskOptions, LoopbackProvider, StepPayload, TaskManager, TaskRecord,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Provider that blocks each execution until the test hands out a permit.
struct GatedProvider {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl CapabilityProvider for GatedProvider {
    async fn execute(
        &self,
        agent: &Agent,
        payload: StepPayload,
    ) -> ConductorResult<serde_json::Value> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ConductorError::Execution("gate closed".into()))?;
        Ok(json!({ "agent": agent.name, "step": payload.step_number }))
    }
}

/// Provider that fails steps whose title contains a marker.
struct FlakyProvider;

#[async_trait]
impl CapabilityProvider for FlakyProvider {
    async fn execute(
        &self,
        _agent: &Agent,
        payload: StepPayload,
    ) -> ConductorResult<serde_json::Value> {
        if payload.title.contains("explode") {
            Err(ConductorError::Execution("synthetic failure".into()))
        } else {
            Ok(json!({ "step": payload.step_number }))
        }
    }
}

fn delivery_workflow() -> Workflow {
    Workflow::new("delivery")
        .with_tags(vec!["ship".into()])
        .with_step(WorkflowStepTemplate {
            name: "Implement".into(),
            required_capability: Capability::Coding,
            description: "write the code".into(),
            requires_approval: false,
        })
        .with_step(WorkflowStepTemplate {
            name: "Test".into(),
            required_capability: Capability::Testing,
            description: "verify the change".into(),
            requires_approval: false,
        })
        .with_step(WorkflowStepTemplate {
            name: "Review".into(),
            required_capability: Capability::General,
            description: "final check".into(),
            requires_approval: false,
        })
}

async fn register_crew(manager: &Arc<TaskManager>) {
    for (name, capability) in [
        ("coder-1", Capability::Coding),
        ("tester-1", Capability::Testing),
        ("generalist-1", Capability::General),
    ] {
        manager
            .register_agent(Agent::new(name, [capability]))
            .await
            .unwrap();
    }
}

async fn wait_for(
    manager: &Arc<TaskManager>,
    task_id: Uuid,
    pred: impl Fn(&TaskRecord) -> bool,
) -> TaskRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let record = manager.get_task(task_id).await.unwrap();
        if pred(&record) {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, task is {:?}",
            record.task.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_workflow_task_runs_steps_in_order_to_completion() {
    let manager = TaskManager::builder(Arc::new(LoopbackProvider)).build();
    manager.register_workflow(delivery_workflow()).await;
    register_crew(&manager).await;

    let record = manager
        .create_task(
            "ship the login page",
            CreateTaskOptions {
                tags: vec!["ship".into()],
                ..CreateTaskOptions::default()
            },
        )
        .await
        .unwrap();
    let task_id = record.task.id;
    assert_eq!(record.steps.len(), 3);
    assert!(record.execution.is_some());

    let done = wait_for(&manager, task_id, |r| r.task.status == TaskStatus::Completed).await;
    assert_eq!(done.task.progress, 100);
    assert!(done.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(done.steps[0].assigned_agent.as_deref(), Some("coder-1"));
    assert_eq!(done.steps[1].assigned_agent.as_deref(), Some("tester-1"));

    // Step N finished before step N+1 started.
    for pair in done.steps.windows(2) {
        assert!(pair[0].completed_at.unwrap() <= pair[1].started_at.unwrap());
    }

    // The event log for this task is totally ordered and well-formed.
    let events: Vec<_> = manager
        .bus()
        .log_snapshot()
        .await
        .into_iter()
        .filter(|e| e.task_id == Some(task_id))
        .collect();
    assert_eq!(events.first().unwrap().kind, EventKind::TaskCreated);
    assert_eq!(events.last().unwrap().kind, EventKind::TaskCompleted);
    assert!(events.windows(2).all(|p| p[0].seq < p[1].seq));
    let starts = events
        .iter()
        .filter(|e| e.kind == EventKind::StepStarted)
        .count();
    let completions = events
        .iter()
        .filter(|e| e.kind == EventKind::StepCompleted)
        .count();
    assert_eq!(starts, 3);
    assert_eq!(completions, 3);

    // Dispatch left an assignment per step, completion a status update each.
    let mail = manager.mailbox().for_task(task_id).await;
    let assignments = mail
        .iter()
        .filter(|m| m.kind == MessageKind::TaskAssignment)
        .count();
    let updates = mail
        .iter()
        .filter(|m| m.kind == MessageKind::StatusUpdate)
        .count();
    assert_eq!(assignments, 3);
    assert_eq!(updates, 3);
}

#[tokio::test]
async fn test_gated_task_waits_for_approval_then_completes() {
    let manager = TaskManager::builder(Arc::new(LoopbackProvider)).build();
    register_crew(&manager).await;

    let record = manager
        .create_task(
            "delete stale records",
            CreateTaskOptions {
                require_approval: true,
                ..CreateTaskOptions::default()
            },
        )
        .await
        .unwrap();
    let task_id = record.task.id;

    let waiting = wait_for(&manager, task_id, |r| {
        r.task.status == TaskStatus::WaitingApproval
    })
    .await;
    assert_eq!(waiting.steps[0].status, StepStatus::WaitingApproval);

    let pending = manager.pending_approvals().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_id, task_id);

    // No agent does any work while the gate is closed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.get_task(task_id).await.unwrap().steps[0]
        .started_at
        .is_none());

    manager
        .resolve_approval(pending[0].id, true, "reviewer", Some("go ahead".into()))
        .await
        .unwrap();
    wait_for(&manager, task_id, |r| r.task.status == TaskStatus::Completed).await;
    assert!(manager.pending_approvals().await.is_empty());
}

#[tokio::test]
async fn test_rejected_approval_fails_task_and_retry_regates() {
    let manager = TaskManager::builder(Arc::new(LoopbackProvider)).build();
    register_crew(&manager).await;

    let record = manager
        .create_task(
            "rotate production keys",
            CreateTaskOptions {
                require_approval: true,
                ..CreateTaskOptions::default()
            },
        )
        .await
        .unwrap();
    let task_id = record.task.id;

    wait_for(&manager, task_id, |r| {
        r.task.status == TaskStatus::WaitingApproval
    })
    .await;
    let first_approval = manager.pending_approvals().await[0].id;
    manager
        .resolve_approval(first_approval, false, "reviewer", Some("not now".into()))
        .await
        .unwrap();

    let failed = wait_for(&manager, task_id, |r| r.task.status.is_terminal()).await;
    assert_eq!(
        failed.task.status,
        TaskStatus::Failed {
            reason: FailureReason::ApprovalRejected
        }
    );
    assert_eq!(failed.steps[0].status, StepStatus::Failed);

    // Retry resets the step and requests a fresh approval.
    manager.retry_task(task_id).await.unwrap();
    wait_for(&manager, task_id, |r| {
        r.task.status == TaskStatus::WaitingApproval
    })
    .await;
    let second_approval = manager.pending_approvals().await[0].id;
    assert_ne!(second_approval, first_approval);

    manager
        .resolve_approval(second_approval, true, "reviewer", None)
        .await
        .unwrap();
    wait_for(&manager, task_id, |r| r.task.status == TaskStatus::Completed).await;
}

#[tokio::test]
async fn test_expired_approval_fails_task_and_blocks_late_decision() {
    let manager = TaskManager::builder(Arc::new(LoopbackProvider))
        .with_approval_ttl(chrono::Duration::milliseconds(50))
        .build();
    register_crew(&manager).await;

    let record = manager
        .create_task(
            "touch the billing tables",
            CreateTaskOptions {
                require_approval: true,
                ..CreateTaskOptions::default()
            },
        )
        .await
        .unwrap();
    let task_id = record.task.id;

    wait_for(&manager, task_id, |r| {
        r.task.status == TaskStatus::WaitingApproval
    })
    .await;
    let approval_id = manager.pending_approvals().await[0].id;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.run_expiry_sweep().await, 1);

    let failed = manager.get_task(task_id).await.unwrap();
    assert_eq!(
        failed.task.status,
        TaskStatus::Failed {
            reason: FailureReason::ApprovalExpired
        }
    );

    // A late human decision on the expired approval is rejected.
    assert!(manager
        .resolve_approval(approval_id, true, "late-reviewer", None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_task_without_agents_waits_then_runs_when_one_registers() {
    let manager = TaskManager::builder(Arc::new(LoopbackProvider)).build();

    let record = manager
        .create_task("summarize the incident", CreateTaskOptions::default())
        .await
        .unwrap();
    let task_id = record.task.id;

    // No agents: the step stays pending, the task does not fail.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stalled = manager.get_task(task_id).await.unwrap();
    assert_eq!(stalled.task.status, TaskStatus::Running);
    assert_eq!(stalled.steps[0].status, StepStatus::Pending);

    manager
        .register_agent(Agent::new("late-joiner", [Capability::General]))
        .await
        .unwrap();
    let done = wait_for(&manager, task_id, |r| r.task.status == TaskStatus::Completed).await;
    assert_eq!(done.steps[0].assigned_agent.as_deref(), Some("late-joiner"));
}

#[tokio::test]
async fn test_cancel_discards_in_flight_result() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = TaskManager::builder(Arc::new(GatedProvider {
        gate: Arc::clone(&gate),
    }))
    .build();
    register_crew(&manager).await;

    let record = manager
        .create_task("long running export", CreateTaskOptions::default())
        .await
        .unwrap();
    let task_id = record.task.id;

    wait_for(&manager, task_id, |r| {
        r.steps[0].status == StepStatus::Running
    })
    .await;
    manager.cancel_task(task_id).await.unwrap();

    let cancelled = manager.get_task(task_id).await.unwrap();
    assert_eq!(cancelled.task.status, TaskStatus::Cancelled);
    assert!(cancelled
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Cancelled));

    // Let the in-flight execution finish; its result must be discarded.
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = manager.get_task(task_id).await.unwrap();
    assert_eq!(after.steps[0].status, StepStatus::Cancelled);
    assert!(after.steps[0].result.is_none());

    // Cancelling a terminal task is a transition error.
    assert!(manager.cancel_task(task_id).await.is_err());
}

#[tokio::test]
async fn test_pause_keeps_in_flight_step_but_withholds_next() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = TaskManager::builder(Arc::new(GatedProvider {
        gate: Arc::clone(&gate),
    }))
    .build();
    manager.register_workflow(delivery_workflow()).await;
    register_crew(&manager).await;

    let record = manager
        .create_task(
            "ship the profile page",
            CreateTaskOptions {
                tags: vec!["ship".into()],
                ..CreateTaskOptions::default()
            },
        )
        .await
        .unwrap();
    let task_id = record.task.id;

    wait_for(&manager, task_id, |r| {
        r.steps[0].status == StepStatus::Running
    })
    .await;
    manager.pause_task(task_id).await.unwrap();

    // The in-flight step's result is still applied after the pause.
    gate.add_permits(1);
    wait_for(&manager, task_id, |r| {
        r.steps[0].status == StepStatus::Completed
    })
    .await;

    // But the next step is not dispatched while paused.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let paused = manager.get_task(task_id).await.unwrap();
    assert_eq!(paused.task.status, TaskStatus::Paused);
    assert_eq!(paused.steps[1].status, StepStatus::Pending);
    assert!(paused.task.progress >= 33);

    // Resume finishes the remaining steps.
    gate.add_permits(2);
    manager.resume_task(task_id).await.unwrap();
    wait_for(&manager, task_id, |r| r.task.status == TaskStatus::Completed).await;

    // Double resume is a transition error.
    assert!(manager.resume_task(task_id).await.is_err());
}

#[tokio::test]
async fn test_failed_step_can_be_retried_after_fixing() {
    let manager = TaskManager::builder(Arc::new(FlakyProvider)).build();
    register_crew(&manager).await;
    manager
        .register_workflow(
            Workflow::new("risky")
                .with_tags(vec!["migration".into()])
                .with_step(WorkflowStepTemplate {
                    name: "prepare".into(),
                    required_capability: Capability::General,
                    description: String::new(),
                    requires_approval: false,
                })
                .with_step(WorkflowStepTemplate {
                    name: "explode here".into(),
                    required_capability: Capability::General,
                    description: String::new(),
                    requires_approval: false,
                }),
        )
        .await;

    let record = manager
        .create_task("run the migration", CreateTaskOptions::default())
        .await
        .unwrap();
    let task_id = record.task.id;

    let failed = wait_for(&manager, task_id, |r| r.task.status.is_terminal()).await;
    assert_eq!(
        failed.task.status,
        TaskStatus::Failed {
            reason: FailureReason::ExecutionError
        }
    );
    // The first step's completed work survives the failure.
    assert_eq!(failed.steps[0].status, StepStatus::Completed);
    assert_eq!(failed.steps[1].status, StepStatus::Failed);
    assert!(failed.task.error.is_some());

    // Rename-free retry hits the same failure again (provider unchanged),
    // which proves retries re-execute rather than skip the failed step.
    manager.retry_task(task_id).await.unwrap();
    let failed_again = wait_for(&manager, task_id, |r| r.task.status.is_terminal()).await;
    assert_eq!(
        failed_again.task.status,
        TaskStatus::Failed {
            reason: FailureReason::ExecutionError
        }
    );

    // Retry from a non-failed state is a transition error.
    manager.cancel_task(task_id).await.unwrap_err();
    let running = manager
        .create_task("unrelated", CreateTaskOptions::default())
        .await
        .unwrap();
    assert!(manager.retry_task(running.task.id).await.is_err());
}

#[tokio::test]
async fn test_two_tasks_contend_for_one_agent() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = TaskManager::builder(Arc::new(GatedProvider {
        gate: Arc::clone(&gate),
    }))
    .build();
    manager
        .register_agent(Agent::new("solo", [Capability::General]))
        .await
        .unwrap();

    let first = manager
        .create_task("export the audit log", CreateTaskOptions::default())
        .await
        .unwrap();
    let second = manager
        .create_task("rebuild the search index", CreateTaskOptions::default())
        .await
        .unwrap();

    // One of the two wins the agent; the other waits on backoff.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let a = manager.get_task(first.task.id).await.unwrap();
        let b = manager.get_task(second.task.id).await.unwrap();
        let running = [a.steps[0].status, b.steps[0].status]
            .iter()
            .filter(|s| **s == StepStatus::Running)
            .count();
        if running == 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no step ever reached running"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The losing task's step stays pending the whole time the agent is held.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let a = manager.get_task(first.task.id).await.unwrap();
    let b = manager.get_task(second.task.id).await.unwrap();
    let statuses = [a.steps[0].status, b.steps[0].status];
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == StepStatus::Running)
            .count(),
        1,
        "exactly one step may hold the agent"
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == StepStatus::Pending)
            .count(),
        1,
        "the other step waits without failing"
    );

    // Releasing the provider lets both tasks finish, one after the other.
    gate.add_permits(2);
    wait_for(&manager, first.task.id, |r| {
        r.task.status == TaskStatus::Completed
    })
    .await;
    wait_for(&manager, second.task.id, |r| {
        r.task.status == TaskStatus::Completed
    })
    .await;
}

#[tokio::test]
async fn test_empty_goal_is_rejected_before_any_state_change() {
    let manager = TaskManager::builder(Arc::new(LoopbackProvider)).build();
    let err = manager
        .create_task("   ", CreateTaskOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Validation(_)));
    assert!(manager.list_tasks().await.is_empty());
    assert!(manager.bus().is_empty().await);
}
