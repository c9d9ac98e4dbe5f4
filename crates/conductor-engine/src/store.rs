use chrono::Utc;
use conductor_core::{
    ConductorError, ConductorResult, StepStatus, Task, TaskStep, WorkflowExecution,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A task together with its owned steps and optional workflow binding.
///
/// The task exclusively owns its steps: removing the record removes them
/// all. Steps reference agents and approvals by id only.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// The task itself.
    pub task: Task,
    /// Owned steps, ordered by step number.
    pub steps: Vec<TaskStep>,
    /// The workflow execution this task was instantiated from, if any.
    pub execution: Option<WorkflowExecution>,
}

impl TaskRecord {
    /// The lowest-numbered step that does not unblock its successors yet —
    /// the step the scheduler should look at next.
    pub fn first_actionable_step(&self) -> Option<&TaskStep> {
        self.steps
            .iter()
            .find(|s| !s.status.unblocks_successors() && s.status != StepStatus::Cancelled)
    }

    /// Mutable access to a step by id.
    pub fn step_mut(&mut self, step_id: Uuid) -> Option<&mut TaskStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    /// Completion percentage: `completed / total * 100`, clamped monotone —
    /// the stored value never decreases while the task is not terminal.
    pub fn recompute_progress(&mut self) {
        if self.steps.is_empty() {
            self.task.progress = 100;
            return;
        }
        let completed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let pct = (completed * 100 / self.steps.len()) as u8;
        self.task.progress = self.task.progress.max(pct);
    }
}

/// In-memory store of all task records: the only shared mutable task state.
///
/// Reads hand out snapshots; writes go through closures under the write
/// lock, so each mutation is a single atomic section.
pub struct TaskStore {
    records: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new record.
    pub async fn insert(&self, record: TaskRecord) {
        self.records.write().await.insert(record.task.id, record);
    }

    /// Snapshot of one record.
    pub async fn get(&self, task_id: Uuid) -> ConductorResult<TaskRecord> {
        self.records
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or_else(|| ConductorError::NotFound(format!("task {task_id}")))
    }

    /// Snapshot of all records, newest first.
    pub async fn list(&self) -> Vec<TaskRecord> {
        let mut all: Vec<TaskRecord> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.task.created_at.cmp(&a.task.created_at));
        all
    }

    /// Run a mutation against one record under the write lock.
    pub async fn with_record<R>(
        &self,
        task_id: Uuid,
        f: impl FnOnce(&mut TaskRecord) -> R,
    ) -> ConductorResult<R> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&task_id)
            .ok_or_else(|| ConductorError::NotFound(format!("task {task_id}")))?;
        Ok(f(record))
    }

    /// Remove a record and its steps (cascade).
    pub async fn remove(&self, task_id: Uuid) -> ConductorResult<TaskRecord> {
        self.records
            .write()
            .await
            .remove(&task_id)
            .ok_or_else(|| ConductorError::NotFound(format!("task {task_id}")))
    }

    /// Number of stored tasks.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a record from a task and its steps, fixing the invariant that step
/// numbers form a contiguous 1-based sequence.
pub fn new_record(task: Task, mut steps: Vec<TaskStep>, execution: Option<WorkflowExecution>) -> TaskRecord {
    steps.sort_by_key(|s| s.number);
    for (index, step) in steps.iter_mut().enumerate() {
        step.number = index as u32 + 1;
        step.task_id = task.id;
    }
    TaskRecord {
        task,
        steps,
        execution,
    }
}

/// Mark a step terminal with the given status, stamping `completed_at`.
pub fn finish_step(step: &mut TaskStep, status: StepStatus) {
    step.status = status;
    step.completed_at = Some(Utc::now());
}
