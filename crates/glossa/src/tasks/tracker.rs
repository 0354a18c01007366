use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{EngineError, WorkerError};
use crate::source::{ItemExecutor, ItemId, WorkEnumerator};
use crate::tasks::model::{Task, TaskId, TaskKind, TaskSnapshot, TaskStatus};
use crate::tasks::store::TaskStore;
use crate::worker::WorkerPool;

/// Runs single-item tasks on a pool of its own, so interactive requests
/// never queue behind batch jobs.
pub struct TaskTracker {
    store: Arc<TaskStore>,
    enumerator: Arc<dyn WorkEnumerator>,
    pool: WorkerPool<TaskId>,
}

impl TaskTracker {
    pub fn new(
        store: Arc<TaskStore>,
        enumerator: Arc<dyn WorkEnumerator>,
        executor: Arc<dyn ItemExecutor>,
        worker_count: usize,
    ) -> Result<Self, WorkerError> {
        let worker_store = Arc::clone(&store);
        let pool = WorkerPool::new("task", worker_count, move |worker_id, task_id: TaskId| {
            debug!(worker_id, task_id = %task_id, "Task claimed by worker");
            run_task(&worker_store, executor.as_ref(), &task_id);
        })?;

        Ok(Self {
            store,
            enumerator,
            pool,
        })
    }

    /// Creates a `Pending` task and queues it for immediate execution.
    pub fn submit(&self, item_id: ItemId, kind: TaskKind) -> Result<TaskSnapshot, EngineError> {
        if !self.enumerator.item_exists(item_id) {
            return Err(EngineError::Validation(format!(
                "Item {} does not exist",
                item_id
            )));
        }
        if self.pool.is_shutdown() {
            return Err(WorkerError::ChannelClosed.into());
        }

        let snapshot = self.store.insert(Task::new(item_id, kind))?;
        info!(task_id = %snapshot.id, item_id, kind = %kind, "Task submitted");

        if let Err(e) = self.pool.submit(snapshot.id.clone()) {
            warn!(task_id = %snapshot.id, "Failed to queue task: {}", e);
            if let Some(current) = self.store.current(&snapshot.id) {
                self.store.commit(current.failed(e.to_string(), Utc::now()));
            }
            return Err(e.into());
        }
        Ok(snapshot)
    }

    /// Removes finished tasks older than `cutoff`. Returns how many were dropped.
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, EngineError> {
        let removed = self.store.remove_finished_before(cutoff)?;
        if removed > 0 {
            info!("Purged {} finished tasks", removed);
        }
        Ok(removed)
    }

    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}

fn run_task(store: &TaskStore, executor: &dyn ItemExecutor, task_id: &str) {
    let task = match store.current(task_id) {
        Some(task) if task.status == TaskStatus::Pending => task,
        Some(task) => {
            debug!(task_id, status = %task.status, "Skipping task that is not pending");
            return;
        }
        None => {
            warn!(task_id, "Claimed task no longer exists");
            return;
        }
    };

    store.commit(task.started(Utc::now()));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(task.item_id, task.kind)));

    let Some(started) = store.current(task_id) else {
        return;
    };
    let finished = match outcome {
        Ok(Ok(result)) => started.succeeded(result, Utc::now()),
        Ok(Err(e)) => {
            warn!(task_id, item_id = task.item_id, "Task failed: {}", e);
            started.failed(e.message, Utc::now())
        }
        Err(_) => {
            warn!(task_id, item_id = task.item_id, "Task executor panicked");
            started.failed(format!("processing of item {} panicked", task.item_id), Utc::now())
        }
    };

    let snapshot = store.commit(finished);
    info!(task_id, status = %snapshot.status, "Task finished");
}
