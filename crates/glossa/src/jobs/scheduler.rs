//! Batch job submission and the worker loop that drives a job to a terminal state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, ItemError, WorkerError};
use crate::jobs::model::{Job, JobId, JobKind, JobSnapshot, JobStatus};
use crate::jobs::progress::{ItemOutcome, ProgressTracker};
use crate::jobs::store::JobStore;
use crate::source::{ItemExecutor, ItemId, ProjectId, WorkEnumerator};
use crate::tasks::TaskKind;
use crate::worker::WorkerPool;

pub(crate) const SHUTDOWN_MESSAGE: &str = "interrupted by engine shutdown";
pub(crate) const ENUMERATION_PANIC_MESSAGE: &str = "enumeration of work items panicked";

/// Accepts batch jobs and hands them to a dedicated worker pool.
pub struct JobScheduler {
    store: Arc<JobStore>,
    enumerator: Arc<dyn WorkEnumerator>,
    pool: WorkerPool<JobId>,
    stopping: Arc<AtomicBool>,
}

impl JobScheduler {
    pub fn new(
        store: Arc<JobStore>,
        enumerator: Arc<dyn WorkEnumerator>,
        executor: Arc<dyn ItemExecutor>,
        worker_count: usize,
        max_failure_details: usize,
    ) -> Result<Self, WorkerError> {
        let stopping = Arc::new(AtomicBool::new(false));
        let runner = JobRunner {
            store: Arc::clone(&store),
            enumerator: Arc::clone(&enumerator),
            executor,
            max_failure_details,
            stopping: Arc::clone(&stopping),
        };

        let pool = WorkerPool::new("job", worker_count, move |worker_id, job_id: JobId| {
            debug!(worker_id, job_id = %job_id, "Job claimed by worker");
            runner.run(&job_id);
        })?;

        Ok(Self {
            store,
            enumerator,
            pool,
            stopping,
        })
    }

    /// Creates a `Pending` job and queues it. Returns as soon as the job is
    /// recorded; the work itself runs on a job worker.
    pub fn submit(&self, project_id: ProjectId, kind: JobKind) -> Result<JobSnapshot, EngineError> {
        if !self.enumerator.project_exists(project_id) {
            return Err(EngineError::Validation(format!(
                "Project {} does not exist",
                project_id
            )));
        }
        if self.pool.is_shutdown() {
            return Err(WorkerError::ChannelClosed.into());
        }

        let snapshot = self.store.insert(Job::new(project_id, kind))?;
        info!(job_id = %snapshot.id, project_id, kind = %kind, "Job submitted");

        self.enqueue(&snapshot.id)?;
        Ok(snapshot)
    }

    /// Queues an existing `Pending` job. If the queue is closed the job is
    /// failed so that it does not stay `Pending` forever.
    pub(crate) fn enqueue(&self, job_id: &str) -> Result<(), EngineError> {
        if let Err(e) = self.pool.submit(job_id.to_string()) {
            error!(job_id, "Failed to queue job: {}", e);
            if let Some(current) = self.store.current(job_id) {
                if current.status == JobStatus::Pending {
                    self.store.commit(current.failed(e.to_string(), Utc::now()));
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Stops accepting jobs. Running jobs stop at their next item boundary.
    pub fn shutdown(self) {
        self.stopping.store(true, Ordering::Release);
        self.pool.shutdown();
        self.pool.wait();
    }
}

struct JobRunner {
    store: Arc<JobStore>,
    enumerator: Arc<dyn WorkEnumerator>,
    executor: Arc<dyn ItemExecutor>,
    max_failure_details: usize,
    stopping: Arc<AtomicBool>,
}

impl JobRunner {
    fn run(&self, job_id: &str) {
        let job = match self.store.current(job_id) {
            Some(job) => job,
            None => {
                warn!(job_id, "Claimed job no longer exists");
                return;
            }
        };
        if job.status != JobStatus::Pending {
            debug!(job_id, status = %job.status, "Skipping job that is not pending");
            return;
        }

        if self.store.is_cancel_requested(job_id) {
            self.store.commit(job.cancelled(Utc::now()));
            info!(job_id, "Job cancelled before it started");
            return;
        }

        let running = self.store.commit(job.running(Utc::now()));
        info!(job_id, project_id = running.project_id, kind = %running.kind, "Job started");

        let items = match self.enumerate(running.project_id, running.kind) {
            Ok(items) => items,
            Err(message) => {
                error!(job_id, "Job failed: {}", message);
                self.commit_from_current(job_id, |job| job.failed(message, Utc::now()));
                return;
            }
        };

        let total = u32::try_from(items.len()).unwrap_or(u32::MAX);
        self.commit_from_current(job_id, |job| job.with_total(total, Utc::now()));
        debug!(job_id, total, "Work items enumerated");

        let tracker = ProgressTracker::new(
            Arc::clone(&self.store),
            job_id.to_string(),
            self.max_failure_details,
        );
        let item_kind = running.kind.item_kind();

        for item_id in items.into_iter().take(total as usize) {
            if self.store.is_cancel_requested(job_id) {
                let snapshot = self.commit_from_current(job_id, |job| job.cancelled(Utc::now()));
                info!(
                    job_id,
                    processed = snapshot.map(|s| s.processed_items + s.failed_items),
                    total,
                    "Job cancelled"
                );
                return;
            }
            if self.stopping.load(Ordering::Acquire) {
                warn!(job_id, "Job stopped by engine shutdown");
                self.commit_from_current(job_id, |job| job.failed(SHUTDOWN_MESSAGE, Utc::now()));
                return;
            }

            let outcome = match self.execute(item_id, item_kind) {
                Ok(payload) => ItemOutcome::Succeeded(payload),
                Err(e) => ItemOutcome::Failed(e),
            };
            tracker.record_outcome(item_id, outcome);
        }

        if let Some(snapshot) = self.commit_from_current(job_id, |job| job.completed(Utc::now())) {
            info!(
                job_id,
                processed = snapshot.processed_items,
                failed = snapshot.failed_items,
                "Job completed"
            );
        }
    }

    /// Lists the job's items. A panicking enumerator fails the job like an
    /// enumeration error does.
    fn enumerate(&self, project_id: ProjectId, kind: JobKind) -> Result<Vec<ItemId>, String> {
        match panic::catch_unwind(AssertUnwindSafe(|| {
            self.enumerator.enumerate(project_id, kind)
        })) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(ENUMERATION_PANIC_MESSAGE.to_string()),
        }
    }

    /// Runs one item. A panicking executor counts as a failed item.
    fn execute(&self, item_id: ItemId, kind: TaskKind) -> Result<serde_json::Value, ItemError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.executor.execute(item_id, kind))) {
            Ok(result) => result,
            Err(_) => Err(ItemError::new(format!("processing of item {} panicked", item_id))),
        }
    }

    fn commit_from_current<F>(&self, job_id: &str, next: F) -> Option<JobSnapshot>
    where
        F: FnOnce(&Job) -> Job,
    {
        let current = self.store.current(job_id)?;
        Some(self.store.commit(next(&current)))
    }
}
