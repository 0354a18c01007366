//! Top-level handle wiring the stores, pools and query service together.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{loader::validate_config, EngineConfig};
use crate::db::Database;
use crate::error::Result;
use crate::jobs::{
    CancellationController, JobKind, JobScheduler, JobSnapshot, JobStatus, JobStore,
};
use crate::query::StatusQuery;
use crate::source::{ItemExecutor, ItemId, ProjectId, WorkEnumerator};
use crate::tasks::{TaskKind, TaskSnapshot, TaskStatus, TaskStore, TaskTracker};

const RESTART_MESSAGE: &str = "interrupted by engine restart";

pub struct Engine {
    config: EngineConfig,
    jobs: Arc<JobStore>,
    tasks: Arc<TaskStore>,
    scheduler: JobScheduler,
    tracker: TaskTracker,
    cancellation: CancellationController,
    query: StatusQuery,
}

impl Engine {
    /// Opens the record stores, recovers work left by a previous process and
    /// starts both worker pools.
    pub fn start(
        config: EngineConfig,
        enumerator: Arc<dyn WorkEnumerator>,
        executor: Arc<dyn ItemExecutor>,
    ) -> Result<Self> {
        validate_config(&config)?;

        let jobs = Arc::new(JobStore::new());
        let tasks = Arc::new(TaskStore::new());

        if let Some(path) = &config.database_path {
            let db = Database::open(path)?;
            jobs.set_database(db.clone());
            tasks.set_database(db);
            jobs.load_from_database()?;
            tasks.load_from_database()?;
        }

        let scheduler = JobScheduler::new(
            Arc::clone(&jobs),
            Arc::clone(&enumerator),
            Arc::clone(&executor),
            config.job_workers,
            config.max_failure_details,
        )?;
        let tracker = TaskTracker::new(
            Arc::clone(&tasks),
            enumerator,
            executor,
            config.task_workers,
        )?;

        let engine = Self {
            cancellation: CancellationController::new(Arc::clone(&jobs)),
            query: StatusQuery::new(Arc::clone(&jobs), Arc::clone(&tasks)),
            config,
            jobs,
            tasks,
            scheduler,
            tracker,
        };
        engine.recover();

        info!(
            job_workers = engine.config.job_workers,
            task_workers = engine.config.task_workers,
            persistent = engine.config.database_path.is_some(),
            "Engine started"
        );
        Ok(engine)
    }

    /// Settles records left behind by a previous process. Running work is
    /// failed rather than resumed; pending jobs are queued again.
    fn recover(&self) {
        let now = Utc::now();

        for job_id in self.jobs.ids_with_status(JobStatus::Running) {
            if let Some(job) = self.jobs.current(&job_id) {
                warn!(job_id = %job_id, "Failing job interrupted by restart");
                self.jobs.commit(job.failed(RESTART_MESSAGE, now));
            }
        }

        for status in [TaskStatus::Pending, TaskStatus::Started] {
            for task_id in self.tasks.ids_with_status(status) {
                if let Some(task) = self.tasks.current(&task_id) {
                    warn!(task_id = %task_id, "Failing task interrupted by restart");
                    self.tasks.commit(task.failed(RESTART_MESSAGE, now));
                }
            }
        }

        let pending = self.jobs.ids_with_status(JobStatus::Pending);
        if !pending.is_empty() {
            info!("Re-queueing {} pending jobs", pending.len());
        }
        for job_id in pending {
            if let Err(e) = self.scheduler.enqueue(&job_id) {
                warn!(job_id = %job_id, "Could not re-queue job: {}", e);
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_job(&self, project_id: ProjectId, kind: JobKind) -> Result<JobSnapshot> {
        self.scheduler.submit(project_id, kind)
    }

    pub fn list_jobs(&self, project_id: ProjectId) -> Vec<JobSnapshot> {
        self.query.list_jobs(project_id)
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobSnapshot> {
        self.query.get_job(job_id)
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<JobSnapshot> {
        self.cancellation.request_cancel(job_id)
    }

    pub fn submit_task(&self, item_id: ItemId, kind: TaskKind) -> Result<TaskSnapshot> {
        self.tracker.submit(item_id, kind)
    }

    pub fn get_task(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.query.get_task(task_id)
    }

    pub fn purge_tasks_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.tracker.purge_finished_before(cutoff)
    }

    /// Read handle for pollers; it stays valid after the engine shuts down.
    pub fn query(&self) -> StatusQuery {
        self.query.clone()
    }

    /// Stops both pools. Jobs stop at their next item boundary; queued work
    /// stays `Pending` and is picked up by the next start.
    pub fn shutdown(self) {
        info!("Shutting down engine...");
        self.scheduler.shutdown();
        self.tracker.shutdown();
        info!("Engine stopped");
    }
}
