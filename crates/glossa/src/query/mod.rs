//! Read-only access to job and task state.

pub mod poll;

use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::jobs::{JobSnapshot, JobStore};
use crate::source::ProjectId;
use crate::tasks::{TaskSnapshot, TaskStore};

pub use poll::{has_active_jobs, poll_job_until_terminal, poll_task_until_terminal, PollOutcome};

/// Side-effect-free snapshot reads. Cheap to clone.
#[derive(Clone)]
pub struct StatusQuery {
    jobs: Arc<JobStore>,
    tasks: Arc<TaskStore>,
}

impl StatusQuery {
    pub fn new(jobs: Arc<JobStore>, tasks: Arc<TaskStore>) -> Self {
        Self { jobs, tasks }
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobSnapshot, EngineError> {
        self.jobs
            .get_with_fallback(job_id)
            .ok_or_else(|| EngineError::job_not_found(job_id))
    }

    pub fn get_task(&self, task_id: &str) -> Result<TaskSnapshot, EngineError> {
        self.tasks
            .get_with_fallback(task_id)
            .ok_or_else(|| EngineError::task_not_found(task_id))
    }

    /// Jobs of a project, newest first.
    pub fn list_jobs(&self, project_id: ProjectId) -> Vec<JobSnapshot> {
        self.jobs.list_by_project(project_id)
    }

    /// Running jobs with no recorded progress for longer than `threshold`.
    pub fn stalled_jobs(&self, threshold: Duration) -> Vec<JobSnapshot> {
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => self.jobs.stalled(threshold),
            Err(_) => Vec::new(),
        }
    }
}
