use std::sync::Arc;

use tracing::info;

use crate::error::EngineError;
use crate::jobs::model::JobSnapshot;
use crate::jobs::store::JobStore;

/// Records cancellation requests.
///
/// Only the flag is written here. The worker running the job observes it at
/// its next checkpoint and performs the transition to `Cancelled` itself.
#[derive(Clone)]
pub struct CancellationController {
    store: Arc<JobStore>,
}

impl CancellationController {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    /// Idempotent while the job is live; fails once it is terminal.
    pub fn request_cancel(&self, job_id: &str) -> Result<JobSnapshot, EngineError> {
        let snapshot = self.store.request_cancel(job_id)?;
        info!(job_id, status = %snapshot.status, "Cancellation requested");
        Ok(snapshot)
    }

    pub fn is_cancel_requested(&self, job_id: &str) -> bool {
        self.store.is_cancel_requested(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{Job, JobKind, JobStatus};
    use chrono::Utc;

    #[test]
    fn test_cancel_is_idempotent() {
        let store = Arc::new(JobStore::new());
        let snapshot = store.insert(Job::new(1, JobKind::AnalyzeChapters)).unwrap();
        let controller = CancellationController::new(Arc::clone(&store));

        let first = controller.request_cancel(&snapshot.id).unwrap();
        let second = controller.request_cancel(&snapshot.id).unwrap();
        assert_eq!(first, second);
        assert!(controller.is_cancel_requested(&snapshot.id));
        assert_eq!(second.status, JobStatus::Pending);
    }

    #[test]
    fn test_cancel_terminal_job_fails() {
        let store = Arc::new(JobStore::new());
        let snapshot = store.insert(Job::new(1, JobKind::AnalyzeChapters)).unwrap();
        let now = Utc::now();
        store.commit(store.current(&snapshot.id).unwrap().failed("boom", now));

        let controller = CancellationController::new(store);
        let err = controller.request_cancel(&snapshot.id).unwrap_err();
        assert!(err.to_string().contains("already failed"));
    }

    #[test]
    fn test_cancel_unknown_job() {
        let controller = CancellationController::new(Arc::new(JobStore::new()));
        assert!(matches!(
            controller.request_cancel("ghost"),
            Err(EngineError::NotFound { .. })
        ));
        assert!(!controller.is_cancel_requested("ghost"));
    }
}
