//! Per-item counter updates for a running job.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ItemError;
use crate::jobs::model::{ItemFailure, JobId, JobSnapshot, JobStatus};
use crate::jobs::store::JobStore;
use crate::source::ItemId;

/// Result of processing one item.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ItemOutcome {
    /// The executor's payload, folded into the job summary.
    Succeeded(Value),
    Failed(ItemError),
}

/// Records item outcomes for a single job.
///
/// Owned by the worker running that job, which is the only writer of its
/// counters.
pub(crate) struct ProgressTracker {
    store: Arc<JobStore>,
    job_id: JobId,
    max_failure_details: usize,
}

impl ProgressTracker {
    pub(crate) fn new(store: Arc<JobStore>, job_id: JobId, max_failure_details: usize) -> Self {
        Self {
            store,
            job_id,
            max_failure_details,
        }
    }

    /// Publishes the outcome of one item as a single atomic record update.
    ///
    /// # Panics
    /// Panics if the job is not `Running` or if every item has already been
    /// accounted for.
    pub(crate) fn record_outcome(&self, item_id: ItemId, outcome: ItemOutcome) -> JobSnapshot {
        let current = match self.store.current(&self.job_id) {
            Some(job) => job,
            None => panic!("progress recorded for unknown job {}", self.job_id),
        };
        assert_eq!(
            current.status,
            JobStatus::Running,
            "progress recorded for job {} while {}",
            self.job_id,
            current.status
        );

        let now = Utc::now();
        let next = match outcome {
            ItemOutcome::Succeeded(payload) => {
                debug!(job_id = %self.job_id, item_id, "Item processed");
                current.item_succeeded(&payload, now)
            }
            ItemOutcome::Failed(err) => {
                warn!(job_id = %self.job_id, item_id, "Item failed: {}", err);
                let failure = ItemFailure {
                    item_id,
                    error: err.message,
                };
                current.item_failed(failure, self.max_failure_details, now)
            }
        };

        self.store.commit(next)
    }
}
