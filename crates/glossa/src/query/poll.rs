//! Client-side polling helpers.
//!
//! The record stores are the single source of truth: a poller keeps no state
//! of its own and simply re-reads until the record is terminal.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::jobs::JobSnapshot;
use crate::query::StatusQuery;
use crate::tasks::TaskSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The record reached a terminal state.
    Terminal(T),
    /// The caller stopped polling first.
    Cancelled,
}

/// Re-reads a job every `interval` until it is terminal or `token` fires.
pub async fn poll_job_until_terminal(
    query: &StatusQuery,
    job_id: &str,
    interval: Duration,
    token: CancellationToken,
) -> Result<PollOutcome<JobSnapshot>, EngineError> {
    poll_until(|| query.get_job(job_id), JobSnapshot::is_terminal, interval, token).await
}

/// Re-reads a task every `interval` until it is terminal or `token` fires.
pub async fn poll_task_until_terminal(
    query: &StatusQuery,
    task_id: &str,
    interval: Duration,
    token: CancellationToken,
) -> Result<PollOutcome<TaskSnapshot>, EngineError> {
    poll_until(|| query.get_task(task_id), TaskSnapshot::is_terminal, interval, token).await
}

async fn poll_until<T, R, D>(
    read: R,
    done: D,
    interval: Duration,
    token: CancellationToken,
) -> Result<PollOutcome<T>, EngineError>
where
    R: Fn() -> Result<T, EngineError>,
    D: Fn(&T) -> bool,
{
    loop {
        if token.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        let snapshot = read()?;
        if done(&snapshot) {
            return Ok(PollOutcome::Terminal(snapshot));
        }

        tokio::select! {
            _ = token.cancelled() => return Ok(PollOutcome::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Whether a client showing this job list still has something to wait for.
pub fn has_active_jobs(jobs: &[JobSnapshot]) -> bool {
    jobs.iter().any(|job| !job.is_terminal())
}
