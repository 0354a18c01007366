use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: String,
    /// Threads running batch jobs, one job each at a time.
    #[serde(default = "default_job_workers")]
    pub job_workers: usize,
    /// Threads running single-item tasks. Kept apart from the job pool so a
    /// long batch never holds up an interactive request.
    #[serde(default = "default_task_workers")]
    pub task_workers: usize,
    /// Upper bound on `(item_id, error)` pairs kept per job.
    #[serde(default = "default_max_failure_details")]
    pub max_failure_details: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// SQLite file backing the record stores. `None` keeps everything in memory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_job_workers() -> usize {
    num_cpus::get()
}

fn default_task_workers() -> usize {
    2
}

fn default_max_failure_details() -> usize {
    20
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl EngineConfig {
    /// Defaults, with records kept in the per-user database file.
    pub fn persistent() -> Self {
        Self {
            database_path: crate::db::default_database_path(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            job_workers: default_job_workers(),
            task_workers: default_task_workers(),
            max_failure_details: default_max_failure_details(),
            poll_interval_ms: default_poll_interval_ms(),
            database_path: None,
            log_format: LogFormat::default(),
        }
    }
}
