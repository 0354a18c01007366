//! Test harness for isolated engine runs.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use glossa::{Engine, EngineConfig, JobSnapshot, StatusQuery, TaskSnapshot};

use super::FakeLibrary;

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestHarness {
    temp_dir: TempDir,
    pub library: Arc<FakeLibrary>,
    pub config: EngineConfig,
}

impl TestHarness {
    /// In-memory engine with one job worker and one task worker.
    pub fn new(library: FakeLibrary) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            temp_dir,
            library: Arc::new(library),
            config: EngineConfig {
                job_workers: 1,
                task_workers: 1,
                poll_interval_ms: 10,
                ..EngineConfig::default()
            },
        }
    }

    /// Same as `new`, with records persisted under the temp directory.
    pub fn persistent(library: FakeLibrary) -> Self {
        let mut harness = Self::new(library);
        harness.config.database_path = Some(harness.db_path());
        harness
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("data").join("glossa.db")
    }

    pub fn start(&self) -> Engine {
        Engine::start(
            self.config.clone(),
            self.library.clone(),
            self.library.clone(),
        )
        .expect("Failed to start engine")
    }
}

/// Polls `condition` until it holds. Panics after the timeout.
pub fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn wait_for_job(query: &StatusQuery, job_id: &str) -> JobSnapshot {
    let mut last = None;
    wait_until("job to finish", || {
        let snapshot = query.get_job(job_id).expect("job exists");
        let done = snapshot.is_terminal();
        last = Some(snapshot);
        done
    });
    last.expect("at least one read")
}

pub fn wait_for_task(query: &StatusQuery, task_id: &str) -> TaskSnapshot {
    let mut last = None;
    wait_until("task to finish", || {
        let snapshot = query.get_task(task_id).expect("task exists");
        let done = snapshot.is_terminal();
        last = Some(snapshot);
        done
    });
    last.expect("at least one read")
}
