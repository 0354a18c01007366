pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod jobs;
mod lock;
pub mod query;
pub mod source;
pub mod tasks;
pub mod telemetry;
pub mod worker;

pub use config::{load_config, EngineConfig, LogFormat};
pub use db::{Database, DatabaseError};
pub use engine::Engine;
pub use error::{ConfigError, EngineError, EnumerationError, ItemError, Result, WorkerError};
pub use jobs::{
    CancellationController, ItemFailure, Job, JobId, JobKind, JobScheduler, JobSnapshot,
    JobStatus, JobStore,
};
pub use query::{
    has_active_jobs, poll_job_until_terminal, poll_task_until_terminal, PollOutcome, StatusQuery,
};
pub use source::{ItemExecutor, ItemId, ProjectId, WorkEnumerator};
pub use tasks::{Task, TaskId, TaskKind, TaskSnapshot, TaskStatus, TaskStore, TaskTracker};
pub use telemetry::init_logging;
