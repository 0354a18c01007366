use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Item-level failures never appear here: they are counted on the job and
/// observed by polling its snapshot.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Job '{job_id}' is already {status} and cannot be cancelled")]
    NotCancellable { job_id: String, status: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl EngineError {
    pub fn job_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "Job",
            id: id.to_string(),
        }
    }

    pub fn task_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "Task",
            id: id.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

/// A single work item could not be processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ItemError {
    pub message: String,
}

impl ItemError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The work enumerator itself failed; fatal to the job that asked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to enumerate work items: {message}")]
pub struct EnumerationError {
    pub message: String,
}

impl EnumerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
