use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::source::ItemId;

pub type TaskId = String;

/// Operation applied to a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Analyze,
    Translate,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Analyze => "analyze",
            TaskKind::Translate => "translate",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analyze" => Ok(TaskKind::Analyze),
            "translate" => Ok(TaskKind::Translate),
            other => Err(EngineError::Validation(format!("Unknown task kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Started => "started",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "started" => Some(TaskStatus::Started),
            "success" => Some(TaskStatus::Success),
            "failure" => Some(TaskStatus::Failure),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Started)
                | (TaskStatus::Pending, TaskStatus::Failure)
                | (TaskStatus::Started, TaskStatus::Success)
                | (TaskStatus::Started, TaskStatus::Failure)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-item operation. Like `Job`, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub item_id: ItemId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(item_id: ItemId, kind: TaskKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            item_id,
            kind,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn started(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Started,
            started_at: Some(now),
            ..self.clone()
        }
    }

    pub fn succeeded(&self, result: Value, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Success,
            result: Some(result),
            error: None,
            finished_at: Some(now),
            ..self.clone()
        }
    }

    pub fn failed(&self, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Failure,
            result: None,
            error: Some(error.into()),
            finished_at: Some(now),
            ..self.clone()
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            item_id: self.item_id,
            kind: self.kind,
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub item_id: ItemId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
