//! Batch job entity, its lifecycle and the snapshot served to pollers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::EngineError;
use crate::source::{ItemId, ProjectId};
use crate::tasks::TaskKind;

pub type JobId = String;

/// What a batch job does to each of its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    AnalyzeChapters,
    TranslateChapters,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AnalyzeChapters => "analyze_chapters",
            JobKind::TranslateChapters => "translate_chapters",
        }
    }

    /// The per-item operation run for each enumerated item.
    pub fn item_kind(&self) -> TaskKind {
        match self {
            JobKind::AnalyzeChapters => TaskKind::Analyze,
            JobKind::TranslateChapters => TaskKind::Translate,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analyze" | "analyze_chapters" => Ok(JobKind::AnalyzeChapters),
            "translate" | "translate_chapters" => Ok(JobKind::TranslateChapters),
            other => Err(EngineError::Validation(format!("Unknown job kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            JobStatus::Pending | JobStatus::Running => false,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => true,
        }
    }

    /// Status moves forward only; terminal states have no successors.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running)
            | (JobStatus::Pending, JobStatus::Cancelled)
            | (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed item kept for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub item_id: ItemId,
    pub error: String,
}

/// Full job record as held by the store.
///
/// Values are never mutated in place: every change produces a new `Job`
/// that replaces the previous one atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_items: u32,
    pub processed_items: u32,
    pub failed_items: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last time the owning worker wrote this record.
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    /// Bounded list of failed items, in processing order.
    pub failures: Vec<ItemFailure>,
    /// Numeric fields of successful item payloads, summed per key.
    pub result: Option<Value>,
}

impl Job {
    pub fn new(project_id: ProjectId, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id,
            kind,
            status: JobStatus::Pending,
            total_items: 0,
            processed_items: 0,
            failed_items: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error_message: None,
            failures: Vec::new(),
            result: None,
        }
    }

    pub fn finished_items(&self) -> u32 {
        self.processed_items + self.failed_items
    }

    pub fn progress_percentage(&self) -> u8 {
        progress_percentage(self.status, self.finished_items(), self.total_items)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn running(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Running,
            started_at: Some(now),
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn with_total(&self, total_items: u32, now: DateTime<Utc>) -> Self {
        Self {
            total_items,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn item_succeeded(&self, payload: &Value, now: DateTime<Utc>) -> Self {
        Self {
            processed_items: self.processed_items + 1,
            result: accumulate_result(self.result.as_ref(), payload),
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn item_failed(&self, failure: ItemFailure, max_details: usize, now: DateTime<Utc>) -> Self {
        let mut failures = self.failures.clone();
        if failures.len() < max_details {
            failures.push(failure);
        }
        Self {
            failed_items: self.failed_items + 1,
            failures,
            updated_at: now,
            ..self.clone()
        }
    }

    /// All items processed. Partial failure still completes the job; the
    /// summary goes into `error_message`.
    pub fn completed(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Completed,
            completed_at: Some(now),
            updated_at: now,
            error_message: summarize_failures(self.failed_items, self.total_items, &self.failures),
            ..self.clone()
        }
    }

    pub fn failed(&self, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Failed,
            completed_at: Some(now),
            updated_at: now,
            error_message: Some(error.into()),
            ..self.clone()
        }
    }

    pub fn cancelled(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Cancelled,
            completed_at: Some(now),
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn snapshot(&self, cancel_requested: bool) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            project_id: self.project_id,
            kind: self.kind,
            status: self.status,
            total_items: self.total_items,
            processed_items: self.processed_items,
            failed_items: self.failed_items,
            progress_percentage: self.progress_percentage(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_message: self.error_message.clone(),
            cancel_requested,
            failures: self.failures.clone(),
            result: self.result.clone(),
        }
    }
}

/// Percentage of items finished.
///
/// Terminal jobs always report 100. Before the item count is known a live
/// job reports 0, so the value never goes backwards.
pub fn progress_percentage(status: JobStatus, finished: u32, total: u32) -> u8 {
    if status.is_terminal() {
        return 100;
    }
    if total == 0 {
        return 0;
    }
    let finished = u64::from(finished.min(total));
    let total = u64::from(total);
    ((finished * 200 + total) / (total * 2)) as u8
}

/// Aggregate message for a job that finished with failed items.
pub fn summarize_failures(failed: u32, total: u32, failures: &[ItemFailure]) -> Option<String> {
    if failed == 0 {
        return None;
    }
    let mut message = format!("{} of {} items failed", failed, total);
    if let Some(first) = failures.first() {
        message.push_str(&format!(
            "; first failure: item {}: {}",
            first.item_id, first.error
        ));
    }
    Some(message)
}

/// Folds one item payload into the job summary.
///
/// Every numeric top-level field except `itemId` is added to the total kept
/// under the same key. Other fields and non-object payloads are ignored.
pub fn accumulate_result(summary: Option<&Value>, payload: &Value) -> Option<Value> {
    let Some(fields) = payload.as_object() else {
        return summary.cloned();
    };
    let mut totals = match summary {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    for (key, value) in fields {
        if key == "itemId" || !value.is_number() {
            continue;
        }
        let sum = add_numbers(totals.get(key), value);
        totals.insert(key.clone(), sum);
    }
    if totals.is_empty() {
        None
    } else {
        Some(Value::Object(totals))
    }
}

fn add_numbers(current: Option<&Value>, value: &Value) -> Value {
    let current = current.cloned().unwrap_or_else(|| Value::from(0u64));
    if let (Some(a), Some(b)) = (current.as_u64(), value.as_u64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::from(sum);
        }
    }
    if let (Some(a), Some(b)) = (current.as_i64(), value.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::from(sum);
        }
    }
    let sum = current.as_f64().unwrap_or(0.0) + value.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).map(Value::Number).unwrap_or(current)
}

/// Read-only view of a job returned by every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub project_id: ProjectId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_items: u32,
    pub processed_items: u32,
    pub failed_items: u32,
    pub progress_percentage: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
