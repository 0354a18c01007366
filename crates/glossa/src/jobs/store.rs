//! Job record store: in-memory records with write-through persistence.
//!
//! Each record is an `Arc<Job>` behind its own lock and is replaced whole,
//! so a reader sees either the previous or the next state of a job, never a
//! mix. The cancel flag lives beside the record in an atomic and is written
//! through its own path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::db::job_repo::{self, JobRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::EngineError;
use crate::jobs::model::{ItemFailure, Job, JobId, JobKind, JobSnapshot, JobStatus};
use crate::lock::{read_lock, write_lock};
use crate::source::ProjectId;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn to_row(job: &Job, cancel_requested: bool) -> Result<JobRow, DatabaseError> {
    let failures = if job.failures.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&job.failures).map_err(|e| DatabaseError::Json {
                column: "failures",
                source: e,
            })?,
        )
    };

    let result = job
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::Json {
            column: "result",
            source: e,
        })?;

    Ok(JobRow {
        id: job.id.clone(),
        project_id: job.project_id,
        kind: job.kind.as_str().to_string(),
        status: job.status.as_str().to_string(),
        total_items: job.total_items,
        processed_items: job.processed_items,
        failed_items: job.failed_items,
        error_message: job.error_message.clone(),
        failures,
        result,
        cancel_requested,
        created_at: format_timestamp(job.created_at),
        started_at: job.started_at.map(format_timestamp),
        completed_at: job.completed_at.map(format_timestamp),
        updated_at: format_timestamp(job.updated_at),
    })
}

/// Rebuilds a job from its row. Rows with an unknown kind or status are skipped.
fn from_row(row: &JobRow) -> Option<(Job, bool)> {
    let kind: JobKind = match row.kind.parse() {
        Ok(kind) => kind,
        Err(_) => {
            tracing::warn!(job_id = %row.id, kind = %row.kind, "Skipping job with unknown kind");
            return None;
        }
    };
    let status = match JobStatus::parse(&row.status) {
        Some(status) => status,
        None => {
            tracing::warn!(job_id = %row.id, status = %row.status, "Skipping job with unknown status");
            return None;
        }
    };
    let failures: Vec<ItemFailure> = row
        .failures
        .as_deref()
        .and_then(|s| match serde_json::from_str(s) {
            Ok(list) => Some(list),
            Err(e) => {
                tracing::warn!(job_id = %row.id, "Ignoring unreadable failure list: {}", e);
                None
            }
        })
        .unwrap_or_default();
    let result = row
        .result
        .as_deref()
        .and_then(|s| match serde_json::from_str(s) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(job_id = %row.id, "Ignoring unreadable job result: {}", e);
                None
            }
        });

    let job = Job {
        id: row.id.clone(),
        project_id: row.project_id,
        kind,
        status,
        total_items: row.total_items,
        processed_items: row.processed_items,
        failed_items: row.failed_items,
        created_at: parse_timestamp(&row.created_at),
        started_at: row.started_at.as_deref().map(parse_timestamp),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
        updated_at: parse_timestamp(&row.updated_at),
        error_message: row.error_message.clone(),
        failures,
        result,
    };
    Some((job, row.cancel_requested))
}

// ─── JobRecord ──────────────────────────────────────────────────────────────

struct JobRecord {
    /// Insertion order, used to break `created_at` ties.
    sequence: u64,
    job: RwLock<Arc<Job>>,
    cancel_requested: AtomicBool,
}

impl JobRecord {
    fn new(sequence: u64, job: Job, cancel_requested: bool) -> Self {
        Self {
            sequence,
            job: RwLock::new(Arc::new(job)),
            cancel_requested: AtomicBool::new(cancel_requested),
        }
    }

    fn current(&self) -> Arc<Job> {
        Arc::clone(&read_lock(&self.job, "job record"))
    }

    fn snapshot(&self) -> JobSnapshot {
        let job = read_lock(&self.job, "job record");
        job.snapshot(self.cancel_requested.load(Ordering::Acquire))
    }
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Job record store backed by rusqlite.
///
/// The map lock is held only to look up or insert a record; all reads and
/// writes of a job go through that record's own lock.
pub struct JobStore {
    /// Database handle (clone is cheap, inner `Arc`).
    db: RwLock<Option<Database>>,
    records: RwLock<HashMap<JobId, Arc<JobRecord>>>,
    next_sequence: AtomicU64,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            db: RwLock::new(None),
            records: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn set_database(&self, db: Database) {
        *write_lock(&self.db, "job store database") = Some(db);
    }

    pub fn get_database(&self) -> Option<Database> {
        read_lock(&self.db, "job store database").clone()
    }

    fn record(&self, job_id: &str) -> Option<Arc<JobRecord>> {
        read_lock(&self.records, "job map").get(job_id).cloned()
    }

    fn add_record(&self, job: Job, cancel_requested: bool) -> Arc<JobRecord> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let id = job.id.clone();
        let record = Arc::new(JobRecord::new(sequence, job, cancel_requested));
        write_lock(&self.records, "job map").insert(id, Arc::clone(&record));
        record
    }

    /// Stores a freshly created job. Nothing is cached if persisting fails.
    pub fn insert(&self, job: Job) -> Result<JobSnapshot, DatabaseError> {
        if let Some(db) = self.get_database() {
            job_repo::insert(&db, &to_row(&job, false)?)?;
        }
        Ok(self.add_record(job, false).snapshot())
    }

    pub fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        self.record(job_id).map(|record| record.snapshot())
    }

    /// Checks memory first, then the database for records not loaded.
    pub fn get_with_fallback(&self, job_id: &str) -> Option<JobSnapshot> {
        if let Some(snapshot) = self.get(job_id) {
            return Some(snapshot);
        }
        let db = self.get_database()?;
        match job_repo::find_by_id(&db, job_id) {
            Ok(Some(row)) => from_row(&row).map(|(job, cancel)| job.snapshot(cancel)),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(job_id, "Failed to read job from database: {}", e);
                None
            }
        }
    }

    /// Jobs of one project, newest first.
    pub fn list_by_project(&self, project_id: ProjectId) -> Vec<JobSnapshot> {
        let records: Vec<Arc<JobRecord>> = read_lock(&self.records, "job map")
            .values()
            .cloned()
            .collect();

        let mut matching: Vec<(u64, JobSnapshot)> = records
            .iter()
            .map(|record| (record.sequence, record.snapshot()))
            .filter(|(_, snapshot)| snapshot.project_id == project_id)
            .collect();

        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        matching.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Current full record, for the owning worker.
    pub(crate) fn current(&self, job_id: &str) -> Option<Arc<Job>> {
        self.record(job_id).map(|record| record.current())
    }

    pub fn is_cancel_requested(&self, job_id: &str) -> bool {
        self.record(job_id)
            .map(|record| record.cancel_requested.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Raises the cancel flag unless the job is already terminal.
    ///
    /// The status check and the flag write happen under the record's read
    /// lock, so a concurrent terminal transition cannot slip in between.
    pub fn request_cancel(&self, job_id: &str) -> Result<JobSnapshot, EngineError> {
        let record = self
            .record(job_id)
            .ok_or_else(|| EngineError::job_not_found(job_id))?;

        let snapshot = {
            let job = read_lock(&record.job, "job record");
            if job.is_terminal() {
                return Err(EngineError::NotCancellable {
                    job_id: job_id.to_string(),
                    status: job.status.to_string(),
                });
            }
            record.cancel_requested.store(true, Ordering::Release);
            job.snapshot(true)
        };

        if let Some(db) = self.get_database() {
            if let Err(e) = job_repo::set_cancel_requested(&db, job_id) {
                tracing::error!(job_id, "Failed to persist cancel request: {}", e);
            }
        }

        Ok(snapshot)
    }

    /// Replaces a job record with its next state and persists it.
    ///
    /// # Panics
    /// Panics if the job is unknown, if the status change is not a legal
    /// forward transition, or if counters would go backwards or exceed the
    /// total. These are engine bugs, not user errors.
    pub(crate) fn commit(&self, next: Job) -> JobSnapshot {
        let record = match self.record(&next.id) {
            Some(record) => record,
            None => panic!("commit for unknown job {}", next.id),
        };

        {
            let current = record.current();
            if current.status == next.status {
                assert!(
                    !current.is_terminal(),
                    "job {} is {} and can no longer change",
                    next.id,
                    current.status
                );
            } else {
                assert!(
                    current.status.can_transition_to(next.status),
                    "illegal transition {} -> {} for job {}",
                    current.status,
                    next.status,
                    next.id
                );
            }
            assert!(
                next.processed_items >= current.processed_items
                    && next.failed_items >= current.failed_items,
                "counters of job {} went backwards",
                next.id
            );
        }
        assert!(
            next.finished_items() <= next.total_items,
            "job {} finished {} of {} items",
            next.id,
            next.finished_items(),
            next.total_items
        );

        if let Some(db) = self.get_database() {
            let persisted = to_row(&next, false).and_then(|row| job_repo::update_state(&db, &row));
            if let Err(e) = persisted {
                tracing::error!(job_id = %next.id, "Failed to persist job state: {}", e);
            }
        }

        let mut guard = write_lock(&record.job, "job record");
        *guard = Arc::new(next);
        guard.snapshot(record.cancel_requested.load(Ordering::Acquire))
    }

    /// Ids of jobs in the given status, oldest first.
    pub fn ids_with_status(&self, status: JobStatus) -> Vec<JobId> {
        let records: Vec<Arc<JobRecord>> = read_lock(&self.records, "job map")
            .values()
            .cloned()
            .collect();

        let mut matching: Vec<(chrono::DateTime<Utc>, u64, JobId)> = records
            .iter()
            .map(|record| (record.sequence, record.current()))
            .filter(|(_, job)| job.status == status)
            .map(|(seq, job)| (job.created_at, seq, job.id.clone()))
            .collect();
        matching.sort();
        matching.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Running jobs whose owning worker has not written for longer than `threshold`.
    pub fn stalled(&self, threshold: chrono::Duration) -> Vec<JobSnapshot> {
        let Some(cutoff) = Utc::now().checked_sub_signed(threshold) else {
            return Vec::new();
        };
        let records: Vec<Arc<JobRecord>> = read_lock(&self.records, "job map")
            .values()
            .cloned()
            .collect();

        let mut stalled: Vec<JobSnapshot> = records
            .iter()
            .filter(|record| {
                let job = record.current();
                job.status == JobStatus::Running && job.updated_at < cutoff
            })
            .map(|record| record.snapshot())
            .collect();
        stalled.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stalled
    }

    /// Loads persisted jobs into memory. Records already present are kept.
    pub fn load_from_database(&self) -> Result<usize, DatabaseError> {
        let db = match self.get_database() {
            Some(db) => db,
            None => return Ok(0),
        };

        let rows = job_repo::list_all(&db)?;
        let mut loaded = 0;
        for row in &rows {
            if self.record(&row.id).is_some() {
                continue;
            }
            if let Some((job, cancel_requested)) = from_row(row) {
                self.add_record(job, cancel_requested);
                loaded += 1;
            }
        }

        tracing::info!("Loaded {} jobs from database", loaded);
        Ok(loaded)
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn store_with_db() -> (JobStore, Database) {
        let db = Database::open_in_memory().expect("open in-memory DB");
        let store = JobStore::new();
        store.set_database(db.clone());
        (store, db)
    }

    #[test]
    fn test_insert_and_get() {
        let store = JobStore::new();
        let snapshot = store.insert(Job::new(1, JobKind::AnalyzeChapters)).unwrap();

        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(store.get(&snapshot.id), Some(snapshot.clone()));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_insert_persists_row() {
        let (store, db) = store_with_db();
        let snapshot = store.insert(Job::new(9, JobKind::TranslateChapters)).unwrap();

        let row = job_repo::find_by_id(&db, &snapshot.id).unwrap().unwrap();
        assert_eq!(row.project_id, 9);
        assert_eq!(row.kind, "translate_chapters");
        assert_eq!(row.status, "pending");
    }

    #[test]
    fn test_commit_replaces_record_and_persists() {
        let (store, db) = store_with_db();
        let job = Job::new(1, JobKind::AnalyzeChapters);
        let id = job.id.clone();
        store.insert(job).unwrap();

        let now = Utc::now();
        let current = store.current(&id).unwrap();
        let snapshot = store.commit(current.running(now).with_total(4, now));

        assert_eq!(snapshot.status, JobStatus::Running);
        assert_eq!(snapshot.total_items, 4);
        assert_eq!(store.get(&id).unwrap(), snapshot);

        let row = job_repo::find_by_id(&db, &id).unwrap().unwrap();
        assert_eq!(row.status, "running");
        assert_eq!(row.total_items, 4);
        assert!(row.started_at.is_some());
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn test_commit_rejects_backward_transition() {
        let store = JobStore::new();
        let job = Job::new(1, JobKind::AnalyzeChapters);
        let id = job.id.clone();
        store.insert(job).unwrap();

        let now = Utc::now();
        let running = store.commit(store.current(&id).unwrap().running(now));
        assert_eq!(running.status, JobStatus::Running);

        let mut back = (*store.current(&id).unwrap()).clone();
        back.status = JobStatus::Pending;
        store.commit(back);
    }

    #[test]
    #[should_panic(expected = "can no longer change")]
    fn test_commit_rejects_terminal_change() {
        let store = JobStore::new();
        let job = Job::new(1, JobKind::AnalyzeChapters);
        let id = job.id.clone();
        store.insert(job).unwrap();

        let now = Utc::now();
        store.commit(store.current(&id).unwrap().cancelled(now));
        store.commit(store.current(&id).unwrap().cancelled(now));
    }

    #[test]
    #[should_panic(expected = "finished 1 of 0 items")]
    fn test_commit_rejects_overcount() {
        let store = JobStore::new();
        let job = Job::new(1, JobKind::AnalyzeChapters);
        let id = job.id.clone();
        store.insert(job).unwrap();

        let now = Utc::now();
        let running = store.current(&id).unwrap().running(now);
        store.commit(running.item_succeeded(&Value::Null, now));
    }

    #[test]
    fn test_request_cancel_sets_flag() {
        let (store, db) = store_with_db();
        let snapshot = store.insert(Job::new(1, JobKind::AnalyzeChapters)).unwrap();

        let cancelled = store.request_cancel(&snapshot.id).unwrap();
        assert!(cancelled.cancel_requested);
        assert_eq!(cancelled.status, JobStatus::Pending);
        assert!(store.is_cancel_requested(&snapshot.id));

        let row = job_repo::find_by_id(&db, &snapshot.id).unwrap().unwrap();
        assert!(row.cancel_requested);
    }

    #[test]
    fn test_request_cancel_terminal_job() {
        let store = JobStore::new();
        let job = Job::new(1, JobKind::AnalyzeChapters);
        let id = job.id.clone();
        store.insert(job).unwrap();

        let now = Utc::now();
        let done = store.commit(store.current(&id).unwrap().running(now).completed(now));

        let err = store.request_cancel(&id).unwrap_err();
        assert!(matches!(err, EngineError::NotCancellable { .. }));
        assert_eq!(store.get(&id).unwrap(), done);
        assert!(!store.is_cancel_requested(&id));
    }

    #[test]
    fn test_request_cancel_unknown_job() {
        let store = JobStore::new();
        let err = store.request_cancel("nope").unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn test_progress_write_keeps_cancel_flag_in_db() {
        let (store, db) = store_with_db();
        let job = Job::new(1, JobKind::AnalyzeChapters);
        let id = job.id.clone();
        store.insert(job).unwrap();

        let now = Utc::now();
        store.commit(store.current(&id).unwrap().running(now).with_total(2, now));
        store.request_cancel(&id).unwrap();
        store.commit(store.current(&id).unwrap().item_succeeded(&Value::Null, now));

        let row = job_repo::find_by_id(&db, &id).unwrap().unwrap();
        assert!(row.cancel_requested);
        assert_eq!(row.processed_items, 1);
    }

    #[test]
    fn test_list_by_project_newest_first() {
        let store = JobStore::new();
        let first = store.insert(Job::new(1, JobKind::AnalyzeChapters)).unwrap();
        let other = store.insert(Job::new(2, JobKind::AnalyzeChapters)).unwrap();
        let second = store.insert(Job::new(1, JobKind::TranslateChapters)).unwrap();

        let listed: Vec<String> = store
            .list_by_project(1)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(listed, vec![second.id, first.id]);
        assert_eq!(store.list_by_project(2)[0].id, other.id);
        assert!(store.list_by_project(3).is_empty());
    }

    #[test]
    fn test_ids_with_status_oldest_first() {
        let store = JobStore::new();
        let a = store.insert(Job::new(1, JobKind::AnalyzeChapters)).unwrap();
        let b = store.insert(Job::new(1, JobKind::AnalyzeChapters)).unwrap();
        let now = Utc::now();
        store.commit(store.current(&a.id).unwrap().running(now));

        assert_eq!(store.ids_with_status(JobStatus::Pending), vec![b.id]);
        assert_eq!(store.ids_with_status(JobStatus::Running), vec![a.id]);
    }

    #[test]
    fn test_stalled_jobs() {
        let store = JobStore::new();
        let job = Job::new(1, JobKind::AnalyzeChapters);
        let id = job.id.clone();
        store.insert(job).unwrap();

        let long_ago = Utc::now() - chrono::Duration::minutes(30);
        store.commit(store.current(&id).unwrap().running(long_ago));

        let stalled = store.stalled(chrono::Duration::minutes(10));
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, id);
        assert!(store.stalled(chrono::Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_load_from_database_and_fallback() {
        let db = Database::open_in_memory().expect("open in-memory DB");
        let writer = JobStore::new();
        writer.set_database(db.clone());

        let job = Job::new(5, JobKind::AnalyzeChapters);
        let id = job.id.clone();
        writer.insert(job).unwrap();
        let now = Utc::now();
        let failure = ItemFailure {
            item_id: 12,
            error: "timeout".to_string(),
        };
        let expected = writer.commit(
            writer
                .current(&id)
                .unwrap()
                .running(now)
                .with_total(3, now)
                .item_failed(failure, 10, now)
                .item_succeeded(&json!({"itemId": 13, "termsExtracted": 7}), now),
        );
        writer.request_cancel(&id).unwrap();

        let reader = JobStore::new();
        reader.set_database(db);
        assert!(reader.get(&id).is_none());

        let fallback = reader.get_with_fallback(&id).unwrap();
        assert_eq!(fallback.failures, expected.failures);
        assert!(fallback.cancel_requested);

        assert_eq!(reader.load_from_database().unwrap(), 1);
        let loaded = reader.get(&id).unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.failed_items, 1);
        assert_eq!(loaded.processed_items, 1);
        assert_eq!(loaded.result, Some(json!({"termsExtracted": 7})));
        assert_eq!(loaded.result, expected.result);
        assert_eq!(loaded.created_at, expected.created_at);
        assert!(loaded.cancel_requested);

        // Second load is a no-op.
        assert_eq!(reader.load_from_database().unwrap(), 0);
    }

    #[test]
    fn test_load_without_database() {
        let store = JobStore::new();
        assert_eq!(store.load_from_database().unwrap(), 0);
        assert!(store.get_with_fallback("anything").is_none());
    }
}
