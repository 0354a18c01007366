//! Task record store. Same per-record replacement scheme as the job store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::db::task_repo::{self, TaskRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::lock::{read_lock, write_lock};
use crate::tasks::model::{Task, TaskId, TaskKind, TaskSnapshot, TaskStatus};

type TaskRecord = RwLock<Arc<Task>>;

fn to_row(task: &Task) -> Result<TaskRow, DatabaseError> {
    let result = match &task.result {
        Some(value) => Some(serde_json::to_string(value).map_err(|e| DatabaseError::Json {
            column: "result",
            source: e,
        })?),
        None => None,
    };

    Ok(TaskRow {
        id: task.id.clone(),
        item_id: task.item_id,
        kind: task.kind.as_str().to_string(),
        status: task.status.as_str().to_string(),
        result,
        error: task.error.clone(),
        created_at: format_timestamp(task.created_at),
        started_at: task.started_at.map(format_timestamp),
        finished_at: task.finished_at.map(format_timestamp),
    })
}

fn from_row(row: &TaskRow) -> Option<Task> {
    let kind: TaskKind = match row.kind.parse() {
        Ok(kind) => kind,
        Err(_) => {
            tracing::warn!(task_id = %row.id, kind = %row.kind, "Skipping task with unknown kind");
            return None;
        }
    };
    let status = match TaskStatus::parse(&row.status) {
        Some(status) => status,
        None => {
            tracing::warn!(task_id = %row.id, status = %row.status, "Skipping task with unknown status");
            return None;
        }
    };
    let result = row.result.as_deref().and_then(|s| match serde_json::from_str(s) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(task_id = %row.id, "Ignoring unreadable task result: {}", e);
            None
        }
    });

    Some(Task {
        id: row.id.clone(),
        item_id: row.item_id,
        kind,
        status,
        result,
        error: row.error.clone(),
        created_at: parse_timestamp(&row.created_at),
        started_at: row.started_at.as_deref().map(parse_timestamp),
        finished_at: row.finished_at.as_deref().map(parse_timestamp),
    })
}

pub struct TaskStore {
    db: RwLock<Option<Database>>,
    records: RwLock<HashMap<TaskId, Arc<TaskRecord>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            db: RwLock::new(None),
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_database(&self, db: Database) {
        *write_lock(&self.db, "task store database") = Some(db);
    }

    pub fn get_database(&self) -> Option<Database> {
        read_lock(&self.db, "task store database").clone()
    }

    fn record(&self, task_id: &str) -> Option<Arc<TaskRecord>> {
        read_lock(&self.records, "task map").get(task_id).cloned()
    }

    fn add_record(&self, task: Task) -> Arc<TaskRecord> {
        let id = task.id.clone();
        let record = Arc::new(RwLock::new(Arc::new(task)));
        write_lock(&self.records, "task map").insert(id, Arc::clone(&record));
        record
    }

    pub fn insert(&self, task: Task) -> Result<TaskSnapshot, DatabaseError> {
        if let Some(db) = self.get_database() {
            task_repo::insert(&db, &to_row(&task)?)?;
        }
        let snapshot = task.snapshot();
        self.add_record(task);
        Ok(snapshot)
    }

    pub fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.current(task_id).map(|task| task.snapshot())
    }

    pub fn get_with_fallback(&self, task_id: &str) -> Option<TaskSnapshot> {
        if let Some(snapshot) = self.get(task_id) {
            return Some(snapshot);
        }
        let db = self.get_database()?;
        match task_repo::find_by_id(&db, task_id) {
            Ok(Some(row)) => from_row(&row).map(|task| task.snapshot()),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(task_id, "Failed to read task from database: {}", e);
                None
            }
        }
    }

    pub(crate) fn current(&self, task_id: &str) -> Option<Arc<Task>> {
        self.record(task_id)
            .map(|record| Arc::clone(&read_lock(&record, "task record")))
    }

    /// Replaces a task with its next state.
    ///
    /// # Panics
    /// Panics on an unknown task or an illegal status transition.
    pub(crate) fn commit(&self, next: Task) -> TaskSnapshot {
        let record = match self.record(&next.id) {
            Some(record) => record,
            None => panic!("commit for unknown task {}", next.id),
        };

        let current = Arc::clone(&read_lock(&record, "task record"));
        assert!(
            current.status.can_transition_to(next.status),
            "illegal transition {} -> {} for task {}",
            current.status,
            next.status,
            next.id
        );

        if let Some(db) = self.get_database() {
            if let Err(e) = to_row(&next).and_then(|row| task_repo::update(&db, &row)) {
                tracing::error!(task_id = %next.id, "Failed to persist task state: {}", e);
            }
        }

        let snapshot = next.snapshot();
        *write_lock(&record, "task record") = Arc::new(next);
        snapshot
    }

    /// Ids of tasks in the given status, oldest first.
    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        let records: Vec<Arc<TaskRecord>> = read_lock(&self.records, "task map")
            .values()
            .cloned()
            .collect();

        let mut matching: Vec<(DateTime<Utc>, TaskId)> = records
            .iter()
            .map(|record| Arc::clone(&read_lock(record, "task record")))
            .filter(|task| task.status == status)
            .map(|task| (task.created_at, task.id.clone()))
            .collect();
        matching.sort();
        matching.into_iter().map(|(_, id)| id).collect()
    }

    /// Drops terminal tasks finished before `cutoff`, from memory and disk.
    pub fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let expired: Vec<TaskId> = {
            let records = read_lock(&self.records, "task map");
            records
                .iter()
                .filter(|(_, record)| {
                    let task = read_lock(record, "task record");
                    task.is_terminal() && task.finished_at.is_some_and(|at| at < cutoff)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        if expired.is_empty() {
            return Ok(0);
        }

        if let Some(db) = self.get_database() {
            task_repo::delete_many(&db, &expired)?;
        }

        let mut records = write_lock(&self.records, "task map");
        for id in &expired {
            records.remove(id);
        }
        Ok(expired.len())
    }

    pub fn load_from_database(&self) -> Result<usize, DatabaseError> {
        let db = match self.get_database() {
            Some(db) => db,
            None => return Ok(0),
        };

        let mut loaded = 0;
        for row in task_repo::list_all(&db)? {
            if self.record(&row.id).is_some() {
                continue;
            }
            if let Some(task) = from_row(&row) {
                self.add_record(task);
                loaded += 1;
            }
        }

        tracing::info!("Loaded {} tasks from database", loaded);
        Ok(loaded)
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_commit_and_reload() {
        let db = Database::open_in_memory().expect("open in-memory DB");
        let store = TaskStore::new();
        store.set_database(db.clone());

        let task = Task::new(8, TaskKind::Analyze);
        let id = task.id.clone();
        let pending = store.insert(task).unwrap();
        assert_eq!(pending.status, TaskStatus::Pending);

        let now = Utc::now();
        store.commit(store.current(&id).unwrap().started(now));
        let done = store.commit(
            store
                .current(&id)
                .unwrap()
                .succeeded(json!({ "termsExtracted": 2 }), now),
        );
        assert_eq!(store.get(&id), Some(done.clone()));

        let reloaded = TaskStore::new();
        reloaded.set_database(db);
        assert_eq!(reloaded.get_with_fallback(&id), Some(done.clone()));
        assert_eq!(reloaded.load_from_database().unwrap(), 1);
        assert_eq!(reloaded.get(&id), Some(done));
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn test_terminal_task_is_immutable() {
        let store = TaskStore::new();
        let task = Task::new(1, TaskKind::Translate);
        let id = task.id.clone();
        store.insert(task).unwrap();

        let now = Utc::now();
        store.commit(store.current(&id).unwrap().started(now));
        store.commit(store.current(&id).unwrap().failed("nope", now));
        store.commit(store.current(&id).unwrap().succeeded(json!({}), now));
    }

    #[test]
    fn test_remove_finished_before() {
        let db = Database::open_in_memory().expect("open in-memory DB");
        let store = TaskStore::new();
        store.set_database(db.clone());

        let old = Task::new(1, TaskKind::Analyze);
        let fresh = Task::new(2, TaskKind::Analyze);
        let live = Task::new(3, TaskKind::Analyze);
        let (old_id, fresh_id, live_id) = (old.id.clone(), fresh.id.clone(), live.id.clone());
        store.insert(old).unwrap();
        store.insert(fresh).unwrap();
        store.insert(live).unwrap();

        let now = Utc::now();
        let long_ago = now - chrono::Duration::days(2);
        store.commit(store.current(&old_id).unwrap().started(long_ago));
        store.commit(store.current(&old_id).unwrap().succeeded(json!({}), long_ago));
        store.commit(store.current(&fresh_id).unwrap().started(now));
        store.commit(store.current(&fresh_id).unwrap().succeeded(json!({}), now));

        let removed = store
            .remove_finished_before(now - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&old_id).is_none());
        assert!(store.get(&fresh_id).is_some());
        assert!(store.get(&live_id).is_some());
        assert!(task_repo::find_by_id(&db, &old_id).unwrap().is_none());
    }

    #[test]
    fn test_ids_with_status() {
        let store = TaskStore::new();
        let a = Task::new(1, TaskKind::Analyze);
        let a_id = a.id.clone();
        store.insert(a).unwrap();
        store.commit(store.current(&a_id).unwrap().started(Utc::now()));

        assert_eq!(store.ids_with_status(TaskStatus::Started), vec![a_id]);
        assert!(store.ids_with_status(TaskStatus::Pending).is_empty());
    }
}
