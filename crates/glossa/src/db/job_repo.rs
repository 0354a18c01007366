//! Job repository: persistence for the `jobs` table.
//!
//! Progress writes and the cancel flag use separate statements so that a
//! cancel request can never be overwritten by a counter update.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub project_id: i64,
    pub kind: String,
    pub status: String,
    pub total_items: u32,
    pub processed_items: u32,
    pub failed_items: u32,
    pub error_message: Option<String>,
    /// JSON array of `{itemId, error}` objects.
    pub failures: Option<String>,
    /// JSON object of summed per-item counts.
    pub result: Option<String>,
    pub cancel_requested: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            total_items: row.get("total_items")?,
            processed_items: row.get("processed_items")?,
            failed_items: row.get("failed_items")?,
            error_message: row.get("error_message")?,
            failures: row.get("failures")?,
            result: row.get("result")?,
            cancel_requested: row.get("cancel_requested")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, project_id, kind, status, total_items, processed_items,
             failed_items, error_message, failures, result, cancel_requested, created_at,
             started_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.project_id,
                job.kind,
                job.status,
                job.total_items,
                job.processed_items,
                job.failed_items,
                job.error_message,
                job.failures,
                job.result,
                job.cancel_requested,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Writes status, counters, timestamps and error fields in one statement.
///
/// `id`, `project_id`, `kind`, `created_at` and `cancel_requested` are left
/// untouched.
pub fn update_state(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status=?2, total_items=?3, processed_items=?4, failed_items=?5,
             error_message=?6, failures=?7, result=?8, started_at=?9, completed_at=?10,
             updated_at=?11 WHERE id=?1",
            params![
                job.id,
                job.status,
                job.total_items,
                job.processed_items,
                job.failed_items,
                job.error_message,
                job.failures,
                job.result,
                job.started_at,
                job.completed_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Sets the cancel flag. The only write that touches `cancel_requested`.
pub fn set_cancel_requested(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET cancel_requested = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Every job, oldest first (submission order).
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at ASC, rowid ASC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
