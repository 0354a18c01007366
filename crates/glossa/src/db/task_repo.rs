//! Task repository: persistence for the `tasks` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw task row from the database.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub item_id: i64,
    pub kind: String,
    pub status: String,
    /// JSON-encoded result payload.
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            item_id: row.get("item_id")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            result: row.get("result")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

pub fn insert(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO tasks (id, item_id, kind, status, result, error, created_at,
             started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id,
                task.item_id,
                task.kind,
                task.status,
                task.result,
                task.error,
                task.created_at,
                task.started_at,
                task.finished_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the mutable columns of a task.
pub fn update(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE tasks SET status=?2, result=?3, error=?4, started_at=?5, finished_at=?6
             WHERE id=?1",
            params![
                task.id,
                task.status,
                task.result,
                task.error,
                task.started_at,
                task.finished_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], TaskRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Every task, oldest first.
pub fn list_all(db: &Database) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY created_at ASC, rowid ASC")?;
        let rows = stmt
            .query_map([], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes the given tasks. Returns how many rows were removed.
pub fn delete_many(db: &Database, ids: &[String]) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("DELETE FROM tasks WHERE id = ?1")?;
        let mut removed = 0;
        for id in ids {
            removed += stmt.execute(params![id])?;
        }
        Ok(removed)
    })
}
