//! Collaborators the engine depends on but does not implement.
//!
//! Project and chapter persistence, term extraction and translation all live
//! behind these two traits.

use serde_json::Value;

use crate::error::{EnumerationError, ItemError};
use crate::jobs::JobKind;
use crate::tasks::TaskKind;

/// Opaque identifier of a project owned by the surrounding product.
pub type ProjectId = i64;

/// Opaque identifier of one unit of work (one chapter).
pub type ItemId = i64;

/// Produces the ordered work list for a job.
pub trait WorkEnumerator: Send + Sync {
    /// Whether the project is known. Unknown projects are rejected at submission.
    fn project_exists(&self, project_id: ProjectId) -> bool;

    /// Whether a single item is known. Unknown items are rejected at task submission.
    fn item_exists(&self, item_id: ItemId) -> bool;

    /// Items to process, in a stable order (chapter sequence order).
    ///
    /// For `AnalyzeChapters` these are chapters not yet analyzed, for
    /// `TranslateChapters` chapters without a translation.
    fn enumerate(&self, project_id: ProjectId, kind: JobKind)
        -> Result<Vec<ItemId>, EnumerationError>;
}

/// Runs the long operation for one item.
pub trait ItemExecutor: Send + Sync {
    /// Processes one item and returns its result payload (for analysis, the
    /// number of extracted terms among other details).
    fn execute(&self, item_id: ItemId, kind: TaskKind) -> Result<Value, ItemError>;
}
