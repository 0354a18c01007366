//! Standalone single-item tasks, tracked apart from batch jobs.

pub mod model;
pub mod store;
pub mod tracker;

pub use model::{Task, TaskId, TaskKind, TaskSnapshot, TaskStatus};
pub use store::TaskStore;
pub use tracker::TaskTracker;
