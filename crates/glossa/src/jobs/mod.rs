//! Batch jobs: model, record store, progress, cancellation and scheduling.

pub mod cancel;
pub mod model;
pub(crate) mod progress;
pub mod scheduler;
pub mod store;

pub use cancel::CancellationController;
pub use model::{ItemFailure, Job, JobId, JobKind, JobSnapshot, JobStatus};
pub use scheduler::JobScheduler;
pub use store::JobStore;
