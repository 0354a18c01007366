//! Shared test utilities for glossa integration tests.
//!
//! - `FakeLibrary`: in-memory projects and chapters acting as both the work
//!   enumerator and the item executor, with controllable failures and gates
//! - `TestHarness`: temp directory plus engine construction

pub mod fakes;
pub mod harness;

pub use fakes::{FakeLibrary, DEFAULT_TERMS};
pub use harness::{wait_for_job, wait_for_task, wait_until, TestHarness};
