//! Lock helpers that recover from poisoning.
//!
//! Records are replaced whole, so a panic while a guard was held cannot leave
//! a half-written value behind and the data is safe to keep using.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn read_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("{} lock was poisoned, recovering", what);
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("{} lock was poisoned, recovering", what);
            poisoned.into_inner()
        }
    }
}
