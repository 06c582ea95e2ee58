//! Poison-tolerant lock acquisition for the shared cache state.
//!
//! The memory index and pending-write maps outlive any one request, so a
//! panic while a guard is held must not wedge every later request. Stale
//! data after such a recovery is acceptable: the durable log is the source
//! of truth and the next audit reconciles.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn note_recovery(kind: &'static str, target: &'static str, op: &'static str) {
    warn!(
        target_module = target,
        op,
        kind,
        "cache lock was poisoned; continuing with possibly stale state"
    );
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        note_recovery("rwlock.read", target, op);
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        note_recovery("rwlock.write", target, op);
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        note_recovery("mutex", target, op);
        poisoned.into_inner()
    })
}
