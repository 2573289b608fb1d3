//! Process-wide sync lock.
//!
//! At most one sync run (whole-fleet or single-repo) executes at a time. A
//! second request is rejected immediately with a conflict rather than
//! queued. The lock is an explicit registry keyed by scope so callers can
//! report what is running, replacing the module-level boolean this design
//! started from.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AppError;

/// What a sync run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "repo_id")]
pub enum SyncScope {
    /// Every tracked repository.
    All,
    /// One repository.
    Repo(i64),
}

/// Registry of the currently running sync, if any.
#[derive(Debug, Default)]
pub struct SyncLock {
    current: Mutex<Option<SyncScope>>,
}

/// RAII permit for a sync run. Releases the lock on drop, including when the
/// sync task panics or is cancelled.
#[derive(Debug)]
pub struct SyncPermit {
    lock: Arc<SyncLock>,
}

impl SyncLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn guard(&self) -> MutexGuard<'_, Option<SyncScope>> {
        // A poisoned lock only means a holder panicked; the slot itself is
        // still meaningful, so recover the inner state.
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Try to claim the lock for a sync run. Rejects with a conflict while
    /// any other run holds it.
    pub fn try_acquire(self: &Arc<Self>, scope: SyncScope) -> Result<SyncPermit, AppError> {
        let mut current = self.guard();
        if current.is_some() {
            return Err(AppError::conflict("Sync already in progress"));
        }
        *current = Some(scope);
        Ok(SyncPermit {
            lock: Arc::clone(self),
        })
    }

    /// The scope of the currently running sync, if one is in flight.
    pub fn running_scope(&self) -> Option<SyncScope> {
        *self.guard()
    }

    /// Whether any sync currently holds the lock.
    pub fn is_busy(&self) -> bool {
        self.guard().is_some()
    }
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        *self.lock.guard() = None;
    }
}
