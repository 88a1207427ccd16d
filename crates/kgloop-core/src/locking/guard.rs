//! RAII guard for a path lock

use std::fmt;
use std::path::PathBuf;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::manager::{LockTable, prune_idle};
use super::types::LockInfo;

/// Holds both layers of a path lock
///
/// Dropping the guard removes the lock file first and then releases the
/// in-process mutex, so a waiting task never observes a stale file of ours.
/// The path's table entry is dropped when no other task is waiting on it.
pub struct PathLockGuard {
    info: LockInfo,
    lock_file: PathBuf,
    in_process: Option<OwnedMutexGuard<()>>,
    table: LockTable,
    path: PathBuf,
}

impl PathLockGuard {
    pub(crate) fn new(
        info: LockInfo,
        lock_file: PathBuf,
        in_process: OwnedMutexGuard<()>,
        table: LockTable,
        path: PathBuf,
    ) -> Self {
        Self {
            info,
            lock_file,
            in_process: Some(in_process),
            table,
            path,
        }
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn lock_file(&self) -> &std::path::Path {
        &self.lock_file
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.lock_file) {
            Ok(()) => debug!(resource = %self.info.resource, "Lock released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.lock_file.display(),
                error = %e,
                "Failed to remove lock file"
            ),
        }
        drop(self.in_process.take());
        prune_idle(&self.table, &self.path);
    }
}

impl fmt::Debug for PathLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathLockGuard")
            .field("resource", &self.info.resource)
            .field("lock_file", &self.lock_file)
            .finish()
    }
}

impl fmt::Display for PathLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock[{}]", self.info.resource)
    }
}
