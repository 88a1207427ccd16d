//! Path-scoped locking for artifact mutation
//!
//! A lock is held for the duration of one read-modify-write on a playbook
//! artifact. Two layers are combined:
//!
//! - an in-process async mutex per path, so concurrent tasks in one process
//!   queue instead of spinning on the filesystem
//! - a lock file under the playbook's `.locks/` directory, created with
//!   `create_new`, so two processes applying changesets never interleave
//!
//! Lock files older than their TTL are treated as stale and replaced.
//!
//! # Example
//!
//! ```ignore
//! use kgloop_core::locking::{LockConfig, PathLockManager};
//!
//! let locks = PathLockManager::new(LockConfig::default().with_lock_dir(root.join(".locks")));
//! let _guard = locks.acquire(&root.join("modules/dedup.py"), "applier:change_001").await?;
//! // read, patch and write the file
//! // lock released when the guard is dropped
//! ```

mod guard;
mod manager;
mod types;

pub use guard::PathLockGuard;
pub use manager::PathLockManager;
pub use types::{LockConfig, LockError, LockInfo, LockResult};
