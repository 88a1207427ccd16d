//! Lock manager for path-scoped artifact locks

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

use super::guard::PathLockGuard;
use super::types::{LockConfig, LockError, LockInfo, LockResult};

/// In-process mutex per path, shared by clones of a manager and its guards
pub(super) type LockTable = Arc<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>>;

/// Drop the table entry for `path` once nobody holds or awaits its mutex
pub(super) fn prune_idle(table: &LockTable, path: &Path) {
    let mut table = table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if table.get(path).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
        table.remove(path);
    }
}

/// Coordinates exclusive access to artifact paths
///
/// Cheap to clone; clones share the in-process lock table.
#[derive(Debug, Clone)]
pub struct PathLockManager {
    config: LockConfig,
    in_process: LockTable,
}

impl PathLockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            in_process: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Create a lock manager with a custom lock directory
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(LockConfig::default().with_lock_dir(dir))
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire an exclusive lock on `path`, waiting up to the configured timeout
    pub async fn acquire(&self, path: &Path, holder_description: &str) -> LockResult<PathLockGuard> {
        let result = self.acquire_locked(path, holder_description).await;
        if result.is_err() {
            prune_idle(&self.in_process, path);
        }
        result
    }

    async fn acquire_locked(&self, path: &Path, holder_description: &str) -> LockResult<PathLockGuard> {
        let resource = path.display().to_string();
        let start = Instant::now();

        let mutex = self.mutex_for(path);
        let in_process = timeout(self.config.timeout, mutex.lock_owned())
            .await
            .map_err(|_| LockError::Timeout {
                resource: resource.clone(),
                holder: "another task in this process".to_string(),
            })?;

        let lock_file = self.lock_file_path(path);
        let info = LockInfo::new(
            resource.clone(),
            holder_description.to_string(),
            Some(self.config.ttl),
        );

        loop {
            match self.try_create_lock_file(&lock_file, &info)? {
                Attempt::Acquired => {
                    debug!(
                        resource = %resource,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Lock acquired"
                    );
                    return Ok(PathLockGuard::new(
                        info,
                        lock_file,
                        in_process,
                        self.in_process.clone(),
                        path.to_path_buf(),
                    ));
                }
                Attempt::Held(existing) => {
                    if self.clear_if_stale(&lock_file, existing.as_ref())? {
                        continue;
                    }

                    if start.elapsed() >= self.config.timeout {
                        let holder = existing
                            .map(|e| e.holder())
                            .unwrap_or_else(|| "unknown holder".to_string());
                        return Err(LockError::Timeout { resource, holder });
                    }

                    sleep(self.config.retry_interval).await;
                }
            }
        }
    }

    /// In-process mutex for a path, created on first use
    fn mutex_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut table = self
            .in_process
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        table
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock file location for a path
    ///
    /// The name is a readable stem plus a short digest of the full path, so
    /// `modules/a.py` and `prompts/a.py` never collide.
    fn lock_file_path(&self, path: &Path) -> PathBuf {
        let full = path.display().to_string();
        let digest = hex::encode(Sha256::digest(full.as_bytes()));
        let stem = path
            .file_name()
            .map(|n| n.to_string_lossy().replace(['.', ' '], "_"))
            .unwrap_or_else(|| "root".to_string());
        self.config
            .lock_dir
            .join(format!("{}_{}.lock", stem, &digest[..12]))
    }

    /// Create the lock file exclusively
    fn try_create_lock_file(&self, lock_file: &Path, info: &LockInfo) -> LockResult<Attempt> {
        if let Some(parent) = lock_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LockError::IoError(format!("Failed to create lock directory: {}", e))
            })?;
        }

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_file);

        match file {
            Ok(mut file) => {
                let body = serde_json::to_vec_pretty(info)
                    .map_err(|e| LockError::IoError(format!("Failed to serialize lock info: {}", e)))?;
                file.write_all(&body)
                    .map_err(|e| LockError::IoError(format!("Failed to write lock file: {}", e)))?;
                Ok(Attempt::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(Attempt::Held(read_lock_file(lock_file).ok()))
            }
            Err(e) => Err(LockError::IoError(format!("Failed to create lock file: {}", e))),
        }
    }

    /// Remove a lock file that is expired or corrupted; true when removed
    fn clear_if_stale(&self, lock_file: &Path, existing: Option<&LockInfo>) -> LockResult<bool> {
        let stale = match existing {
            Some(info) => info.is_expired(),
            // Unreadable and not fresh: a writer that crashed mid-write
            None => match std::fs::metadata(lock_file).and_then(|m| m.modified()) {
                Ok(modified) => modified
                    .elapsed()
                    .map(|age| age > self.config.ttl)
                    .unwrap_or(false),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
                Err(e) => return Err(LockError::IoError(e.to_string())),
            },
        };

        if !stale {
            return Ok(false);
        }

        match std::fs::remove_file(lock_file) {
            Ok(()) => {
                info!(path = %lock_file.display(), "Removed stale lock file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(LockError::IoError(format!(
                "Failed to remove stale lock file: {}",
                e
            ))),
        }
    }
}

/// Outcome of one exclusive-create attempt
enum Attempt {
    Acquired,
    /// Someone else holds the file; their info when readable
    Held(Option<LockInfo>),
}

/// Read lock info from a file
fn read_lock_file(path: &Path) -> LockResult<LockInfo> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| LockError::IoError(format!("Failed to read lock file: {}", e)))?;

    serde_json::from_str(&contents)
        .map_err(|e| LockError::Corrupted(format!("Failed to parse lock file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_manager(temp: &TempDir) -> PathLockManager {
        PathLockManager::new(
            LockConfig::default()
                .with_lock_dir(temp.path().join(".locks"))
                .with_timeout(Duration::from_millis(300)),
        )
    }

    #[tokio::test]
    async fn test_acquire_creates_and_release_removes_lock_file() {
        let temp = TempDir::new().unwrap();
        let manager = create_test_manager(&temp);
        let target = temp.path().join("modules/dedup.py");

        let guard = manager.acquire(&target, "test").await.unwrap();
        let lock_file = guard.lock_file().to_path_buf();
        assert!(lock_file.exists());

        let body = std::fs::read_to_string(&lock_file).unwrap();
        assert!(body.contains("dedup.py"));

        drop(guard);
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_in_process_contention_times_out() {
        let temp = TempDir::new().unwrap();
        let manager = create_test_manager(&temp);
        let target = temp.path().join("prompts/extract_v1.txt");

        let _held = manager.acquire(&target, "first").await.unwrap();
        let second = manager.clone().acquire(&target, "second").await;

        assert!(matches!(second, Err(LockError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let temp = TempDir::new().unwrap();
        let manager = PathLockManager::new(
            LockConfig::default()
                .with_lock_dir(temp.path().join(".locks"))
                .with_timeout(Duration::from_secs(5)),
        );
        let target = temp.path().join("config/pipeline.json");

        let held = manager.acquire(&target, "first").await.unwrap();
        let waiter = {
            let manager = manager.clone();
            let target = target.clone();
            tokio::spawn(async move { manager.acquire(&target, "second").await.map(|_| ()) })
        };

        sleep(Duration::from_millis(50)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_foreign_lock_file_blocks_until_timeout() {
        let temp = TempDir::new().unwrap();
        let manager = create_test_manager(&temp);
        let target = temp.path().join("modules/a.py");

        // Simulate another process holding the lock
        let foreign = LockInfo::new(
            target.display().to_string(),
            "other-process".to_string(),
            Some(Duration::from_secs(600)),
        );
        let lock_file = manager.lock_file_path(&target);
        std::fs::create_dir_all(lock_file.parent().unwrap()).unwrap();
        std::fs::write(&lock_file, serde_json::to_string(&foreign).unwrap()).unwrap();

        let result = manager.acquire(&target, "test").await;
        match result {
            Err(LockError::Timeout { holder, .. }) => assert!(holder.contains("other-process")),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_expired_lock_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        let manager = create_test_manager(&temp);
        let target = temp.path().join("modules/a.py");

        let mut stale = LockInfo::new(target.display().to_string(), "crashed".to_string(), None);
        stale.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(10));
        let lock_file = manager.lock_file_path(&target);
        std::fs::create_dir_all(lock_file.parent().unwrap()).unwrap();
        std::fs::write(&lock_file, serde_json::to_string(&stale).unwrap()).unwrap();

        let guard = manager.acquire(&target, "test").await.unwrap();
        assert_eq!(guard.info().holder_description, "test");
    }

    fn tracked(manager: &PathLockManager) -> usize {
        manager.in_process.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_idle_paths_are_forgotten() {
        let temp = TempDir::new().unwrap();
        let manager = create_test_manager(&temp);
        let a = temp.path().join("modules/a.py");
        let b = temp.path().join("modules/b.py");

        let held = manager.acquire(&a, "first").await.unwrap();
        drop(manager.acquire(&b, "other").await.unwrap());
        assert_eq!(tracked(&manager), 1);

        // A timed-out waiter must not evict the entry the holder still uses
        assert!(manager.acquire(&a, "second").await.is_err());
        assert_eq!(tracked(&manager), 1);

        drop(held);
        assert_eq!(tracked(&manager), 0);
    }

    #[test]
    fn test_lock_file_path_distinguishes_directories() {
        let manager = PathLockManager::with_lock_dir("/tmp/locks");
        let a = manager.lock_file_path(Path::new("/pb/modules/a.py"));
        let b = manager.lock_file_path(Path::new("/pb/prompts/a.py"));

        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("a_py_"));
        assert!(a.to_string_lossy().ends_with(".lock"));
    }
}
