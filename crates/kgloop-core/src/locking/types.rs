//! Lock types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// Lock acquisition timed out
    #[error("Lock timeout: '{resource}' is held by {holder}")]
    Timeout { resource: String, holder: String },

    /// I/O error during lock operations
    #[error("Lock I/O error: {0}")]
    IoError(String),

    /// Lock file could not be parsed
    #[error("Lock file corrupted: {0}")]
    Corrupted(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E300",
            Self::IoError(_) => "E306",
            Self::Corrupted(_) => "E307",
        }
    }
}

impl From<LockError> for crate::Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { resource, .. } => crate::Error::LockTimeout(resource),
            other => crate::Error::Other(other.to_string()),
        }
    }
}

/// Information about a held lock, persisted as the lock file body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: Uuid,

    /// Path of the locked artifact
    pub resource: String,

    pub holder_pid: u32,
    pub holder_host: String,

    /// What holds the lock (e.g. "applier:change_003")
    pub holder_description: String,

    pub acquired_at: DateTime<Utc>,

    /// When the lock is considered stale (None = never)
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    /// Create a new lock info for the current process
    pub fn new(resource: String, holder_description: String, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            resource,
            holder_pid: std::process::id(),
            holder_host: gethostname::gethostname().to_string_lossy().into_owned(),
            holder_description,
            acquired_at: now,
            expires_at: ttl.map(|d| now + chrono::Duration::from_std(d).unwrap_or_default()),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Utc::now() > exp).unwrap_or(false)
    }

    /// Short description of the holder for error messages
    pub fn holder(&self) -> String {
        format!(
            "{} (pid {} on {})",
            self.holder_description, self.holder_pid, self.holder_host
        )
    }
}

/// Configuration for the lock manager
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Directory holding lock files
    pub lock_dir: PathBuf,

    /// How long to wait for a lock before giving up
    pub timeout: Duration,

    /// Age after which a lock file is considered stale
    pub ttl: Duration,

    /// Retry interval when waiting for a lock file
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from(".locks"),
            timeout: Duration::from_secs(30),
            ttl: Duration::from_secs(300), // 5 minutes
            retry_interval: Duration::from_millis(50),
        }
    }
}

impl LockConfig {
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_info_creation() {
        let info = LockInfo::new(
            "modules/dedup.py".to_string(),
            "applier:change_001".to_string(),
            Some(Duration::from_secs(60)),
        );

        assert_eq!(info.resource, "modules/dedup.py");
        assert_eq!(info.holder_pid, std::process::id());
        assert!(info.expires_at.is_some());
        assert!(!info.is_expired());
        assert!(info.holder().contains("applier:change_001"));
    }

    #[test]
    fn test_lock_info_without_ttl_never_expires() {
        let info = LockInfo::new("x".to_string(), "test".to_string(), None);
        assert!(!info.is_expired());
    }

    #[test]
    fn test_lock_error_codes_and_conversion() {
        let timeout = LockError::Timeout {
            resource: "prompts/a.txt".to_string(),
            holder: "other".to_string(),
        };
        assert_eq!(timeout.code(), "E300");

        let err: crate::Error = timeout.into();
        assert_eq!(err.code(), "E300");
        assert_eq!(LockError::Corrupted("bad".into()).code(), "E307");
    }

    #[test]
    fn test_lock_config_builder() {
        let config = LockConfig::default()
            .with_lock_dir("/tmp/locks")
            .with_timeout(Duration::from_secs(60))
            .with_ttl(Duration::from_secs(120));

        assert_eq!(config.lock_dir, PathBuf::from("/tmp/locks"));
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.ttl, Duration::from_secs(120));
    }
}
