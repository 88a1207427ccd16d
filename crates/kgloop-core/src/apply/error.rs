//! Per-operation apply failures

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::locking::LockError;

/// Why a single operation could not be applied
///
/// Recorded in the `failed` bucket; never aborts the rest of the changeset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Target file not found: {0}")]
    NotFound(String),

    #[error("Old content not found in {0}; the patch is stale or already applied")]
    StalePatch(String),

    #[error("Config file {path} is not valid JSON: {message}")]
    InvalidConfig { path: String, message: String },

    #[error("Cannot set '{json_path}': {message}")]
    ConfigPath { json_path: String, message: String },

    #[error("Operation is missing {0}")]
    MissingDetails(String),

    #[error("Unknown operation type: {0}")]
    UnknownOperationType(String),

    #[error("Path '{0}' escapes the playbook root")]
    PathEscape(String),

    #[error("Could not lock target: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Machine-readable [`ApplyError`] discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyErrorKind {
    NotFound,
    StalePatch,
    InvalidConfig,
    ConfigPath,
    MissingDetails,
    UnknownOperationType,
    /// An approved id that matches no operation in the changeset
    OperationNotFound,
    PathEscape,
    Lock,
    Io,
}

impl ApplyError {
    pub fn kind(&self) -> ApplyErrorKind {
        match self {
            Self::NotFound(_) => ApplyErrorKind::NotFound,
            Self::StalePatch(_) => ApplyErrorKind::StalePatch,
            Self::InvalidConfig { .. } => ApplyErrorKind::InvalidConfig,
            Self::ConfigPath { .. } => ApplyErrorKind::ConfigPath,
            Self::MissingDetails(_) => ApplyErrorKind::MissingDetails,
            Self::UnknownOperationType(_) => ApplyErrorKind::UnknownOperationType,
            Self::PathEscape(_) => ApplyErrorKind::PathEscape,
            Self::Lock(_) => ApplyErrorKind::Lock,
            Self::Io(_) => ApplyErrorKind::Io,
        }
    }
}

impl From<crate::Error> for ApplyError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::ArtifactNotFound(path) => Self::NotFound(path),
            crate::Error::PathEscape(path) => Self::PathEscape(path),
            crate::Error::LockTimeout(resource) => Self::Lock(resource),
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<LockError> for ApplyError {
    fn from(err: LockError) -> Self {
        Self::Lock(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_kinds() {
        let not_found: ApplyError = crate::Error::ArtifactNotFound("modules/a.py".into()).into();
        assert_eq!(not_found.kind(), ApplyErrorKind::NotFound);

        let escape: ApplyError = crate::Error::PathEscape("../x".into()).into();
        assert_eq!(escape.kind(), ApplyErrorKind::PathEscape);

        let io: ApplyError = crate::Error::Io(std::io::Error::other("disk full")).into();
        assert_eq!(io.kind(), ApplyErrorKind::Io);
        assert!(io.to_string().contains("disk full"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ApplyErrorKind::StalePatch).unwrap(),
            serde_json::json!("stale_patch")
        );
    }
}
