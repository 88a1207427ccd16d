//! Monotonic playbook version counter

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::store::PlaybookStore;

/// Playbook-relative file holding the current version integer
pub const VERSION_FILE: &str = "VERSION";

/// A recorded point the playbook can be rolled back to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub source_version: u32,
    pub target_version: u32,
    pub changeset: PathBuf,
    /// The changeset's own rollback plan, verbatim
    pub rollback_plan: Option<serde_json::Value>,
}

/// Reads and advances the `VERSION` file
#[derive(Debug, Clone)]
pub struct VersionManager {
    store: PlaybookStore,
}

impl VersionManager {
    pub fn new(store: PlaybookStore) -> Self {
        Self { store }
    }

    pub fn current(&self) -> Result<u32> {
        let raw = self.store.read_artifact(VERSION_FILE).map_err(|e| match e {
            Error::ArtifactNotFound(_) => {
                Error::PlaybookNotInitialized(self.store.root().display().to_string())
            }
            other => other,
        })?;

        raw.trim()
            .trim_start_matches('v')
            .parse()
            .map_err(|_| Error::InvalidInput(format!("{} holds '{}', not a version number", VERSION_FILE, raw.trim())))
    }

    /// Move from `expected` to `expected + 1`
    ///
    /// Compare-and-set under the VERSION file lock: fails with
    /// [`Error::VersionConflict`] when another writer already moved it.
    pub async fn advance(&self, expected: u32) -> Result<u32> {
        let path = self.store.resolve(VERSION_FILE)?;
        let _guard = self.store.locks().acquire(&path, "version-manager").await?;

        let found = self.current()?;
        if found != expected {
            warn!(expected, found, "Version moved underneath this writer");
            return Err(Error::VersionConflict { expected, found });
        }

        let next = expected + 1;
        self.store.write_artifact(VERSION_FILE, &format!("{}\n", next))?;
        info!(from = expected, to = next, "Playbook version advanced");
        Ok(next)
    }

    /// Rollback points from the changeset history, oldest first
    pub fn rollback_points(&self) -> Result<Vec<RollbackPoint>> {
        let mut points = Vec::new();
        for record in self.store.list_changesets()? {
            let rollback_plan = std::fs::read_to_string(&record.path)
                .ok()
                .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
                .and_then(|v| v.get("rollback_plan").cloned())
                .filter(|v| !v.is_null());

            points.push(RollbackPoint {
                source_version: record.source_version,
                target_version: record.target_version,
                changeset: record.path,
                rollback_plan,
            });
        }
        Ok(points)
    }
}
