//! Outcome of applying a changeset

use serde::{Deserialize, Serialize};

use crate::curation::Operation;

use super::error::ApplyErrorKind;

/// An operation that changed the playbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOperation {
    pub operation: Operation,
    /// Playbook-relative path that was written
    pub written_path: String,
    /// Content hash before the write; absent when the file did not exist
    pub before_sha256: Option<String>,
    pub after_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub operation_id: String,
    /// Absent when an approved id did not match any operation
    pub operation: Option<Operation>,
    pub error: String,
    pub kind: ApplyErrorKind,
}

/// Every operation of a changeset lands in exactly one bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationResult {
    pub applied: Vec<AppliedOperation>,
    pub skipped: Vec<Operation>,
    pub requires_approval: Vec<Operation>,
    pub failed: Vec<FailedOperation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub applied: usize,
    pub skipped: usize,
    pub requires_approval: usize,
    pub failed: usize,
}

impl ApplicationSummary {
    pub fn total(&self) -> usize {
        self.applied + self.skipped + self.requires_approval + self.failed
    }
}

impl std::fmt::Display for ApplicationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} applied, {} skipped, {} awaiting approval, {} failed",
            self.applied, self.skipped, self.requires_approval, self.failed
        )
    }
}

impl ApplicationResult {
    pub fn summary(&self) -> ApplicationSummary {
        ApplicationSummary {
            applied: self.applied.len(),
            skipped: self.skipped.len(),
            requires_approval: self.requires_approval.len(),
            failed: self.failed.len(),
        }
    }

    pub fn applied_ids(&self) -> Vec<&str> {
        self.applied.iter().map(|a| a.operation.operation_id.as_str()).collect()
    }

    pub fn has_applied(&self) -> bool {
        !self.applied.is_empty()
    }
}
