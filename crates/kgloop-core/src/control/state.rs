//! Loop states and per-iteration outcome

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisReport;
use crate::apply::ApplicationResult;
use crate::curation::Changeset;
use crate::pipeline::ModuleFailure;

/// Where an iteration stopped
///
/// `Extracted -> Analyzed -> Curated -> {Applied | PendingApproval}`; an
/// `Applied` iteration feeds the next one at the advanced version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Extracted,
    /// Analysis met the quality target; nothing was curated
    Analyzed,
    Curated,
    Applied,
    PendingApproval,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extracted => write!(f, "extracted"),
            Self::Analyzed => write!(f, "analyzed"),
            Self::Curated => write!(f, "curated"),
            Self::Applied => write!(f, "applied"),
            Self::PendingApproval => write!(f, "pending_approval"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationOutcome {
    /// Playbook version the iteration ran against
    pub version: u32,
    pub state: LoopState,
    pub report: AnalysisReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changeset: Option<Changeset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationResult>,
    pub pipeline_failures: Vec<ModuleFailure>,
    /// Set when the playbook version was advanced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_to: Option<u32>,
}

impl IterationOutcome {
    pub fn meets_target(&self, target_issue_rate: f64) -> bool {
        self.report
            .issue_rate()
            .map(|rate| rate <= target_issue_rate)
            .unwrap_or(false)
    }
}
