//! Curator: turns an analysis report into a persisted changeset

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::analysis::{AnalysisReport, Severity};
use crate::error::Result;
use crate::oracle::{QualityOracle, parse_oracle_json};
use crate::playbook::{PlaybookSnapshot, PlaybookStore};

use super::changeset::{Changeset, Operation, OperationType, RiskLevel};

pub const CURATOR_VERSION: &str = concat!("kgloop-curator/", env!("CARGO_PKG_VERSION"));

const SYSTEM_PROMPT: &str = r#"You turn quality analyses of a knowledge graph extraction pipeline into executable changesets.

Every change must be a file operation against the playbook:
- CODE_FIX: verbatim edit of a module. edit_details.old_content must be copied
  exactly from the current file; only its first occurrence is replaced.
- PROMPT_ENHANCEMENT: verbatim edit of a prompt. Set edit_details.prompt_version
  (e.g. "v8") to write a new prompt version next to the old one.
- CONFIG_UPDATE: set one value in a JSON config. edit_details.json_path is a
  dotted path such as "confidence_filter.threshold"; edit_details.new_value is
  the value to store.
- NEW_MODULE: create a file. create_details.content holds the full text.

Rules:
- Each operation names the issue category it fixes in affected_issue_category,
  using the category_name from the analysis.
- Order work by severity: CRITICAL, HIGH, MEDIUM, LOW.
- risk_level is "low" only for narrow, validated edits; new modules and broad
  prompt rewrites are "medium" or "high".

Respond with a single JSON object and nothing else:
{
  "changeset_metadata": {"source_version": 0, "target_version": 0, "total_changes": 0, "estimated_impact": "..."},
  "file_operations": [{
    "operation_id": "change_001",
    "operation_type": "CODE_FIX|PROMPT_ENHANCEMENT|CONFIG_UPDATE|NEW_MODULE",
    "file_path": "modules/...",
    "priority": "CRITICAL|HIGH|MEDIUM|LOW",
    "risk_level": "low|medium|high",
    "rationale": "...",
    "affected_issue_category": "...",
    "expected_improvement": "...",
    "edit_details": {"old_content": "...", "new_content": "...", "prompt_version": "v8", "json_path": "...", "new_value": null},
    "create_details": {"content": "..."}
  }],
  "priorities": {"immediate": [], "short_term": [], "long_term": []},
  "testing_strategy": {"validation_steps": []},
  "rollback_plan": {"backup_location": "...", "rollback_command": "...", "rollback_conditions": []}
}"#;

pub struct Curator {
    oracle: Arc<dyn QualityOracle>,
    store: PlaybookStore,
}

impl Curator {
    pub fn new(oracle: Arc<dyn QualityOracle>, store: PlaybookStore) -> Self {
        Self { oracle, store }
    }

    /// Synthesize a changeset from `current_version` to the next version
    ///
    /// A fresh snapshot is read from the store when none is supplied.
    pub async fn curate(
        &self,
        report: &AnalysisReport,
        current_version: u32,
        snapshot: Option<&PlaybookSnapshot>,
    ) -> Result<Changeset> {
        self.curate_and_save(report, current_version, snapshot)
            .await
            .map(|(changeset, _)| changeset)
    }

    /// Like [`Curator::curate`], also returning where the changeset was written
    pub async fn curate_and_save(
        &self,
        report: &AnalysisReport,
        current_version: u32,
        snapshot: Option<&PlaybookSnapshot>,
    ) -> Result<(Changeset, PathBuf)> {
        let mut changeset = if report.is_error() {
            warn!(version = current_version, "Analysis report is unusable, proposing no changes");
            Changeset::new(current_version)
        } else {
            let snapshot = match snapshot {
                Some(s) => s.clone(),
                None => self.store.snapshot()?,
            };
            let payload = build_payload(report, current_version, &snapshot)?;

            info!(version = current_version, artifacts = snapshot.total(), "Starting curation");
            let response = self.oracle.synthesize(SYSTEM_PROMPT, &payload).await?;

            match parse_oracle_json::<Changeset>(&response) {
                Ok(mut parsed) => {
                    // Oracle-supplied markers are not trusted
                    parsed.error = None;
                    parsed.raw_response = None;
                    normalize(&mut parsed, report, current_version);
                    parsed
                }
                Err(failure) => {
                    warn!(
                        version = current_version,
                        kind = %failure.kind,
                        detail = %failure.detail,
                        "Oracle changeset unusable, keeping raw response"
                    );
                    Changeset::malformed(failure.kind, response, current_version)
                }
            }
        };

        changeset.metadata.curation_date = Utc::now().to_rfc3339();
        changeset.metadata.curator_version = CURATOR_VERSION.to_string();
        changeset.metadata.model_used = self.oracle.model().to_string();
        if !report.metadata.analysis_date.is_empty() {
            changeset.metadata.reflector_analysis_id = Some(format!(
                "{}@{}",
                report.metadata.extraction_version, report.metadata.analysis_date
            ));
        }

        let path = self.store.save_changeset(current_version, &changeset)?;

        info!(
            source_version = changeset.source_version(),
            target_version = changeset.target_version(),
            operations = changeset.file_operations.len(),
            untraced = changeset.metadata.untraced_operations.len(),
            "Curation complete"
        );
        Ok((changeset, path))
    }
}

fn build_payload(report: &AnalysisReport, current_version: u32, snapshot: &PlaybookSnapshot) -> Result<String> {
    let mut payload = String::from("Transform the following analysis into an executable changeset.\n\n");
    payload.push_str("## ANALYSIS REPORT\n\n");
    payload.push_str(&serde_json::to_string_pretty(report)?);
    payload.push_str("\n\n## CURRENT SYSTEM STATE\n\n");
    payload.push_str(&format!("Version: V{}\n", current_version));
    payload.push_str(&format!("Target Version: V{}\n\n", current_version + 1));
    payload.push_str("Current Playbook Structure:\n");
    payload.push_str(&serde_json::to_string_pretty(snapshot)?);
    payload.push_str(
        "\n\n## YOUR TASK\n\
         Propose the smallest set of file operations that fixes the root causes above.\n\
         Copy old_content exactly from the current artifacts, estimate the impact of each\n\
         change and give a rollback plan.\n\n\
         Output your changeset as JSON matching the schema in your instructions.",
    );
    Ok(payload)
}

/// Severity rank of the finding an operation traces to
///
/// Findings without a severity (recommendation targets) rank as MILD.
fn finding_rank(report: &AnalysisReport, op: &Operation) -> u8 {
    let Some(name) = op.affected_issue_category.as_deref() else {
        return Severity::Mild.rank() + 1;
    };
    match report.severity_of(name) {
        Some(severity) => severity.rank(),
        None if report.has_finding(name) => Severity::Mild.rank(),
        None => Severity::Mild.rank() + 1,
    }
}

/// Deterministic post-processing of a parsed changeset
fn normalize(changeset: &mut Changeset, report: &AnalysisReport, current_version: u32) {
    changeset.bind_versions(current_version);

    // Report severity of the traced finding first, then declared priority.
    // Untraced operations sort after MILD. The sort is stable.
    changeset
        .file_operations
        .sort_by_key(|op| (finding_rank(report, op), op.priority.rank()));

    let mut used: HashSet<String> = changeset
        .file_operations
        .iter()
        .map(|op| op.operation_id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    let mut next = 1;
    for op in changeset.file_operations.iter_mut() {
        if !op.operation_id.trim().is_empty() {
            continue;
        }
        let mut id = format!("change_{:03}", next);
        while used.contains(&id) {
            next += 1;
            id = format!("change_{:03}", next);
        }
        next += 1;
        used.insert(id.clone());
        op.operation_id = id;
    }

    let mut untraced = Vec::new();
    for op in changeset.file_operations.iter_mut() {
        if op.operation_type == OperationType::NewModule && op.risk_level < RiskLevel::Medium {
            op.risk_level = RiskLevel::Medium;
        }

        let traced = op
            .affected_issue_category
            .as_deref()
            .map(|name| report.has_finding(name))
            .unwrap_or(false);
        if !traced {
            warn!(
                operation_id = %op.operation_id,
                category = ?op.affected_issue_category,
                "Operation does not trace to a report finding, raising risk"
            );
            op.risk_level = RiskLevel::High;
            untraced.push(op.operation_id.clone());
        }
    }
    changeset.metadata.untraced_operations = untraced;
    changeset.changeset_metadata.total_changes = Some(changeset.file_operations.len());
}
