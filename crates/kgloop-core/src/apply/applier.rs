//! Change applier: risk-gated, per-operation isolated mutation of the playbook

use std::fs;
use std::io::ErrorKind;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::curation::{Changeset, Operation, RiskLevel};
use crate::error::{Error, Result};
use crate::playbook::PlaybookStore;

use super::action::FileAction;
use super::error::{ApplyError, ApplyErrorKind};
use super::patch::{derive_prompt_path, replace_first, set_json_path};
use super::result::{AppliedOperation, ApplicationResult, FailedOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Preview only; every operation is skipped
    pub dry_run: bool,
    pub auto_apply_low_risk: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            auto_apply_low_risk: true,
        }
    }
}

impl ApplyOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

pub struct ChangeApplier {
    store: PlaybookStore,
}

impl ChangeApplier {
    pub fn new(store: PlaybookStore) -> Self {
        Self { store }
    }

    /// Apply a changeset under the risk policy
    ///
    /// Only a changeset carrying an oracle parse error is rejected as a
    /// whole; every other problem is recorded per operation.
    pub async fn apply(&self, changeset: &Changeset, options: ApplyOptions) -> Result<ApplicationResult> {
        reject_malformed(changeset)?;

        info!(
            source_version = changeset.source_version(),
            target_version = changeset.target_version(),
            operations = changeset.file_operations.len(),
            dry_run = options.dry_run,
            auto_apply_low_risk = options.auto_apply_low_risk,
            "Applying changeset"
        );

        let mut result = ApplicationResult::default();
        for op in &changeset.file_operations {
            if options.dry_run {
                debug!(operation_id = %op.operation_id, "Dry run, skipping");
                result.skipped.push(op.clone());
            } else if op.risk_level == RiskLevel::Low && options.auto_apply_low_risk {
                self.attempt_into(op, &mut result).await;
            } else {
                info!(
                    operation_id = %op.operation_id,
                    risk = %op.risk_level,
                    "Operation requires approval"
                );
                result.requires_approval.push(op.clone());
            }
        }

        info!(summary = %result.summary(), "Changeset processed");
        Ok(result)
    }

    /// Apply operator-approved operations regardless of risk level
    ///
    /// Preconditions still hold. Ids not present in the changeset are
    /// reported as failures.
    pub async fn approve(&self, changeset: &Changeset, operation_ids: &[String]) -> Result<ApplicationResult> {
        reject_malformed(changeset)?;

        let mut result = ApplicationResult::default();
        for id in operation_ids {
            match changeset.operation(id) {
                Some(op) => self.attempt_into(op, &mut result).await,
                None => {
                    warn!(operation_id = %id, "Approved operation not in changeset");
                    result.failed.push(FailedOperation {
                        operation_id: id.clone(),
                        operation: None,
                        error: Error::OperationNotFound(id.clone()).to_string(),
                        kind: ApplyErrorKind::OperationNotFound,
                    });
                }
            }
        }

        info!(summary = %result.summary(), "Approved operations processed");
        Ok(result)
    }

    async fn attempt_into(&self, op: &Operation, result: &mut ApplicationResult) {
        match self.attempt(op).await {
            Ok(applied) => {
                info!(
                    operation_id = %op.operation_id,
                    operation_type = %op.operation_type,
                    path = %applied.written_path,
                    "Operation applied"
                );
                result.applied.push(applied);
            }
            Err(e) => {
                warn!(
                    operation_id = %op.operation_id,
                    operation_type = %op.operation_type,
                    path = %op.file_path,
                    error = %e,
                    "Operation failed"
                );
                result.failed.push(FailedOperation {
                    operation_id: op.operation_id.clone(),
                    operation: Some(op.clone()),
                    error: e.to_string(),
                    kind: e.kind(),
                });
            }
        }
    }

    async fn attempt(&self, op: &Operation) -> std::result::Result<AppliedOperation, ApplyError> {
        let action = FileAction::from_operation(op)?;

        let written_path = match &action {
            FileAction::ReplacePrompt { version, .. } => derive_prompt_path(&op.file_path, version),
            _ => op.file_path.clone(),
        };
        self.store.resolve(&op.file_path)?;
        let target = self.store.resolve(&written_path)?;

        let _guard = self.store.locks().acquire(&target, &op.operation_id).await?;

        let before = self.read_optional(&written_path)?;
        let after = match action {
            FileAction::ReplaceText { old, new } => {
                let current = before
                    .clone()
                    .ok_or_else(|| ApplyError::NotFound(op.file_path.clone()))?;
                replace_first(&current, &old, &new).ok_or_else(|| ApplyError::StalePatch(op.file_path.clone()))?
            }
            FileAction::ReplacePrompt { old, new, .. } => {
                let source = self.store.read_artifact(&op.file_path)?;
                replace_first(&source, &old, &new).ok_or_else(|| ApplyError::StalePatch(op.file_path.clone()))?
            }
            FileAction::SetConfigValue { json_path, value } => {
                let current = before
                    .clone()
                    .ok_or_else(|| ApplyError::NotFound(op.file_path.clone()))?;
                let mut config: serde_json::Value =
                    serde_json::from_str(&current).map_err(|e| ApplyError::InvalidConfig {
                        path: op.file_path.clone(),
                        message: e.to_string(),
                    })?;
                set_json_path(&mut config, &json_path, value)
                    .map_err(|message| ApplyError::ConfigPath { json_path, message })?;
                let mut text = serde_json::to_string_pretty(&config).map_err(|e| ApplyError::Io(e.to_string()))?;
                text.push('\n');
                text
            }
            FileAction::CreateFile { content } => content,
        };

        self.store.write_artifact(&written_path, &after)?;

        Ok(AppliedOperation {
            operation: op.clone(),
            written_path,
            before_sha256: before.as_deref().map(sha256_hex),
            after_sha256: sha256_hex(&after),
        })
    }

    fn read_optional(&self, relative: &str) -> std::result::Result<Option<String>, ApplyError> {
        let path = self.store.resolve(relative)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ApplyError::Io(e.to_string())),
        }
    }
}

/// Whole-changeset checks: an oracle parse error or a broken version pair
fn reject_malformed(changeset: &Changeset) -> Result<()> {
    if let Some(kind) = changeset.error {
        return Err(Error::MalformedChangeset(kind.to_string()));
    }
    let (source, target) = (changeset.source_version(), changeset.target_version());
    if source.checked_add(1) != Some(target) {
        warn!(source, target, "Changeset version pair is not consecutive");
        return Err(Error::MalformedChangeset(format!(
            "target_version {} does not follow source_version {}",
            target, source
        )));
    }
    Ok(())
}

fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::OperationType;
    use crate::oracle::ParseErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PlaybookStore, ChangeApplier) {
        let temp = TempDir::new().unwrap();
        let store = PlaybookStore::init(temp.path()).unwrap();
        let applier = ChangeApplier::new(store.clone());
        (temp, store, applier)
    }

    fn code_fix(id: &str, risk: RiskLevel) -> Operation {
        Operation::new(id, OperationType::CodeFix, "modules/resolver.py")
            .with_risk(risk)
            .with_replacement("window = 3", "window = 5")
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let (_temp, store, applier) = setup();
        store.write_artifact("modules/resolver.py", "window = 3\n").unwrap();
        let changeset = Changeset::new(5).with_operation(code_fix("change_001", RiskLevel::Low));

        let result = applier.apply(&changeset, ApplyOptions::dry_run()).await.unwrap();

        assert!(result.applied.is_empty());
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(store.read_artifact("modules/resolver.py").unwrap(), "window = 3\n");
    }

    #[tokio::test]
    async fn test_risk_gating() {
        let (_temp, store, applier) = setup();
        store.write_artifact("modules/resolver.py", "window = 3\n").unwrap();
        let changeset = Changeset::new(5)
            .with_operation(code_fix("change_001", RiskLevel::Medium))
            .with_operation(code_fix("change_002", RiskLevel::High));

        let result = applier.apply(&changeset, ApplyOptions::default()).await.unwrap();
        assert!(result.applied.is_empty());
        assert_eq!(result.requires_approval.len(), 2);

        let manual = ApplyOptions {
            dry_run: false,
            auto_apply_low_risk: false,
        };
        let low_only = Changeset::new(5).with_operation(code_fix("change_003", RiskLevel::Low));
        let result = applier.apply(&low_only, manual).await.unwrap();
        assert_eq!(result.requires_approval.len(), 1);
        assert_eq!(store.read_artifact("modules/resolver.py").unwrap(), "window = 3\n");
    }

    #[tokio::test]
    async fn test_code_fix_records_hashes_and_is_idempotent() {
        let (_temp, store, applier) = setup();
        store.write_artifact("modules/resolver.py", "window = 3\n").unwrap();
        let changeset = Changeset::new(5).with_operation(code_fix("change_001", RiskLevel::Low));

        let first = applier.apply(&changeset, ApplyOptions::default()).await.unwrap();
        assert_eq!(first.applied_ids(), vec!["change_001"]);
        assert_eq!(store.read_artifact("modules/resolver.py").unwrap(), "window = 5\n");
        let applied = &first.applied[0];
        assert_eq!(applied.before_sha256.as_deref(), Some(sha256_hex("window = 3\n").as_str()));
        assert_eq!(applied.after_sha256, sha256_hex("window = 5\n"));

        let second = applier.apply(&changeset, ApplyOptions::default()).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.failed.len(), 1);
        assert_eq!(second.failed[0].kind, ApplyErrorKind::StalePatch);
        assert_eq!(store.read_artifact("modules/resolver.py").unwrap(), "window = 5\n");
    }

    #[tokio::test]
    async fn test_missing_target_and_unknown_type_fail_independently() {
        let (_temp, store, applier) = setup();
        store.write_artifact("modules/resolver.py", "window = 3\n").unwrap();
        let changeset = Changeset::new(5)
            .with_operation(
                Operation::new("change_001", OperationType::CodeFix, "modules/missing.py")
                    .with_risk(RiskLevel::Low)
                    .with_replacement("a", "b"),
            )
            .with_operation(
                Operation::new("change_002", OperationType::Other("DELETE_FILE".into()), "modules/resolver.py")
                    .with_risk(RiskLevel::Low),
            )
            .with_operation(
                Operation::new("change_003", OperationType::CodeFix, "../escape.py")
                    .with_risk(RiskLevel::Low)
                    .with_replacement("a", "b"),
            )
            .with_operation(code_fix("change_004", RiskLevel::Low));

        let result = applier.apply(&changeset, ApplyOptions::default()).await.unwrap();

        let kinds: Vec<_> = result.failed.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![ApplyErrorKind::NotFound, ApplyErrorKind::UnknownOperationType, ApplyErrorKind::PathEscape]
        );
        assert_eq!(result.applied_ids(), vec!["change_004"]);
        assert_eq!(result.summary().total(), 4);
    }

    #[tokio::test]
    async fn test_prompt_versioning_preserves_original() {
        let (_temp, store, applier) = setup();
        store
            .write_artifact("prompts/pass1_extraction_v7.txt", "## OUTPUT FORMAT ##\n")
            .unwrap();
        let op = Operation::new("change_001", OperationType::PromptEnhancement, "prompts/pass1_extraction_v7.txt")
            .with_risk(RiskLevel::Low)
            .with_replacement("## OUTPUT FORMAT ##", "## RULES ##\n\n## OUTPUT FORMAT ##")
            .with_prompt_version("v8");

        let result = applier
            .apply(&Changeset::new(7).with_operation(op), ApplyOptions::default())
            .await
            .unwrap();

        assert_eq!(result.applied[0].written_path, "prompts/pass1_extraction_v8.txt");
        assert_eq!(result.applied[0].before_sha256, None);
        assert_eq!(
            store.read_artifact("prompts/pass1_extraction_v7.txt").unwrap(),
            "## OUTPUT FORMAT ##\n"
        );
        assert!(
            store
                .read_artifact("prompts/pass1_extraction_v8.txt")
                .unwrap()
                .starts_with("## RULES ##")
        );
    }

    #[tokio::test]
    async fn test_config_update_and_new_module() {
        let (_temp, store, applier) = setup();
        store
            .write_artifact("config/filters.json", r#"{"confidence_filter": {"threshold": 0.5}}"#)
            .unwrap();
        store.write_artifact("config/broken.json", "not json").unwrap();

        let changeset = Changeset::new(2)
            .with_operation(
                Operation::new("change_001", OperationType::ConfigUpdate, "config/filters.json")
                    .with_risk(RiskLevel::Low)
                    .with_config_value("confidence_filter.threshold", json!(0.7)),
            )
            .with_operation(
                Operation::new("change_002", OperationType::ConfigUpdate, "config/broken.json")
                    .with_risk(RiskLevel::Low)
                    .with_config_value("a", json!(1)),
            )
            .with_operation(
                Operation::new("change_003", OperationType::NewModule, "modules/validators/chemistry.py")
                    .with_risk(RiskLevel::Low)
                    .with_content("class ChemistryValidator: pass\n"),
            );

        let result = applier.apply(&changeset, ApplyOptions::default()).await.unwrap();

        assert_eq!(result.applied_ids(), vec!["change_001", "change_003"]);
        assert_eq!(result.failed[0].kind, ApplyErrorKind::InvalidConfig);
        let config: serde_json::Value =
            serde_json::from_str(&store.read_artifact("config/filters.json").unwrap()).unwrap();
        assert_eq!(config["confidence_filter"]["threshold"], 0.7);
        assert!(store.exists("modules/validators/chemistry.py"));

        let again = applier.apply(&changeset, ApplyOptions::default()).await.unwrap();
        assert_eq!(again.applied_ids(), vec!["change_001", "change_003"]);
    }

    #[tokio::test]
    async fn test_approve_ignores_risk_and_reports_unknown_ids() {
        let (_temp, store, applier) = setup();
        store.write_artifact("modules/resolver.py", "window = 3\n").unwrap();
        let changeset = Changeset::new(5).with_operation(code_fix("change_001", RiskLevel::High));

        let result = applier
            .approve(&changeset, &["change_001".to_string(), "change_999".to_string()])
            .await
            .unwrap();

        assert_eq!(result.applied_ids(), vec!["change_001"]);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].error.contains("change_999"));
        assert_eq!(result.failed[0].kind, ApplyErrorKind::OperationNotFound);
        assert!(result.failed[0].operation.is_none());
        assert_eq!(store.read_artifact("modules/resolver.py").unwrap(), "window = 5\n");
    }

    #[tokio::test]
    async fn test_malformed_changeset_is_rejected() {
        let (_temp, _store, applier) = setup();
        let changeset = Changeset::malformed(ParseErrorKind::SchemaMismatch, "{}", 1);

        let err = applier.apply(&changeset, ApplyOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::MalformedChangeset(_)));
        assert_eq!(err.code(), "E400");
    }

    #[tokio::test]
    async fn test_non_consecutive_versions_are_rejected() {
        let (_temp, store, applier) = setup();
        store.write_artifact("modules/resolver.py", "window = 3\n").unwrap();
        let changeset: Changeset = serde_json::from_value(serde_json::json!({
            "changeset_metadata": {"source_version": 5, "target_version": 9},
            "file_operations": [{
                "operation_id": "c1",
                "operation_type": "CODE_FIX",
                "file_path": "modules/resolver.py",
                "risk_level": "low",
                "edit_details": {"old_content": "window = 3", "new_content": "window = 5"}
            }]
        }))
        .unwrap();

        let err = applier.apply(&changeset, ApplyOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::MalformedChangeset(ref msg) if msg.contains("source_version 5")));
        let err = applier.approve(&changeset, &["c1".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::MalformedChangeset(_)));
        assert_eq!(store.read_artifact("modules/resolver.py").unwrap(), "window = 3\n");
    }
}
