//! Reflector: turns an extraction run into a persisted analysis report

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ReflectorConfig;
use crate::error::Result;
use crate::oracle::{QualityOracle, parse_oracle_json, truncate_chars};
use crate::pipeline::Relationship;
use crate::playbook::PlaybookStore;

use super::report::AnalysisReport;

pub const REFLECTOR_VERSION: &str = concat!("kgloop-reflector/", env!("CARGO_PKG_VERSION"));

/// Shown to the oracle when a prompt artifact cannot be loaded
pub const MISSING_PROMPT: &str = "(Prompt not available for analysis)";

const EXTRACTION_PROMPT: &str = "pass1_extraction";
const EVALUATION_PROMPT: &str = "pass2_evaluation";

const SYSTEM_PROMPT: &str = r#"You are the quality reviewer of a knowledge graph extraction pipeline.

The pipeline has three kinds of artifacts you can reason about:
- prompts (prompts/*.txt) that drive the extraction and evaluation passes
- transformation modules (modules/) that post-process extracted relationships
- configuration (config/*.json, config/vocabularies/) that parameterizes modules

Your job:
1. Find systematic errors in the sampled relationships, not one-off mistakes.
2. Group them into issue categories with a severity:
   CRITICAL (factually wrong or reversed), HIGH (unusable entities such as
   unresolved pronouns), MEDIUM (vague or incomplete entities), MILD (style).
3. Trace each category to the module, prompt or config most likely at fault.
4. Say whether the prompts themselves encourage the errors.
5. Recommend concrete, minimal fixes with the file they apply to.

Respond with a single JSON object and nothing else:
{
  "extraction_metadata": {"version": "...", "total_relationships": 0},
  "quality_summary": {
    "critical_issues": 0, "high_priority_issues": 0, "medium_priority_issues": 0,
    "mild_issues": 0, "total_issues": 0, "issue_rate_percent": 0.0,
    "grade_confirmed": "A/B/C"
  },
  "issue_categories": [{
    "category_name": "...", "severity": "CRITICAL|HIGH|MEDIUM|MILD",
    "count": 0, "percentage": 0.0, "description": "...",
    "root_cause_hypothesis": "...", "affected_module": "modules/...",
    "affected_prompt": "prompts/...", "affected_config": "config/...",
    "examples": [{"source": "...", "relationship": "...", "target": "...", "evidence_text": "..."}]
  }],
  "novel_error_patterns": [{"pattern_name": "...", "description": "...", "severity": "...", "examples": []}],
  "improvement_recommendations": [{
    "priority": "CRITICAL|HIGH|MEDIUM|LOW", "type": "CODE_FIX|PROMPT_ENHANCEMENT|CONFIG_UPDATE|NEW_MODULE",
    "target_file": "...", "recommendation": "...", "expected_impact": "...", "rationale": "..."
  }],
  "prompt_analysis": {"pass1_extraction_issues": [], "pass2_evaluation_issues": []},
  "system_health": {
    "meets_production_criteria": false, "target_quality_threshold": "<5%",
    "current_quality_issue_rate": "0.0%"
  }
}"#;

/// What the extraction run being analyzed was
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// Extraction version tag, e.g. "v7"; also selects the prompt versions shown
    pub version: String,
    #[serde(default)]
    pub book_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl ExtractionMetadata {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_book_title(mut self, title: impl Into<String>) -> Self {
        self.book_title = title.into();
        self
    }
}

pub struct Reflector {
    oracle: Arc<dyn QualityOracle>,
    store: PlaybookStore,
    config: ReflectorConfig,
}

impl Reflector {
    pub fn new(oracle: Arc<dyn QualityOracle>, store: PlaybookStore, config: ReflectorConfig) -> Self {
        Self { oracle, store, config }
    }

    /// Analyze a batch against caller-supplied history
    ///
    /// Malformed oracle output yields a report with `error` set; only oracle
    /// transport failures and persistence failures are returned as errors.
    pub async fn analyze(
        &self,
        batch: &[Relationship],
        source_text: &str,
        metadata: &ExtractionMetadata,
        history: &[Value],
    ) -> Result<AnalysisReport> {
        self.analyze_and_save(batch, source_text, metadata, history)
            .await
            .map(|(report, _)| report)
    }

    /// Analyze a batch using the newest reports in the playbook as history
    pub async fn analyze_with_history(
        &self,
        batch: &[Relationship],
        source_text: &str,
        metadata: &ExtractionMetadata,
    ) -> Result<(AnalysisReport, PathBuf)> {
        let history = self.store.recent_reports(self.config.history_reports)?;
        self.analyze_and_save(batch, source_text, metadata, &history).await
    }

    /// Like [`Reflector::analyze`], also returning where the report was written
    pub async fn analyze_and_save(
        &self,
        batch: &[Relationship],
        source_text: &str,
        metadata: &ExtractionMetadata,
        history: &[Value],
    ) -> Result<(AnalysisReport, PathBuf)> {
        info!(
            version = %metadata.version,
            relationships = batch.len(),
            "Starting quality analysis"
        );

        let payload = self.build_payload(batch, source_text, metadata, history)?;
        let response = self.oracle.analyze(SYSTEM_PROMPT, &payload).await?;

        let mut report = match parse_oracle_json::<AnalysisReport>(&response) {
            Ok(report) => report,
            Err(failure) => {
                warn!(
                    version = %metadata.version,
                    kind = %failure.kind,
                    detail = %failure.detail,
                    "Oracle analysis unusable, keeping raw response"
                );
                AnalysisReport::malformed(failure.kind, response)
            }
        };

        report.metadata.analysis_date = Utc::now().to_rfc3339();
        report.metadata.extraction_version = metadata.version.clone();
        report.metadata.relationships_analyzed = batch.len();
        report.metadata.model_used = self.oracle.model().to_string();
        report.metadata.reflector_version = REFLECTOR_VERSION.to_string();

        let path = self.store.save_report(&metadata.version, &report)?;

        info!(
            version = %metadata.version,
            categories = report.issue_categories.len(),
            issue_rate = ?report.issue_rate(),
            "Quality analysis complete"
        );
        Ok((report, path))
    }

    fn load_prompt_or_placeholder(&self, name: &str, version: &str) -> String {
        match self.store.load_prompt(name, version) {
            Ok(text) => text,
            Err(e) => {
                warn!(prompt = %name, version = %version, error = %e, "Prompt not available for analysis");
                MISSING_PROMPT.to_string()
            }
        }
    }

    fn build_payload(
        &self,
        batch: &[Relationship],
        source_text: &str,
        metadata: &ExtractionMetadata,
        history: &[Value],
    ) -> Result<String> {
        let cfg = &self.config;
        let sample: Vec<&Relationship> = batch.iter().take(cfg.sample_relationships).collect();

        let extraction_prompt = self.load_prompt_or_placeholder(EXTRACTION_PROMPT, &metadata.version);
        let evaluation_prompt = self.load_prompt_or_placeholder(EVALUATION_PROMPT, &metadata.version);

        let mut payload = String::from("Analyze this knowledge graph extraction for quality issues.\n\n");

        payload.push_str("## EXTRACTION METADATA\n");
        payload.push_str(&format!("- Version: {}\n", metadata.version));
        payload.push_str(&format!("- Book: {}\n", metadata.book_title));
        payload.push_str(&format!("- Total Relationships: {}\n", batch.len()));
        payload.push_str(&format!(
            "- Extraction Date: {}\n\n",
            metadata.date.as_deref().unwrap_or("unknown")
        ));

        payload.push_str("## CURRENT PROMPTS\n\n");
        payload.push_str(&format!("### {} ({})\n", EXTRACTION_PROMPT, metadata.version));
        payload.push_str(&truncate_chars(&extraction_prompt, cfg.extraction_prompt_chars));
        payload.push_str("\n\n");
        payload.push_str(&format!("### {} ({})\n", EVALUATION_PROMPT, metadata.version));
        payload.push_str(&truncate_chars(&evaluation_prompt, cfg.evaluation_prompt_chars));
        payload.push_str("\n\n");

        payload.push_str("## SOURCE TEXT SAMPLE\n");
        payload.push_str(&truncate_chars(source_text, cfg.source_excerpt_chars));
        payload.push_str("\n\n");

        payload.push_str(&format!(
            "## EXTRACTED RELATIONSHIPS (sample {}/{})\n",
            sample.len(),
            batch.len()
        ));
        payload.push_str(&serde_json::to_string_pretty(&sample)?);
        payload.push_str("\n\n");

        payload.push_str("## HISTORICAL QUALITY REPORTS\n");
        if history.is_empty() {
            payload.push_str("No historical reports available.\n");
        } else {
            for (i, report) in history.iter().take(cfg.history_reports).enumerate() {
                let title = report
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Report {}", i + 1));
                payload.push_str(&format!("\n### {}\n", title));
                payload.push_str(&truncate_chars(
                    &serde_json::to_string_pretty(report)?,
                    cfg.history_report_chars,
                ));
                payload.push('\n');
            }
        }

        payload.push_str(
            "\n## YOUR TASK\n\
             1. Identify systematic error patterns in the sample.\n\
             2. Assign each category a severity and an estimated count over the full batch.\n\
             3. For each category, name the module, prompt or config you believe caused it.\n\
             4. Point out prompt wording that invites the errors.\n\
             5. Recommend fixes that are specific enough to turn into file edits.\n\n\
             Output your analysis as JSON matching the schema in your instructions.",
        );

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{OracleCallKind, ParseErrorKind, ScriptedOracle};
    use crate::playbook::REPORTS_DIR;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(oracle: ScriptedOracle) -> (TempDir, PlaybookStore, Arc<ScriptedOracle>, Reflector) {
        let temp = TempDir::new().unwrap();
        let store = PlaybookStore::init(temp.path()).unwrap();
        let oracle = Arc::new(oracle);
        let reflector = Reflector::new(oracle.clone(), store.clone(), ReflectorConfig::default());
        (temp, store, oracle, reflector)
    }

    fn batch(n: usize) -> Vec<Relationship> {
        (0..n)
            .map(|i| Relationship::new(format!("entity {}", i), "relates to", "soil"))
            .collect()
    }

    fn saved_reports(store: &PlaybookStore) -> usize {
        std::fs::read_dir(store.root().join(REPORTS_DIR)).unwrap().count()
    }

    #[tokio::test]
    async fn test_analyze_parses_stamps_and_persists() {
        let response = format!(
            "```json\n{}\n```",
            json!({
                "quality_summary": {"total_issues": 3, "issue_rate_percent": 3.0},
                "issue_categories": [{"category_name": "Pronoun Sources", "severity": "HIGH", "count": 3}]
            })
        );
        let (_temp, store, _oracle, reflector) = setup(ScriptedOracle::new().with_analysis(response));

        let metadata = ExtractionMetadata::new("v7").with_book_title("Soil Stewardship");
        let report = reflector.analyze(&batch(10), "text", &metadata, &[]).await.unwrap();

        assert!(!report.is_error());
        assert_eq!(report.issue_categories.len(), 1);
        assert_eq!(report.metadata.extraction_version, "v7");
        assert_eq!(report.metadata.relationships_analyzed, 10);
        assert_eq!(report.metadata.model_used, "scripted");
        assert_eq!(saved_reports(&store), 1);

        let persisted = store.recent_reports(1).unwrap();
        assert_eq!(persisted[0]["metadata"]["extraction_version"], "v7");
    }

    #[tokio::test]
    async fn test_malformed_response_is_kept_verbatim() {
        let raw = "I am unable to produce JSON today.\n  Sorry!";
        let (_temp, store, _oracle, reflector) = setup(ScriptedOracle::new().with_analysis(raw));

        let report = reflector
            .analyze(&batch(2), "text", &ExtractionMetadata::new("v7"), &[])
            .await
            .unwrap();

        assert_eq!(report.error, Some(ParseErrorKind::JsonParseFailed));
        assert_eq!(report.raw_response.as_deref(), Some(raw));
        assert_eq!(saved_reports(&store), 1);
    }

    #[tokio::test]
    async fn test_payload_is_bounded() {
        let (_temp, store, oracle, reflector) = setup(ScriptedOracle::new().with_analysis("{}"));
        store
            .write_artifact("prompts/pass1_extraction_v7.txt", &"P".repeat(5000))
            .unwrap();

        let source = "S".repeat(10_000);
        let history = vec![json!({"title": "Older run", "blob": "H".repeat(10_000)})];
        reflector
            .analyze(&batch(250), &source, &ExtractionMetadata::new("v7"), &history)
            .await
            .unwrap();

        let calls = oracle.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, OracleCallKind::Analyze);
        let payload = &calls[0].user_payload;

        assert!(payload.contains("sample 100/250"));
        assert!(payload.contains("entity 99\""));
        assert!(!payload.contains("entity 100\""));
        assert!(payload.contains(&format!("{}...", "P".repeat(1500))));
        assert!(!payload.contains(&"P".repeat(1501)));
        assert!(!payload.contains(&"S".repeat(2001)));
        assert!(payload.contains("### Older run"));
        assert!(!payload.contains(&"H".repeat(3000)));
        assert!(payload.contains(MISSING_PROMPT));
    }

    #[tokio::test]
    async fn test_history_loaded_from_store() {
        let (_temp, store, oracle, reflector) =
            setup(ScriptedOracle::new().with_analysis("{}").with_analysis("{}"));
        let metadata = ExtractionMetadata::new("v7");

        let (_, first) = reflector.analyze_with_history(&batch(1), "", &metadata).await.unwrap();
        assert!(first.starts_with(store.root().join(REPORTS_DIR)));
        reflector.analyze_with_history(&batch(1), "", &metadata).await.unwrap();

        let calls = oracle.calls();
        assert!(calls[0].user_payload.contains("No historical reports available."));
        assert!(calls[1].user_payload.contains("\"extraction_version\": \"v7\""));
    }

    #[tokio::test]
    async fn test_oracle_failure_propagates_without_saving() {
        let (_temp, store, _oracle, reflector) = setup(ScriptedOracle::new());
        let result = reflector
            .analyze(&batch(1), "", &ExtractionMetadata::new("v7"), &[])
            .await;

        assert!(result.is_err());
        assert_eq!(saved_reports(&store), 0);
    }
}
