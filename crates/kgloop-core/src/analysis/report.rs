//! Analysis report document produced by the reflector

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::curation::Priority;
use crate::oracle::ParseErrorKind;

/// Issue severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[serde(alias = "critical", alias = "Critical")]
    Critical,
    #[serde(alias = "high", alias = "High")]
    High,
    #[serde(alias = "medium", alias = "Medium")]
    Medium,
    #[serde(alias = "mild", alias = "Mild", alias = "LOW", alias = "low", alias = "Low")]
    Mild,
}

impl Severity {
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Mild => 3,
        }
    }
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Priority::Critical,
            Severity::High => Priority::High,
            Severity::Medium => Priority::Medium,
            Severity::Mild => Priority::Low,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Mild => write!(f, "MILD"),
        }
    }
}

/// A systematic error class found in the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCategory {
    #[serde(default)]
    pub category_name: String,
    pub severity: Severity,
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub root_cause_hypothesis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_config: Option<String>,
    #[serde(default)]
    pub examples: Vec<Value>,
}

/// An error pattern not covered by the known categories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NovelPattern {
    pub pattern_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub examples: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendation {
    /// Kept as text; oracles use free-form values like "IMMEDIATE"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_impact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Recommendation {
    /// Priority when it names a known level
    pub fn priority_level(&self) -> Option<Priority> {
        self.priority.as_deref().and_then(Priority::parse)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySummary {
    pub critical_issues: u64,
    pub high_priority_issues: u64,
    pub medium_priority_issues: u64,
    pub mild_issues: u64,
    pub total_issues: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_rate_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_confirmed: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptAnalysis {
    pub pass1_extraction_issues: Vec<Value>,
    pub pass2_evaluation_issues: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meets_production_criteria: Option<bool>,
    /// Number or text such as "<5%"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_quality_threshold: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_quality_issue_rate: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stamped by the reflector after parsing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportMetadata {
    pub analysis_date: String,
    pub extraction_version: String,
    pub relationships_analyzed: usize,
    pub model_used: String,
    pub reflector_version: String,
}

/// Structured quality analysis of one extraction run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_metadata: Option<Value>,
    pub quality_summary: QualitySummary,
    pub issue_categories: Vec<IssueCategory>,
    pub novel_error_patterns: Vec<NovelPattern>,
    pub improvement_recommendations: Vec<Recommendation>,
    pub prompt_analysis: PromptAnalysis,
    pub system_health: SystemHealth,
    pub metadata: ReportMetadata,
    /// Set when the oracle output could not be used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ParseErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl AnalysisReport {
    /// Placeholder for unusable oracle output, keeping the text verbatim
    pub fn malformed(kind: ParseErrorKind, raw_response: impl Into<String>) -> Self {
        Self {
            error: Some(kind),
            raw_response: Some(raw_response.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Issue rate as a fraction (0.082 for 8.2%)
    ///
    /// Prefers `quality_summary.issue_rate_percent`, then
    /// `system_health.current_quality_issue_rate`. The latter is read as a
    /// percentage when it carries a `%` sign or exceeds 1.
    pub fn issue_rate(&self) -> Option<f64> {
        if let Some(percent) = self.quality_summary.issue_rate_percent {
            return Some(percent / 100.0);
        }

        match self.system_health.current_quality_issue_rate.as_ref()? {
            Value::Number(n) => {
                let rate = n.as_f64()?;
                Some(if rate > 1.0 { rate / 100.0 } else { rate })
            }
            Value::String(s) => {
                let trimmed = s.trim();
                let (digits, is_percent) = match trimmed.strip_suffix('%') {
                    Some(d) => (d.trim(), true),
                    None => (trimmed, false),
                };
                let rate: f64 = digits.parse().ok()?;
                Some(if is_percent || rate > 1.0 { rate / 100.0 } else { rate })
            }
            _ => None,
        }
    }

    /// Every name an operation may cite as its `affected_issue_category`
    pub fn finding_names(&self) -> Vec<&str> {
        let categories = self.issue_categories.iter().map(|c| c.category_name.as_str());
        let patterns = self.novel_error_patterns.iter().map(|p| p.pattern_name.as_str());
        let targets = self
            .improvement_recommendations
            .iter()
            .filter_map(|r| r.target_file.as_deref());
        categories
            .chain(patterns)
            .chain(targets)
            .filter(|name| !name.trim().is_empty())
            .collect()
    }

    /// Whether `name` matches a finding (case-insensitive)
    pub fn has_finding(&self, name: &str) -> bool {
        let name = name.trim();
        !name.is_empty()
            && self
                .finding_names()
                .iter()
                .any(|finding| finding.trim().eq_ignore_ascii_case(name))
    }

    /// Severity of the category or novel pattern named `name` (case-insensitive)
    pub fn severity_of(&self, name: &str) -> Option<Severity> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let matches = |candidate: &str| candidate.trim().eq_ignore_ascii_case(name);
        self.issue_categories
            .iter()
            .find(|c| matches(&c.category_name))
            .map(|c| c.severity)
            .or_else(|| {
                self.novel_error_patterns
                    .iter()
                    .find(|p| matches(&p.pattern_name))
                    .and_then(|p| p.severity)
            })
    }

    /// Most severe category, if any
    pub fn worst_severity(&self) -> Option<Severity> {
        self.issue_categories
            .iter()
            .map(|c| c.severity)
            .min_by_key(|s| s.rank())
    }
}
