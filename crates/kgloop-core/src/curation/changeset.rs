//! Changeset document: versioned, traceable proposed artifact mutations

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::oracle::ParseErrorKind;

/// Operation priority, CRITICAL first
///
/// Parsed case-insensitively; MILD from the report severity scale maps to
/// LOW. Missing or unrecognized values are medium so one odd operation does
/// not invalidate the whole changeset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "Option<String>")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Sort key: lower runs first
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Known level named by `text`, if any
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Self::Critical),
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" | "MILD" => Some(Self::Low),
            _ => None,
        }
    }
}

impl From<Option<String>> for Priority {
    fn from(value: Option<String>) -> Self {
        value.as_deref().and_then(Self::parse).unwrap_or_default()
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Blast radius of a proposed change
///
/// Parsed case-insensitively. A missing value is medium; an unrecognized
/// value is high so it can never be auto-applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl From<Option<String>> for RiskLevel {
    fn from(value: Option<String>) -> Self {
        match value.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
            None => Self::Medium,
            Some(s) => match s.as_str() {
                "low" => Self::Low,
                "medium" => Self::Medium,
                _ => Self::High,
            },
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Kind of file operation
///
/// Unknown kinds are kept as [`OperationType::Other`] so one bad operation
/// fails on its own at apply time instead of rejecting the whole changeset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationType {
    CodeFix,
    PromptEnhancement,
    ConfigUpdate,
    NewModule,
    Other(String),
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CodeFix => "CODE_FIX",
            Self::PromptEnhancement => "PROMPT_ENHANCEMENT",
            Self::ConfigUpdate => "CONFIG_UPDATE",
            Self::NewModule => "NEW_MODULE",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for OperationType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "CODE_FIX" => Self::CodeFix,
            "PROMPT_ENHANCEMENT" => Self::PromptEnhancement,
            "CONFIG_UPDATE" => Self::ConfigUpdate,
            "NEW_MODULE" => Self::NewModule,
            _ => Self::Other(value),
        }
    }
}

impl From<OperationType> for String {
    fn from(value: OperationType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edit payload for CODE_FIX, PROMPT_ENHANCEMENT and CONFIG_UPDATE
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    /// Write the edited prompt to a new versioned file (e.g. "v8")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<String>,
    /// Dotted path for CONFIG_UPDATE
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Fields the applier does not interpret (target_function, validation, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Creation payload for NEW_MODULE
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One proposed file mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub operation_id: String,
    pub operation_type: OperationType,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub rationale: String,
    /// Report finding this operation addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_issue_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_improvement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_details: Option<EditDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_details: Option<CreateDetails>,
}

impl Operation {
    pub fn new(
        operation_id: impl Into<String>,
        operation_type: OperationType,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_type,
            file_path: file_path.into(),
            priority: Priority::default(),
            risk_level: RiskLevel::default(),
            rationale: String::new(),
            affected_issue_category: None,
            expected_improvement: None,
            edit_details: None,
            create_details: None,
        }
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.affected_issue_category = Some(category.into());
        self
    }

    /// Verbatim replace of `old` by `new`
    pub fn with_replacement(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        let details = self.edit_details.get_or_insert_with(EditDetails::default);
        details.old_content = Some(old.into());
        details.new_content = Some(new.into());
        self
    }

    pub fn with_prompt_version(mut self, version: impl Into<String>) -> Self {
        self.edit_details
            .get_or_insert_with(EditDetails::default)
            .prompt_version = Some(version.into());
        self
    }

    pub fn with_config_value(mut self, json_path: impl Into<String>, value: Value) -> Self {
        let details = self.edit_details.get_or_insert_with(EditDetails::default);
        details.json_path = Some(json_path.into());
        details.new_value = Some(value);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.create_details
            .get_or_insert_with(CreateDetails::default)
            .content = Some(content.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangesetMetadata {
    pub source_version: u32,
    pub target_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_changes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_impact: Option<String>,
}

/// Stamped by the curator after parsing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationMetadata {
    pub curation_date: String,
    pub source_version: u32,
    pub target_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflector_analysis_id: Option<String>,
    pub curator_version: String,
    pub model_used: String,
    /// Operations that matched no finding in the report
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub untraced_operations: Vec<String>,
}

/// Proposed mutations from one version to the next
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Changeset {
    pub changeset_metadata: ChangesetMetadata,
    pub file_operations: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priorities: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testing_strategy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<Value>,
    pub metadata: CurationMetadata,
    /// Set when the oracle output could not be used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ParseErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl Changeset {
    /// An empty changeset from `source_version` to the next version
    pub fn new(source_version: u32) -> Self {
        let mut changeset = Self::default();
        changeset.bind_versions(source_version);
        changeset
    }

    /// Placeholder for unusable oracle output; carries no operations
    pub fn malformed(kind: ParseErrorKind, raw_response: impl Into<String>, source_version: u32) -> Self {
        let mut changeset = Self::new(source_version);
        changeset.error = Some(kind);
        changeset.raw_response = Some(raw_response.into());
        changeset
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.file_operations.push(operation);
        self.changeset_metadata.total_changes = Some(self.file_operations.len());
        self
    }

    /// Force `target_version = source_version + 1` in both metadata blocks
    pub fn bind_versions(&mut self, source_version: u32) {
        let target_version = source_version + 1;
        self.changeset_metadata.source_version = source_version;
        self.changeset_metadata.target_version = target_version;
        self.metadata.source_version = source_version;
        self.metadata.target_version = target_version;
    }

    pub fn source_version(&self) -> u32 {
        self.changeset_metadata.source_version
    }

    pub fn target_version(&self) -> u32 {
        self.changeset_metadata.target_version
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn operation(&self, operation_id: &str) -> Option<&Operation> {
        self.file_operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }
}
