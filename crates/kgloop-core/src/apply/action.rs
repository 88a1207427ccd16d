//! Resolution of loosely typed operation details into a closed action

use serde_json::Value;

use crate::curation::{Operation, OperationType};

use super::error::ApplyError;

/// What an operation does to the filesystem
#[derive(Debug, Clone, PartialEq)]
pub enum FileAction {
    /// Verbatim first-occurrence replace, written back in place
    ReplaceText { old: String, new: String },
    /// Verbatim replace written to a new prompt version; the source is untouched
    ReplacePrompt { old: String, new: String, version: String },
    SetConfigValue { json_path: String, value: Value },
    CreateFile { content: String },
}

impl FileAction {
    pub fn from_operation(op: &Operation) -> Result<Self, ApplyError> {
        match &op.operation_type {
            OperationType::CodeFix => {
                let (old, new) = replacement(op)?;
                Ok(Self::ReplaceText { old, new })
            }
            OperationType::PromptEnhancement => {
                let (old, new) = replacement(op)?;
                let version = op
                    .edit_details
                    .as_ref()
                    .and_then(|d| d.prompt_version.as_deref())
                    .map(str::trim)
                    .filter(|v| !v.is_empty());
                Ok(match version {
                    Some(version) => Self::ReplacePrompt {
                        old,
                        new,
                        version: version.to_string(),
                    },
                    None => Self::ReplaceText { old, new },
                })
            }
            OperationType::ConfigUpdate => {
                let details = op
                    .edit_details
                    .as_ref()
                    .ok_or_else(|| ApplyError::MissingDetails("edit_details".into()))?;
                let json_path = details
                    .json_path
                    .clone()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| ApplyError::MissingDetails("edit_details.json_path".into()))?;
                let value = details
                    .new_value
                    .clone()
                    .ok_or_else(|| ApplyError::MissingDetails("edit_details.new_value".into()))?;
                Ok(Self::SetConfigValue { json_path, value })
            }
            OperationType::NewModule => {
                let content = op
                    .create_details
                    .as_ref()
                    .and_then(|d| d.content.clone())
                    .ok_or_else(|| ApplyError::MissingDetails("create_details.content".into()))?;
                Ok(Self::CreateFile { content })
            }
            OperationType::Other(kind) => Err(ApplyError::UnknownOperationType(kind.clone())),
        }
    }
}

fn replacement(op: &Operation) -> Result<(String, String), ApplyError> {
    let details = op
        .edit_details
        .as_ref()
        .ok_or_else(|| ApplyError::MissingDetails("edit_details".into()))?;
    let old = details
        .old_content
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApplyError::MissingDetails("edit_details.old_content".into()))?;
    let new = details
        .new_content
        .clone()
        .ok_or_else(|| ApplyError::MissingDetails("edit_details.new_content".into()))?;
    Ok((old, new))
}
