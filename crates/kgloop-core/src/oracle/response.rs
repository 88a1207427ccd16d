//! Helpers for handling untrusted oracle text

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Why an oracle response could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// The text is not JSON at all
    JsonParseFailed,
    /// Valid JSON that does not match the expected document
    SchemaMismatch,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JsonParseFailed => write!(f, "json_parse_failed"),
            Self::SchemaMismatch => write!(f, "schema_mismatch"),
        }
    }
}

/// A response that failed to parse, with the reason
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub kind: ParseErrorKind,
    pub detail: String,
}

/// Parse an oracle response into `T`
///
/// Strips optional markdown fencing first. Never panics; every failure is
/// classified so callers can record it next to the raw text.
pub fn parse_oracle_json<T: DeserializeOwned>(response: &str) -> Result<T, ParseFailure> {
    let body = extract_json_from_response(response);

    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| ParseFailure {
        kind: ParseErrorKind::JsonParseFailed,
        detail: e.to_string(),
    })?;

    if !value.is_object() {
        return Err(ParseFailure {
            kind: ParseErrorKind::SchemaMismatch,
            detail: "expected a JSON object".to_string(),
        });
    }

    serde_json::from_value(value).map_err(|e| ParseFailure {
        kind: ParseErrorKind::SchemaMismatch,
        detail: e.to_string(),
    })
}

/// Extract the JSON body from a response that may be wrapped in markdown
///
/// Tries a ```json fence, then any ``` fence, then the outermost `{...}`.
/// Returns the input unchanged when nothing looks like JSON.
pub fn extract_json_from_response(response: &str) -> &str {
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = response.find("```") {
        let potential_start = start + 3;
        if let Some(newline) = response[potential_start..].find('\n') {
            let json_start = potential_start + newline + 1;
            if let Some(end) = response[json_start..].find("```") {
                return response[json_start..json_start + end].trim();
            }
        }
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            return &response[start..=end];
        }
    }

    response
}

/// Truncate to at most `max_chars` characters, marking the cut with "..."
pub fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((byte_idx, _)) => format!("{}...", &content[..byte_idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Doc {
        count: u32,
    }

    #[test]
    fn test_parse_oracle_json_classifies_failures() {
        let ok: Doc = parse_oracle_json("```json\n{\"count\": 3}\n```").unwrap();
        assert_eq!(ok.count, 3);

        let not_json = parse_oracle_json::<Doc>("I could not analyze this.").unwrap_err();
        assert_eq!(not_json.kind, ParseErrorKind::JsonParseFailed);

        let wrong_shape = parse_oracle_json::<Doc>("{\"count\": \"many\"}").unwrap_err();
        assert_eq!(wrong_shape.kind, ParseErrorKind::SchemaMismatch);
        assert!(wrong_shape.detail.contains("invalid type"));

        let array = parse_oracle_json::<Doc>("[1, 2]").unwrap_err();
        assert_eq!(array.kind, ParseErrorKind::SchemaMismatch);
    }

    #[test]
    fn test_parse_error_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ParseErrorKind::JsonParseFailed).unwrap(),
            "\"json_parse_failed\""
        );
        assert_eq!(ParseErrorKind::SchemaMismatch.to_string(), "schema_mismatch");
    }

    #[test]
    fn test_extract_from_json_fence() {
        let response = "Here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json_from_response(response), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_from_plain_fence() {
        let response = "```\n{\"a\": 2}\n```";
        assert_eq!(extract_json_from_response(response), "{\"a\": 2}");
    }

    #[test]
    fn test_extract_bare_object_with_prose() {
        let response = "Analysis follows {\"a\": {\"b\": 3}} end";
        assert_eq!(extract_json_from_response(response), "{\"a\": {\"b\": 3}}");
    }

    #[test]
    fn test_non_json_is_returned_unchanged() {
        assert_eq!(extract_json_from_response("no json here"), "no json here");
        assert_eq!(extract_json_from_response("} backwards {"), "} backwards {");
    }

    #[test]
    fn test_truncate_chars_is_boundary_safe() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        // Multi-byte characters must not be split
        assert_eq!(truncate_chars("ééééé", 2), "éé...");
        assert_eq!(truncate_chars("CO₂ levels", 3), "CO₂...");
    }
}
