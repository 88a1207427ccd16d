//! Transformation module contract

use serde_json::{Map, Value};

use crate::error::Result;

use super::relationship::Relationship;

/// Per-module settings from the pipeline configuration
pub type ModuleSettings = Map<String, Value>;

/// A stateless batch transform over relationships
///
/// Implementations must be deterministic: the same batch and settings always
/// produce the same output. No state may survive between calls.
pub trait TransformModule: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, batch: Vec<Relationship>, settings: &ModuleSettings) -> Result<Vec<Relationship>>;
}

/// Read a float setting, falling back to `default` when absent or mistyped
pub fn setting_f64(settings: &ModuleSettings, key: &str, default: f64) -> f64 {
    settings.get(key).and_then(Value::as_f64).unwrap_or(default)
}

pub fn setting_bool(settings: &ModuleSettings, key: &str, default: bool) -> bool {
    settings.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Read a list of strings, lowercased; `None` when absent
pub fn setting_words(settings: &ModuleSettings, key: &str) -> Option<Vec<String>> {
    settings.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .collect()
    })
}
