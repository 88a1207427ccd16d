//! Declarative pipeline configuration
//!
//! Persisted as `config/pipeline.json` in the playbook:
//!
//! ```json
//! {
//!   "version": 1,
//!   "modules": [
//!     {"name": "list_splitter", "priority": 40},
//!     {"name": "confidence_filter", "priority": 120, "config": {"threshold": 0.5}}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::builtin::{ClaimClassifier, ConfidenceFilter, Deduplicator, ListSplitter, PronounBlocker};
use super::module::ModuleSettings;
use super::registry::ModuleRegistry;

/// Playbook-relative location of the active pipeline configuration
pub const PIPELINE_CONFIG_PATH: &str = "config/pipeline.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    /// Execution order key; ties keep declaration order
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "ModuleSettings::is_empty")]
    pub config: ModuleSettings,
}

fn default_enabled() -> bool {
    true
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            config: ModuleSettings::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub version: u32,
    pub modules: Vec<ModuleDescriptor>,
}

impl PipelineConfig {
    /// Default configuration over the built-in modules
    pub fn builtin() -> Self {
        Self {
            version: 1,
            modules: vec![
                ModuleDescriptor::new(ListSplitter::NAME, 40),
                ModuleDescriptor::new(PronounBlocker::NAME, 60),
                ModuleDescriptor::new(ClaimClassifier::NAME, 105),
                ModuleDescriptor::new(Deduplicator::NAME, 110),
                ModuleDescriptor::new(ConfidenceFilter::NAME, 120)
                    .with_setting("threshold", serde_json::json!(0.5)),
            ],
        }
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| Error::InvalidPipeline(format!("{}: {}", PIPELINE_CONFIG_PATH, e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Enabled descriptors in execution order
    pub fn ordered(&self) -> Vec<&ModuleDescriptor> {
        let mut enabled: Vec<&ModuleDescriptor> = self.modules.iter().filter(|m| m.enabled).collect();
        // sort_by_key is stable, so equal priorities keep declaration order
        enabled.sort_by_key(|m| m.priority);
        enabled
    }

    /// Check every enabled module name against the registry
    pub fn validate(&self, registry: &ModuleRegistry) -> Result<()> {
        for descriptor in self.ordered() {
            if !registry.contains(&descriptor.name) {
                return Err(Error::UnknownModule(descriptor.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_is_stable_on_ties_and_skips_disabled() {
        let mut disabled = ModuleDescriptor::new("skipped", 1);
        disabled.enabled = false;

        let config = PipelineConfig {
            version: 3,
            modules: vec![
                ModuleDescriptor::new("b", 50),
                ModuleDescriptor::new("a", 10),
                ModuleDescriptor::new("c", 50),
                disabled,
            ],
        };

        let names: Vec<_> = config.ordered().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_defaults_enabled_and_config() {
        let config = PipelineConfig::from_json(
            r#"{"version": 2, "modules": [{"name": "deduplicator", "priority": 110}]}"#,
        )
        .unwrap();

        assert!(config.modules[0].enabled);
        assert!(config.modules[0].config.is_empty());
    }

    #[test]
    fn test_invalid_json_is_invalid_pipeline() {
        let err = PipelineConfig::from_json("{\"modules\": 3}").unwrap_err();
        assert_eq!(err.code(), "E202");
    }

    #[test]
    fn test_builtin_validates_against_builtin_registry() {
        let registry = ModuleRegistry::with_builtins();
        PipelineConfig::builtin().validate(&registry).unwrap();

        let mut config = PipelineConfig::builtin();
        config.modules.push(ModuleDescriptor::new("semantic_deduplicator", 115));
        assert!(matches!(config.validate(&registry), Err(Error::UnknownModule(_))));
    }
}
