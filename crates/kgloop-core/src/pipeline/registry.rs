//! Module registry: name to constructor

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};

use super::builtin::{
    ClaimClassifier, ConfidenceFilter, Deduplicator, ListSplitter, PronounBlocker, VagueEntityBlocker,
};
use super::module::TransformModule;

/// Constructor for a module instance
pub type ModuleConstructor = Arc<dyn Fn() -> Box<dyn TransformModule> + Send + Sync>;

/// Resolves module names from the pipeline configuration to implementations
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    constructors: BTreeMap<String, ModuleConstructor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in reference modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ListSplitter::NAME, || Box::new(ListSplitter));
        registry.register(PronounBlocker::NAME, || Box::new(PronounBlocker));
        registry.register(VagueEntityBlocker::NAME, || Box::new(VagueEntityBlocker));
        registry.register(ClaimClassifier::NAME, || Box::new(ClaimClassifier));
        registry.register(Deduplicator::NAME, || Box::new(Deduplicator));
        registry.register(ConfidenceFilter::NAME, || Box::new(ConfidenceFilter));
        registry
    }

    /// Register a constructor, replacing any previous one under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn TransformModule> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Instantiate a module, failing with [`Error::UnknownModule`]
    pub fn create(&self, name: &str) -> Result<Box<dyn TransformModule>> {
        self.constructors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| Error::UnknownModule(name.to_string()))
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ModuleRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "claim_classifier",
                "confidence_filter",
                "deduplicator",
                "list_splitter",
                "pronoun_blocker",
                "vague_entity_blocker"
            ]
        );
        assert_eq!(registry.create("deduplicator").unwrap().name(), "deduplicator");
    }

    #[test]
    fn test_unknown_module() {
        let registry = ModuleRegistry::new();
        let err = registry.create("semantic_deduplicator").err().unwrap();
        assert!(matches!(err, Error::UnknownModule(name) if name == "semantic_deduplicator"));
    }

    #[test]
    fn test_register_custom_module() {
        let mut registry = ModuleRegistry::new();
        registry.register("my_splitter", || Box::new(ListSplitter));
        assert!(registry.contains("my_splitter"));
        assert!(!registry.contains("list_splitter"));
    }
}
