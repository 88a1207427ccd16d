//! Pipeline orchestrator
//!
//! Runs enabled modules in ascending priority, feeding each output into the
//! next module. A failing module (error or panic) is recorded and skipped:
//! the chain continues with the batch as it was before that module.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::config::PipelineConfig;
use super::module::{ModuleSettings, TransformModule};
use super::registry::ModuleRegistry;
use super::relationship::Relationship;

/// A module that raised during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub module: String,
    pub priority: i32,
    pub message: String,
}

/// Output of one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub batch: Vec<Relationship>,
    pub failures: Vec<ModuleFailure>,
    /// Modules that completed, in execution order
    pub executed: Vec<String>,
}

impl PipelineRun {
    pub fn retained(&self) -> impl Iterator<Item = &Relationship> {
        self.batch.iter().filter(|r| r.is_retained())
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Stage {
    name: String,
    priority: i32,
    settings: ModuleSettings,
    module: Box<dyn TransformModule>,
}

/// Composes configured modules into one deterministic batch transform
pub struct PipelineOrchestrator {
    version: u32,
    stages: Vec<Stage>,
}

impl PipelineOrchestrator {
    /// Resolve a configuration against a registry
    ///
    /// Fails with [`Error::UnknownModule`] before any module runs.
    pub fn from_config(config: &PipelineConfig, registry: &ModuleRegistry) -> Result<Self> {
        let stages = config
            .ordered()
            .into_iter()
            .map(|descriptor| {
                Ok(Stage {
                    name: descriptor.name.clone(),
                    priority: descriptor.priority,
                    settings: descriptor.config.clone(),
                    module: registry.create(&descriptor.name)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            version = config.version,
            modules = stages.len(),
            "Pipeline configured"
        );

        Ok(Self {
            version: config.version,
            stages,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Module names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run the batch through every stage
    pub fn process(&self, batch: Vec<Relationship>) -> PipelineRun {
        let input_len = batch.len();
        let mut current = batch;
        let mut failures = Vec::new();
        let mut executed = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let input = current.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                stage.module.transform(input, &stage.settings)
            }));

            let message = match outcome {
                Ok(Ok(output)) => {
                    debug!(
                        module = %stage.name,
                        before = current.len(),
                        after = output.len(),
                        "Module completed"
                    );
                    current = output;
                    executed.push(stage.name.clone());
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };

            warn!(
                module = %stage.name,
                priority = stage.priority,
                error = %message,
                "Module failed, continuing with previous batch"
            );
            failures.push(ModuleFailure {
                module: stage.name.clone(),
                priority: stage.priority,
                message,
            });
        }

        info!(
            version = self.version,
            input = input_len,
            output = current.len(),
            failures = failures.len(),
            "Pipeline run complete"
        );

        PipelineRun {
            batch: current,
            failures,
            executed,
        }
    }

    /// Process independent batches on blocking workers
    ///
    /// Workers share the orchestrator read-only. Output order matches input
    /// order.
    pub async fn process_many(self: Arc<Self>, batches: Vec<Vec<Relationship>>) -> Result<Vec<PipelineRun>> {
        let handles: Vec<_> = batches
            .into_iter()
            .map(|batch| {
                let orchestrator = Arc::clone(&self);
                tokio::task::spawn_blocking(move || orchestrator.process(batch))
            })
            .collect();

        let mut runs = Vec::with_capacity(handles.len());
        for handle in handles {
            let run = handle
                .await
                .map_err(|e| Error::Other(format!("Pipeline worker failed: {}", e)))?;
            runs.push(run);
        }
        Ok(runs)
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("version", &self.version)
            .field("stages", &self.stage_names())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::ModuleDescriptor;
    use crate::pipeline::relationship::BlockReason;

    struct Failing;

    impl TransformModule for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn transform(&self, _batch: Vec<Relationship>, _settings: &ModuleSettings) -> Result<Vec<Relationship>> {
            Err(Error::ModuleFailed {
                module: "failing".into(),
                message: "regex compile error".into(),
            })
        }
    }

    struct Panicking;

    impl TransformModule for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn transform(&self, _batch: Vec<Relationship>, _settings: &ModuleSettings) -> Result<Vec<Relationship>> {
            panic!("index out of bounds")
        }
    }

    /// Drops everything; used to prove a failure restores the previous batch
    struct Truncating;

    impl TransformModule for Truncating {
        fn name(&self) -> &str {
            "truncating"
        }

        fn transform(&self, mut batch: Vec<Relationship>, _settings: &ModuleSettings) -> Result<Vec<Relationship>> {
            batch.truncate(1);
            Ok(batch)
        }
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::with_builtins();
        registry.register("failing", || Box::new(Failing));
        registry.register("panicking", || Box::new(Panicking));
        registry.register("truncating", || Box::new(Truncating));
        registry
    }

    fn sample_batch() -> Vec<Relationship> {
        vec![
            Relationship::new("Bill Mollison", "authored", "Permaculture Manual").with_page(1),
            Relationship::new("biochar", "used for", "gardens, yards").with_page(1),
            Relationship::new("we", "cultivate", "victory gardens").with_page(2),
            Relationship::new("Bill Mollison", "authored", "Permaculture Manual").with_page(1),
            Relationship::new("soil", "is", "alive").with_confidence(0.2),
        ]
    }

    #[test]
    fn test_runs_in_priority_order() {
        let config = PipelineConfig {
            version: 1,
            modules: vec![
                ModuleDescriptor::new("deduplicator", 110),
                ModuleDescriptor::new("list_splitter", 40),
            ],
        };
        let orchestrator = PipelineOrchestrator::from_config(&config, &registry()).unwrap();
        assert_eq!(orchestrator.stage_names(), vec!["list_splitter", "deduplicator"]);
    }

    #[test]
    fn test_builtin_pipeline_annotates_batch() {
        let orchestrator = PipelineOrchestrator::from_config(&PipelineConfig::builtin(), &registry()).unwrap();
        let run = orchestrator.process(sample_batch());

        assert!(run.is_clean());
        assert_eq!(run.executed.len(), 5);
        // list split adds one relationship
        assert_eq!(run.batch.len(), 6);
        assert_eq!(run.batch[4].flags.duplicate_of, Some(0));
        assert_eq!(run.batch[3].flags.blocked, Some(BlockReason::Pronoun));
        assert_eq!(run.batch[5].flags.blocked, Some(BlockReason::LowConfidence));
        assert_eq!(run.retained().count(), 3);
    }

    #[test]
    fn test_deterministic_output() {
        let orchestrator = PipelineOrchestrator::from_config(&PipelineConfig::builtin(), &registry()).unwrap();
        let first = serde_json::to_vec(&orchestrator.process(sample_batch()).batch).unwrap();
        let second = serde_json::to_vec(&orchestrator.process(sample_batch()).batch).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_failure_continues_with_last_good_batch() {
        let config = PipelineConfig {
            version: 1,
            modules: vec![
                ModuleDescriptor::new("list_splitter", 10),
                ModuleDescriptor::new("failing", 20),
                ModuleDescriptor::new("panicking", 30),
                ModuleDescriptor::new("deduplicator", 40),
            ],
        };
        let orchestrator = PipelineOrchestrator::from_config(&config, &registry()).unwrap();
        let run = orchestrator.process(sample_batch());

        assert_eq!(run.failures.len(), 2);
        assert_eq!(run.failures[0].module, "failing");
        assert!(run.failures[0].message.contains("regex compile error"));
        assert_eq!(run.failures[1].module, "panicking");
        assert!(run.failures[1].message.contains("index out of bounds"));
        assert_eq!(run.executed, vec!["list_splitter", "deduplicator"]);
        assert_eq!(run.batch.len(), 6);
    }

    #[test]
    fn test_failed_module_output_is_discarded() {
        let config = PipelineConfig {
            version: 1,
            modules: vec![
                ModuleDescriptor::new("truncating", 10),
                ModuleDescriptor::new("failing", 20),
            ],
        };
        let orchestrator = PipelineOrchestrator::from_config(&config, &registry()).unwrap();
        let run = orchestrator.process(sample_batch());
        assert_eq!(run.batch.len(), 1);
    }

    #[test]
    fn test_unknown_module_rejected_at_construction() {
        let config = PipelineConfig {
            version: 1,
            modules: vec![ModuleDescriptor::new("semantic_deduplicator", 115)],
        };
        let err = PipelineOrchestrator::from_config(&config, &registry()).unwrap_err();
        assert!(matches!(err, Error::UnknownModule(_)));
    }

    #[tokio::test]
    async fn test_process_many_preserves_order() {
        let orchestrator =
            Arc::new(PipelineOrchestrator::from_config(&PipelineConfig::builtin(), &registry()).unwrap());

        let batches = vec![
            vec![Relationship::new("a", "is", "first")],
            vec![Relationship::new("b", "is", "second")],
            vec![Relationship::new("c", "is", "third")],
        ];
        let runs = orchestrator.process_many(batches).await.unwrap();

        let sources: Vec<_> = runs.iter().map(|r| r.batch[0].source.as_str()).collect();
        assert_eq!(sources, vec!["a", "b", "c"]);
    }
}
