//! The analyze, curate, apply feedback loop

use std::sync::Arc;

use tracing::{info, warn};

use crate::analysis::{ExtractionMetadata, Reflector};
use crate::apply::{ApplyOptions, ChangeApplier};
use crate::config::Config;
use crate::curation::Curator;
use crate::error::Result;
use crate::oracle::QualityOracle;
use crate::pipeline::{ModuleRegistry, PipelineOrchestrator, Relationship};
use crate::playbook::PlaybookStore;

use super::state::{IterationOutcome, LoopState};

/// Extraction output fed to every iteration
#[derive(Debug, Clone, Default)]
pub struct LoopInput {
    pub batch: Vec<Relationship>,
    pub source_text: String,
    pub book_title: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOptions {
    pub apply: ApplyOptions,
    /// Stop once the report's issue rate is at or below this fraction
    pub target_issue_rate: f64,
    pub max_iterations: u32,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            apply: ApplyOptions {
                dry_run: false,
                auto_apply_low_risk: config.apply.auto_apply_low_risk,
            },
            target_issue_rate: config.quality.target_issue_rate,
            max_iterations: config.quality.max_iterations,
        }
    }
}

pub struct ImprovementLoop {
    store: PlaybookStore,
    registry: Arc<ModuleRegistry>,
    reflector: Reflector,
    curator: Curator,
    applier: ChangeApplier,
}

impl ImprovementLoop {
    pub fn new(oracle: Arc<dyn QualityOracle>, store: PlaybookStore, config: &Config) -> Self {
        Self {
            registry: Arc::new(ModuleRegistry::with_builtins()),
            reflector: Reflector::new(oracle.clone(), store.clone(), config.reflector.clone()),
            curator: Curator::new(oracle, store.clone()),
            applier: ChangeApplier::new(store.clone()),
            store,
        }
    }

    /// Use a registry with modules beyond the built-ins
    pub fn with_registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// One pass at the current playbook version
    ///
    /// Stops after analysis when the report already meets
    /// `options.target_issue_rate`. The version advances only when at least
    /// one operation was applied outside a dry run.
    pub async fn run_iteration(&self, input: &LoopInput, options: &RunOptions) -> Result<IterationOutcome> {
        let versions = self.store.versions();
        let version = versions.current()?;

        let pipeline = self.store.load_pipeline_config()?;
        let orchestrator = PipelineOrchestrator::from_config(&pipeline, &self.registry)?;
        let run = orchestrator.process(input.batch.clone());
        info!(
            version,
            state = %LoopState::Extracted,
            relationships = run.batch.len(),
            failures = run.failures.len(),
            "Pipeline run complete"
        );

        let metadata = ExtractionMetadata::new(format!("v{}", version)).with_book_title(input.book_title.clone());
        let (report, _) = self
            .reflector
            .analyze_with_history(&run.batch, &input.source_text, &metadata)
            .await?;

        let mut outcome = IterationOutcome {
            version,
            state: LoopState::Analyzed,
            report,
            changeset: None,
            application: None,
            pipeline_failures: run.failures,
            advanced_to: None,
        };

        if outcome.meets_target(options.target_issue_rate) {
            info!(version, issue_rate = ?outcome.report.issue_rate(), "Quality target met");
            return Ok(outcome);
        }

        let (changeset, _) = self.curator.curate_and_save(&outcome.report, version, None).await?;
        outcome.state = LoopState::Curated;

        if changeset.is_error() {
            warn!(version, "Changeset unusable, nothing to apply");
            outcome.state = LoopState::PendingApproval;
            outcome.changeset = Some(changeset);
            return Ok(outcome);
        }

        let application = self.applier.apply(&changeset, options.apply).await?;

        if application.has_applied() && !options.apply.dry_run {
            let next = versions.advance(version).await?;
            outcome.state = LoopState::Applied;
            outcome.advanced_to = Some(next);
        } else {
            outcome.state = LoopState::PendingApproval;
            info!(
                version,
                awaiting = application.requires_approval.len(),
                failed = application.failed.len(),
                "Nothing applied, awaiting operator"
            );
        }

        outcome.changeset = Some(changeset);
        outcome.application = Some(application);
        Ok(outcome)
    }

    /// Iterate until the target is met, nothing was applied, or iterations run out
    pub async fn run(&self, input: &LoopInput, options: &RunOptions) -> Result<Vec<IterationOutcome>> {
        let mut outcomes = Vec::new();

        for iteration in 1..=options.max_iterations {
            info!(iteration, max_iterations = options.max_iterations, "Starting loop iteration");
            let outcome = self.run_iteration(input, options).await?;
            let state = outcome.state;
            outcomes.push(outcome);

            if state != LoopState::Applied {
                info!(iteration, state = %state, "Loop stopped");
                break;
            }
        }

        Ok(outcomes)
    }
}
