//! kgloop Core Library
//!
//! This crate provides the core functionality for kgloop, including:
//! - Relationship pipeline (module registry, declarative ordering, failure isolation)
//! - Playbook store (versioned artifacts, write-once history, version manager)
//! - Quality oracle capability (LLM-backed and scripted)
//! - Reflector (analysis reports, malformed oracle output kept verbatim)
//! - Curator (traceable changesets)
//! - Change applier (risk gating, verbatim patches, path locks)
//! - Improvement loop

pub mod analysis;
pub mod apply;
pub mod config;
pub mod control;
pub mod curation;
pub mod error;
pub mod llm;
pub mod locking;
pub mod oracle;
pub mod pipeline;
pub mod playbook;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::analysis::{AnalysisReport, ExtractionMetadata, Reflector, Severity};
    pub use crate::apply::{ApplicationResult, ApplyOptions, ChangeApplier};
    pub use crate::config::Config;
    pub use crate::control::{ImprovementLoop, IterationOutcome, LoopInput, LoopState, RunOptions};
    pub use crate::curation::{Changeset, Curator, Operation, OperationType, Priority, RiskLevel};
    pub use crate::error::{Error, Result};
    pub use crate::oracle::{LlmOracle, QualityOracle, ScriptedOracle};
    pub use crate::pipeline::{ModuleRegistry, PipelineConfig, PipelineOrchestrator, Relationship};
    pub use crate::playbook::{PlaybookSnapshot, PlaybookStore, VersionManager};
}
