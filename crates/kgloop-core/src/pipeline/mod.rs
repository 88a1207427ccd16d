//! Relationship post-processing pipeline
//!
//! - [`Relationship`] with closed [`RelationshipFlags`] for inter-module signals
//! - [`TransformModule`] contract and [`ModuleRegistry`] (name to constructor)
//! - [`PipelineConfig`], the declarative ordered module list stored in the playbook
//! - [`PipelineOrchestrator`], which runs the chain with per-module failure isolation

pub mod builtin;
mod config;
mod module;
mod orchestrator;
mod registry;
mod relationship;

pub use config::{ModuleDescriptor, PIPELINE_CONFIG_PATH, PipelineConfig};
pub use module::{ModuleSettings, TransformModule, setting_bool, setting_f64, setting_words};
pub use orchestrator::{ModuleFailure, PipelineOrchestrator, PipelineRun};
pub use registry::{ModuleConstructor, ModuleRegistry};
pub use relationship::{BlockReason, ClaimKind, Relationship, RelationshipFlags};
