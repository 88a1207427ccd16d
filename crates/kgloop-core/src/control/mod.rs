//! Improvement loop driving extraction, analysis, curation and application

mod improvement;
mod state;

pub use improvement::{ImprovementLoop, LoopInput, RunOptions};
pub use state::{IterationOutcome, LoopState};
