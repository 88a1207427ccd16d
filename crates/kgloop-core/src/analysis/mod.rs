//! Quality analysis: the report document and the reflector that produces it

mod reflector;
mod report;

pub use reflector::{ExtractionMetadata, MISSING_PROMPT, REFLECTOR_VERSION, Reflector};
pub use report::{
    AnalysisReport, IssueCategory, NovelPattern, PromptAnalysis, QualitySummary, Recommendation,
    ReportMetadata, Severity, SystemHealth,
};
