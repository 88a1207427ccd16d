//! Relationship data unit and its annotation flags

use serde::{Deserialize, Serialize};

/// An extracted (source, predicate, target) triple
///
/// Modules annotate through [`RelationshipFlags`] instead of deleting, so
/// later modules and the reflector can see upstream decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    #[serde(alias = "relationship")]
    pub predicate: String,
    pub target: String,
    /// Missing in the input means fully confident
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub evidence_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "RelationshipFlags::is_empty")]
    pub flags: RelationshipFlags,
}

fn default_confidence() -> f64 {
    1.0
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        predicate: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            predicate: predicate.into(),
            target: target.into(),
            confidence: 1.0,
            evidence_text: String::new(),
            page: None,
            flags: RelationshipFlags::default(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence_text = evidence.into();
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Not blocked and not a duplicate of an earlier relationship
    pub fn is_retained(&self) -> bool {
        self.flags.blocked.is_none() && self.flags.duplicate_of.is_none()
    }
}

/// Why a relationship was blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Unresolved pronoun as source or target
    Pronoun,
    VagueEntity,
    LowConfidence,
}

/// Claim classification assigned by the classifier module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    Factual,
    Normative,
    Opinion,
}

/// Closed set of inter-module signals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockReason>,

    /// Original entity text replaced by a resolver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_from: Option<String>,

    /// Original list-valued target this relationship was split from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_from: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClaimKind>,

    /// Batch index of the retained relationship this one duplicates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<usize>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
}

impl RelationshipFlags {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_accepts_relationship_alias() {
        let json = r#"{"source": "Bill Mollison", "relationship": "authored", "target": "Permaculture", "confidence": 0.9, "page": 12}"#;
        let rel: Relationship = serde_json::from_str(json).unwrap();

        assert_eq!(rel.predicate, "authored");
        assert_eq!(rel.page, Some(12));
        assert!(rel.flags.is_empty());
        assert!(rel.is_retained());
    }

    #[test]
    fn test_missing_confidence_survives_default_pipeline() {
        use crate::pipeline::{ModuleRegistry, PipelineConfig, PipelineOrchestrator};

        let batch: Vec<Relationship> =
            serde_json::from_str(r#"[{"source": "soil", "relationship": "contains", "target": "carbon"}]"#).unwrap();
        assert_eq!(batch[0].confidence, 1.0);

        let orchestrator =
            PipelineOrchestrator::from_config(&PipelineConfig::builtin(), &ModuleRegistry::with_builtins()).unwrap();
        let run = orchestrator.process(batch);

        assert!(!run.batch[0].flags.low_confidence);
        assert_eq!(run.retained().count(), 1);
    }

    #[test]
    fn test_empty_flags_are_not_serialized() {
        let rel = Relationship::new("a", "b", "c");
        let json = serde_json::to_value(&rel).unwrap();
        assert!(json.get("flags").is_none());
        assert!(json.get("page").is_none());
    }

    #[test]
    fn test_flags_roundtrip_and_retention() {
        let mut rel = Relationship::new("he", "founded", "Green Earth");
        rel.flags.blocked = Some(BlockReason::Pronoun);
        rel.flags.low_confidence = true;

        let json = serde_json::to_string(&rel).unwrap();
        assert!(json.contains("\"blocked\":\"pronoun\""));

        let back: Relationship = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rel);
        assert!(!back.is_retained());
    }

    #[test]
    fn test_duplicate_is_not_retained() {
        let mut rel = Relationship::new("a", "b", "c");
        rel.flags.duplicate_of = Some(0);
        assert!(!rel.is_retained());
    }
}
