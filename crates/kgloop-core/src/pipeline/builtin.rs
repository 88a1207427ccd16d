//! Built-in reference modules
//!
//! Small, deterministic transforms so a fresh playbook has a runnable
//! pipeline. Their heuristics are deliberately simple.

use std::collections::HashMap;

use crate::error::Result;

use super::module::{ModuleSettings, TransformModule, setting_bool, setting_f64, setting_words};
use super::relationship::{BlockReason, ClaimKind, Relationship};

const PRONOUNS: &[&str] = &[
    "he", "she", "it", "we", "they", "i", "you", "him", "her", "us", "them", "this", "that",
    "these", "those",
];

/// Pronouns that may be resolved to the last concrete subject on the page
const RESOLVABLE: &[&str] = &["he", "she", "they", "we"];

/// Split list-valued targets ("a, b, and c") into one relationship per item
#[derive(Debug, Default)]
pub struct ListSplitter;

impl ListSplitter {
    pub const NAME: &'static str = "list_splitter";

    fn split_items(target: &str, split_on_and: bool) -> Vec<String> {
        let mut normalized = target.replace(", and ", ", ").replace(", or ", ", ");
        if split_on_and {
            normalized = normalized.replace(" and ", ", ");
        }
        normalized
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl TransformModule for ListSplitter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&self, batch: Vec<Relationship>, settings: &ModuleSettings) -> Result<Vec<Relationship>> {
        let split_on_and = setting_bool(settings, "split_on_and", true);
        let mut out = Vec::with_capacity(batch.len());

        for rel in batch {
            let items = if rel.is_retained() {
                Self::split_items(&rel.target, split_on_and)
            } else {
                Vec::new()
            };

            if items.len() < 2 {
                out.push(rel);
                continue;
            }

            for item in items {
                let mut part = rel.clone();
                part.flags.split_from = Some(rel.target.clone());
                part.target = item;
                out.push(part);
            }
        }

        Ok(out)
    }
}

/// Resolve or block pronoun entities
///
/// A personal pronoun in source position is replaced by the most recent
/// concrete source on the same page when `resolve` is on; anything still a
/// pronoun is blocked.
#[derive(Debug, Default)]
pub struct PronounBlocker;

impl PronounBlocker {
    pub const NAME: &'static str = "pronoun_blocker";

    fn is_pronoun(text: &str, pronouns: &[String]) -> bool {
        let lowered = text.trim().to_lowercase();
        pronouns.iter().any(|p| *p == lowered)
    }
}

impl TransformModule for PronounBlocker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&self, mut batch: Vec<Relationship>, settings: &ModuleSettings) -> Result<Vec<Relationship>> {
        let pronouns = setting_words(settings, "pronouns")
            .unwrap_or_else(|| PRONOUNS.iter().map(|p| p.to_string()).collect());
        let resolve = setting_bool(settings, "resolve", true);

        let mut last_subject: HashMap<Option<u32>, String> = HashMap::new();

        for rel in batch.iter_mut() {
            if !rel.is_retained() {
                continue;
            }

            let source_lower = rel.source.trim().to_lowercase();
            if Self::is_pronoun(&rel.source, &pronouns) {
                let antecedent = last_subject.get(&rel.page).filter(|_| {
                    resolve && RESOLVABLE.contains(&source_lower.as_str())
                });
                match antecedent {
                    Some(subject) => {
                        rel.flags.resolved_from = Some(rel.source.clone());
                        rel.source = subject.clone();
                    }
                    None => rel.flags.blocked = Some(BlockReason::Pronoun),
                }
            } else {
                last_subject.insert(rel.page, rel.source.clone());
            }

            if Self::is_pronoun(&rel.target, &pronouns) {
                rel.flags.blocked = Some(BlockReason::Pronoun);
            }
        }

        Ok(batch)
    }
}

/// Block relationships whose source or target is too vague to be useful
///
/// An entity is vague when, after dropping a leading determiner, it is one of
/// the configured `terms` ("the process", "this handbook"). Not part of the
/// default pipeline; enable it by name in the pipeline configuration.
#[derive(Debug, Default)]
pub struct VagueEntityBlocker;

impl VagueEntityBlocker {
    pub const NAME: &'static str = "vague_entity_blocker";

    const TERMS: &'static [&'static str] = &[
        "amount", "process", "way", "answer", "solution", "problem", "thing", "things", "something",
        "stuff", "handbook", "book", "chapter", "idea", "result",
    ];
    const DETERMINERS: &'static [&'static str] = &["the", "this", "that", "these", "those", "a", "an", "some"];

    fn is_vague(text: &str, terms: &[String]) -> bool {
        let lowered = text.trim().to_lowercase();
        let head = lowered
            .split_once(' ')
            .filter(|(first, _)| Self::DETERMINERS.contains(first))
            .map(|(_, rest)| rest.trim())
            .unwrap_or(&lowered);
        terms.iter().any(|t| t == head)
    }
}

impl TransformModule for VagueEntityBlocker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&self, mut batch: Vec<Relationship>, settings: &ModuleSettings) -> Result<Vec<Relationship>> {
        let terms = setting_words(settings, "terms")
            .unwrap_or_else(|| Self::TERMS.iter().map(|t| t.to_string()).collect());

        for rel in batch.iter_mut() {
            if !rel.is_retained() {
                continue;
            }
            if Self::is_vague(&rel.source, &terms) || Self::is_vague(&rel.target, &terms) {
                rel.flags.blocked = Some(BlockReason::VagueEntity);
            }
        }

        Ok(batch)
    }
}

/// Tag each relationship as factual, normative or opinion
#[derive(Debug, Default)]
pub struct ClaimClassifier;

impl ClaimClassifier {
    pub const NAME: &'static str = "claim_classifier";

    const NORMATIVE: &'static [&'static str] = &["should", "must", "ought", "need to"];
    const OPINION: &'static [&'static str] = &["believes", "thinks", "feels", "argues", "claims"];

    fn classify(rel: &Relationship) -> ClaimKind {
        let predicate = rel.predicate.to_lowercase();
        if Self::NORMATIVE.iter().any(|w| predicate.contains(w)) {
            ClaimKind::Normative
        } else if Self::OPINION.iter().any(|w| predicate.contains(w)) {
            ClaimKind::Opinion
        } else {
            ClaimKind::Factual
        }
    }
}

impl TransformModule for ClaimClassifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&self, mut batch: Vec<Relationship>, _settings: &ModuleSettings) -> Result<Vec<Relationship>> {
        for rel in batch.iter_mut() {
            rel.flags.classification = Some(Self::classify(rel));
        }
        Ok(batch)
    }
}

/// Mark exact duplicates (case-insensitive) of an earlier retained relationship
#[derive(Debug, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub const NAME: &'static str = "deduplicator";
}

impl TransformModule for Deduplicator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&self, mut batch: Vec<Relationship>, _settings: &ModuleSettings) -> Result<Vec<Relationship>> {
        let mut first_seen: HashMap<(String, String, String), usize> = HashMap::new();

        for (idx, rel) in batch.iter_mut().enumerate() {
            if !rel.is_retained() {
                continue;
            }
            let key = (
                rel.source.trim().to_lowercase(),
                rel.predicate.trim().to_lowercase(),
                rel.target.trim().to_lowercase(),
            );
            match first_seen.get(&key) {
                Some(&original) => rel.flags.duplicate_of = Some(original),
                None => {
                    first_seen.insert(key, idx);
                }
            }
        }

        Ok(batch)
    }
}

/// Block relationships whose confidence is below `threshold`
#[derive(Debug, Default)]
pub struct ConfidenceFilter;

impl ConfidenceFilter {
    pub const NAME: &'static str = "confidence_filter";
    const DEFAULT_THRESHOLD: f64 = 0.5;
}

impl TransformModule for ConfidenceFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&self, mut batch: Vec<Relationship>, settings: &ModuleSettings) -> Result<Vec<Relationship>> {
        let threshold = setting_f64(settings, "threshold", Self::DEFAULT_THRESHOLD);

        for rel in batch.iter_mut() {
            if rel.confidence < threshold {
                rel.flags.low_confidence = true;
                if rel.flags.blocked.is_none() {
                    rel.flags.blocked = Some(BlockReason::LowConfidence);
                }
            }
        }

        Ok(batch)
    }
}
