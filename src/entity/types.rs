//! Canonical entity types and the raw candidates they are built from

use super::ids::{ArticleId, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The three kinds of security fact the pipeline canonicalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Observable technical artifact: IP, domain, hash, URL, email, mutex...
    Indicator,
    /// Cataloged attacker behavior (ATT&CK technique id or named technique)
    Technique,
    /// Named adversary group
    ThreatActor,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Indicator => "indicator",
            Self::Technique => "technique",
            Self::ThreatActor => "threat_actor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "indicator" => Some(Self::Indicator),
            "technique" => Some(Self::Technique),
            "threat_actor" => Some(Self::ThreatActor),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which article text an extraction ran over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Original,
    ExecutiveSummary,
    TechnicalSummary,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::ExecutiveSummary => "executive_summary",
            Self::TechnicalSummary => "technical_summary",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "original" => Some(Self::Original),
            "executive_summary" => Some(Self::ExecutiveSummary),
            "technical_summary" => Some(Self::TechnicalSummary),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw entity candidate as returned by the extraction adapter.
///
/// Values are noisy: mixed case, defanged indicators, actor aliases.
/// The canonicalizer is the only consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntity {
    pub kind: EntityKind,
    pub value: String,
    /// Extraction confidence, 0-100
    pub confidence: u8,
    /// Free-text context snippet supporting the extraction
    #[serde(default)]
    pub evidence: Option<String>,
    /// Which text the candidate came from
    pub source: ExtractionSource,
}

impl RawEntity {
    pub fn new(kind: EntityKind, value: impl Into<String>, confidence: u8) -> Self {
        Self {
            kind,
            value: value.into(),
            confidence,
            evidence: None,
            source: ExtractionSource::Original,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn with_source(mut self, source: ExtractionSource) -> Self {
        self.source = source;
        self
    }
}

/// A deduplicated, persistent security fact.
///
/// For `Indicator` and `Technique` the normalized value is unique per kind.
/// For `ThreatActor` the canonical name is unique and many aliases may map
/// to one actor. Rows are never physically deleted; analysts flag false
/// positives instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Normalized indicator/technique value, or actor canonical name
    pub value: String,
    /// Known aliases (threat actors only; empty for other kinds)
    pub aliases: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Monotonically non-decreasing across all canonicalization calls
    pub occurrence_count: u64,
    /// Maximum extraction confidence observed, 0-100
    pub confidence: u8,
    /// Analyst-set flag; flagged entities stop generating candidates
    pub false_positive: bool,
}

impl CanonicalEntity {
    /// Case-insensitive check against the canonical name and all aliases.
    pub fn known_as(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.value.to_lowercase() == lower
            || self.aliases.iter().any(|a| a.to_lowercase() == lower)
    }
}

/// Join row between an article and a canonical entity.
///
/// Unique per (article, entity): repeated extraction of the same entity
/// from the same article updates the existing link. Written exclusively
/// by the canonicalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleEntityLink {
    pub article_id: ArticleId,
    pub entity_id: EntityId,
    /// Extraction confidence, 0-100
    pub confidence: u8,
    pub evidence: Option<String>,
    pub source: ExtractionSource,
    pub extracted_at: DateTime<Utc>,
}
