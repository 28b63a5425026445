//! Versioned similarity configuration
//!
//! Exactly one configuration row is active at a time. Association runs
//! fetch the active row once at the start and pass it explicitly through
//! candidate generation, scoring, and writing, so a config change mid-run
//! cannot produce mixed scores within one run. Changing the active config
//! never rescores existing relationships until an explicit rebuild.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admin-tunable weights and thresholds for the association engine.
///
/// Weights need not sum to 1.0 — composite scores are compared against
/// `min_score` under the same weights, so only their ratios and the
/// threshold matter. The shipped defaults do sum to 1.0 for legibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Assigned by the store on insert; `None` for an unsaved config
    #[serde(default)]
    pub version: Option<i64>,
    /// Candidate generation window, in days before now
    pub lookback_days: u32,
    pub w_indicator: f64,
    pub w_technique: f64,
    pub w_actor: f64,
    pub w_semantic: f64,
    /// Minimum composite score to persist a relationship
    pub min_score: f64,
    /// When set, any exact entity overlap (count >= 1 on any signal)
    /// accepts the candidate regardless of composite score
    pub require_exact_match: bool,
    /// Clustering threshold — association persists more liberally than
    /// campaigns cluster, so this is usually higher than `min_score`
    pub campaign_min_score: f64,
    pub created_at: DateTime<Utc>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            version: None,
            lookback_days: 90,
            w_indicator: 0.4,
            w_technique: 0.3,
            w_actor: 0.2,
            w_semantic: 0.1,
            min_score: 0.3,
            require_exact_match: false,
            campaign_min_score: 0.5,
            created_at: Utc::now(),
        }
    }
}

impl SimilarityConfig {
    /// Whether the semantic signal participates in scoring at all.
    pub fn semantic_enabled(&self) -> bool {
        self.w_semantic > 0.0
    }
}
