//! Persisted output of the association engine

use super::ids::ArticleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scored relationship between two articles.
///
/// Stored once per unordered pair: `article_lo < article_hi` always, so a
/// reverse duplicate cannot exist. Recomputation overwrites the whole row;
/// pairs below the persist threshold are represented by absence, never by
/// a zero-score row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRelationship {
    pub article_lo: ArticleId,
    pub article_hi: ArticleId,
    pub shared_indicators: u32,
    pub shared_techniques: u32,
    pub shared_actors: u32,
    /// Cosine similarity of the technical summaries, clamped to [0, 1].
    /// `None` when semantic scoring was disabled or unavailable.
    pub semantic_similarity: Option<f64>,
    /// Weighted composite of all signals under the config used
    pub score: f64,
    /// Lookback window (days) active when this row was computed
    pub lookback_days: u32,
    pub computed_at: DateTime<Utc>,
}

impl ArticleRelationship {
    /// Order a pair canonically. Panics in debug builds if a == b; callers
    /// must never relate an article to itself.
    pub fn ordered_pair(a: ArticleId, b: ArticleId) -> (ArticleId, ArticleId) {
        debug_assert_ne!(a, b);
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// The endpoint that is not `id`, if `id` is an endpoint at all.
    pub fn other(&self, id: ArticleId) -> Option<ArticleId> {
        if self.article_lo == id {
            Some(self.article_hi)
        } else if self.article_hi == id {
            Some(self.article_lo)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_pair_is_canonical() {
        let a = ArticleId::new();
        let b = ArticleId::new();
        assert_eq!(
            ArticleRelationship::ordered_pair(a, b),
            ArticleRelationship::ordered_pair(b, a)
        );
        let (lo, hi) = ArticleRelationship::ordered_pair(a, b);
        assert!(lo < hi);
    }
}
