//! Association persistence — stage 3 of association
//!
//! One transaction per source article: every accepted relationship row is
//! written (full overwrite of any prior row for the pair, never a
//! field-by-field merge) or none are. Evaluated-but-rejected pairs get
//! their stale rows deleted in the same transaction, so a pair that fell
//! below the threshold after a rescore is represented by absence again.

use super::scorer::ScoredCandidate;
use crate::entity::{ArticleId, ArticleRelationship, SimilarityConfig};
use crate::storage::{IntelStore, StorageResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Persists scored relationships.
pub struct AssociationWriter {
    store: Arc<dyn IntelStore>,
}

impl AssociationWriter {
    pub fn new(store: Arc<dyn IntelStore>) -> Self {
        Self { store }
    }

    /// Write association state for `article`.
    ///
    /// `evaluated` is the full candidate set that was scored (accepted or
    /// not); rows for those pairs are replaced. Returns the persisted rows.
    pub fn persist(
        &self,
        article: ArticleId,
        evaluated: &[ArticleId],
        accepted: &[ScoredCandidate],
        config: &SimilarityConfig,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<ArticleRelationship>> {
        let rows: Vec<ArticleRelationship> = accepted
            .iter()
            .map(|scored| {
                let (lo, hi) = ArticleRelationship::ordered_pair(article, scored.candidate);
                ArticleRelationship {
                    article_lo: lo,
                    article_hi: hi,
                    shared_indicators: scored.shared_indicators,
                    shared_techniques: scored.shared_techniques,
                    shared_actors: scored.shared_actors,
                    semantic_similarity: scored.semantic_similarity,
                    score: scored.score,
                    lookback_days: config.lookback_days,
                    computed_at: now,
                }
            })
            .collect();

        self.store.replace_relationships(article, evaluated, &rows)?;
        info!(
            article = %article,
            evaluated = evaluated.len(),
            persisted = rows.len(),
            "association write committed"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};

    fn scored(candidate: ArticleId, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate,
            shared_indicators: 1,
            shared_techniques: 0,
            shared_actors: 0,
            semantic_similarity: None,
            score,
        }
    }

    #[test]
    fn persist_then_rescore_replaces_rows() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let writer = AssociationWriter::new(store.clone() as Arc<dyn IntelStore>);
        let config = SimilarityConfig::default();
        let article = ArticleId::new();
        let other = ArticleId::new();
        let now = Utc::now();

        writer
            .persist(article, &[other], &[scored(other, 0.5)], &config, now)
            .unwrap();
        let first = store.relationships_for(article).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].score, 0.5);

        // Rescore with a different score: full overwrite, still one row
        writer
            .persist(article, &[other], &[scored(other, 0.7)], &config, now)
            .unwrap();
        let second = store.relationships_for(article).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].score, 0.7);

        // Rescore where the pair no longer clears the threshold: absence
        writer.persist(article, &[other], &[], &config, now).unwrap();
        assert!(store.relationships_for(article).unwrap().is_empty());
    }

    #[test]
    fn pair_ordering_prevents_reverse_duplicates() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let writer = AssociationWriter::new(store.clone() as Arc<dyn IntelStore>);
        let config = SimilarityConfig::default();
        let a = ArticleId::new();
        let b = ArticleId::new();
        let now = Utc::now();

        // Write the same pair from both endpoints
        writer.persist(a, &[b], &[scored(b, 0.4)], &config, now).unwrap();
        writer.persist(b, &[a], &[scored(a, 0.6)], &config, now).unwrap();

        let rows = store.relationships_for(a).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 0.6);
        let (lo, hi) = ArticleRelationship::ordered_pair(a, b);
        assert_eq!((rows[0].article_lo, rows[0].article_hi), (lo, hi));
    }
}
