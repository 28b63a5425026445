//! Candidate generation — stage 1 of association
//!
//! Narrow the search space with indexed lookups before any scoring
//! happens. Cost is proportional to (entities on the source article) ×
//! (average articles per entity), never to the total article count.

use crate::entity::ArticleId;
use crate::storage::{IntelStore, StorageResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Finds the articles worth scoring against a target article.
pub struct CandidateGenerator {
    store: Arc<dyn IntelStore>,
}

impl CandidateGenerator {
    pub fn new(store: Arc<dyn IntelStore>) -> Self {
        Self { store }
    }

    /// All other articles sharing at least one canonical entity with
    /// `article`, published within the last `lookback_days`.
    ///
    /// An article with no extracted entities yields an empty set — it can
    /// never be associated with anything until extraction has run.
    /// Entities flagged as false positives contribute no candidates.
    /// Returns a `BTreeSet` so downstream scoring iterates in a stable
    /// order.
    pub fn generate(
        &self,
        article: ArticleId,
        lookback_days: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<BTreeSet<ArticleId>> {
        let cutoff = now - Duration::days(lookback_days as i64);
        let entities = self.store.linked_entities(article)?;

        let mut candidates = BTreeSet::new();
        for (entity_id, _) in &entities {
            for other in self.store.articles_linked_to(*entity_id, cutoff, article)? {
                candidates.insert(other);
            }
        }

        debug!(
            article = %article,
            entities = entities.len(),
            candidates = candidates.len(),
            lookback_days,
            "candidate generation complete"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ArticleEntityLink, ArticleRecord, EntityKind, ExtractionSource};
    use crate::storage::{OpenStore, SqliteStore};

    fn link(store: &SqliteStore, article: ArticleId, value: &str) {
        let entity = store
            .record_occurrence(EntityKind::Indicator, value, 60, Utc::now())
            .unwrap();
        store
            .upsert_link(&ArticleEntityLink {
                article_id: article,
                entity_id: entity.id,
                confidence: 60,
                evidence: None,
                source: ExtractionSource::Original,
                extracted_at: Utc::now(),
            })
            .unwrap();
    }

    fn saved_article(store: &SqliteStore, days_ago: i64) -> ArticleId {
        let article = ArticleRecord::new(
            ArticleId::new(),
            "candidate test",
            Utc::now() - Duration::days(days_ago),
        );
        store.save_article(&article).unwrap();
        article.id
    }

    #[test]
    fn shared_entity_within_window_is_a_candidate() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let target = saved_article(&store, 0);
        let near = saved_article(&store, 10);
        let far = saved_article(&store, 200);
        let unrelated = saved_article(&store, 5);

        link(&store, target, "198.51.100.7");
        link(&store, near, "198.51.100.7");
        link(&store, far, "198.51.100.7");
        link(&store, unrelated, "203.0.113.9");

        let generator = CandidateGenerator::new(store.clone() as Arc<dyn IntelStore>);
        let candidates = generator.generate(target, 90, Utc::now()).unwrap();

        assert!(candidates.contains(&near));
        assert!(!candidates.contains(&far), "outside the lookback window");
        assert!(!candidates.contains(&unrelated), "no shared entity");
        assert!(!candidates.contains(&target), "never self");
    }

    #[test]
    fn no_entities_means_no_candidates() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let target = saved_article(&store, 0);
        let other = saved_article(&store, 1);
        link(&store, other, "198.51.100.7");

        let generator = CandidateGenerator::new(store.clone() as Arc<dyn IntelStore>);
        assert!(generator.generate(target, 90, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn false_positive_entities_generate_nothing() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let target = saved_article(&store, 0);
        let other = saved_article(&store, 1);
        link(&store, target, "10.0.0.1");
        link(&store, other, "10.0.0.1");

        let entity = store
            .lookup_entity(EntityKind::Indicator, "10.0.0.1")
            .unwrap()
            .unwrap();
        store.set_false_positive(entity.id, true).unwrap();

        let generator = CandidateGenerator::new(store.clone() as Arc<dyn IntelStore>);
        assert!(generator.generate(target, 90, Utc::now()).unwrap().is_empty());
    }
}
