//! Relevance scoring — stage 2 of association
//!
//! Blends exact entity overlap with optional semantic similarity under the
//! active config's weights. Scoring is a pure function of store state and
//! config: identical inputs always produce the identical score, which is
//! what makes rebuilds reproducible.

use crate::adapter::{cosine_similarity, Embedder};
use crate::entity::{ArticleId, EntityId, EntityKind, SimilarityConfig};
use crate::storage::{IntelStore, StorageResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Overlap counts saturate here: `min(count / 3, 1)`. Three shared
/// indicators already make a strong signal; twenty shared indicators
/// should not drown out every other signal.
pub const OVERLAP_SATURATION: f64 = 3.0;

/// Default deadline for one embedding call.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// A candidate that cleared acceptance, with its full score breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: ArticleId,
    pub shared_indicators: u32,
    pub shared_techniques: u32,
    pub shared_actors: u32,
    /// Clamped to [0, 1]; `None` when the semantic signal was disabled or
    /// unavailable (no summary, no embedder, timeout)
    pub semantic_similarity: Option<f64>,
    pub score: f64,
}

/// Map a raw overlap count into [0, 1] with saturation.
pub fn saturate(count: u32) -> f64 {
    (count as f64 / OVERLAP_SATURATION).min(1.0)
}

/// The composite scoring formula, factored out so tests can pin it down
/// without a store.
pub fn composite_score(
    config: &SimilarityConfig,
    indicators: u32,
    techniques: u32,
    actors: u32,
    semantic: Option<f64>,
) -> f64 {
    config.w_indicator * saturate(indicators)
        + config.w_technique * saturate(techniques)
        + config.w_actor * saturate(actors)
        + config.w_semantic * semantic.unwrap_or(0.0)
}

/// Scores candidate articles against a target article.
pub struct RelevanceScorer {
    store: Arc<dyn IntelStore>,
    embedder: Option<Arc<dyn Embedder>>,
    embed_timeout: Duration,
    /// In-process memo of per-article vectors for the current batch;
    /// `None` records "unavailable" so a flaky embedder is not re-polled
    /// for every candidate pair
    vector_cache: DashMap<ArticleId, Option<Vec<f32>>>,
}

impl RelevanceScorer {
    pub fn new(store: Arc<dyn IntelStore>) -> Self {
        Self {
            store,
            embedder: None,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            vector_cache: DashMap::new(),
        }
    }

    /// Attach an embedding backend, enabling the semantic signal.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Override the per-call embedding deadline.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Score one candidate. Returns `None` when the candidate fails
    /// acceptance — absence is the correct outcome, not a zero-score row.
    ///
    /// Acceptance: composite >= `min_score`, or, when
    /// `require_exact_match` is set, any overlap count >= 1.
    pub async fn score(
        &self,
        article: ArticleId,
        candidate: ArticleId,
        config: &SimilarityConfig,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<ScoredCandidate>> {
        let ours = self.entity_sets(article)?;
        let theirs = self.entity_sets(candidate)?;

        let shared_indicators = ours.indicators.intersection(&theirs.indicators).count() as u32;
        let shared_techniques = ours.techniques.intersection(&theirs.techniques).count() as u32;
        let shared_actors = ours.actors.intersection(&theirs.actors).count() as u32;

        let semantic_similarity = if config.semantic_enabled() {
            self.semantic_similarity(article, candidate, now).await?
        } else {
            None
        };

        let score = composite_score(
            config,
            shared_indicators,
            shared_techniques,
            shared_actors,
            semantic_similarity,
        );

        let any_overlap = shared_indicators >= 1 || shared_techniques >= 1 || shared_actors >= 1;
        let accepted = score >= config.min_score || (config.require_exact_match && any_overlap);

        debug!(
            article = %article,
            candidate = %candidate,
            shared_indicators,
            shared_techniques,
            shared_actors,
            semantic = ?semantic_similarity,
            score,
            accepted,
            "scored candidate"
        );

        if !accepted {
            return Ok(None);
        }
        Ok(Some(ScoredCandidate {
            candidate,
            shared_indicators,
            shared_techniques,
            shared_actors,
            semantic_similarity,
            score,
        }))
    }

    fn entity_sets(&self, article: ArticleId) -> StorageResult<EntitySets> {
        let mut sets = EntitySets::default();
        for (id, kind) in self.store.linked_entities(article)? {
            match kind {
                EntityKind::Indicator => sets.indicators.insert(id),
                EntityKind::Technique => sets.techniques.insert(id),
                EntityKind::ThreatActor => sets.actors.insert(id),
            };
        }
        Ok(sets)
    }

    /// Cosine similarity of the two articles' technical-summary embeddings,
    /// clamped to [0, 1]. `None` when either vector is unavailable.
    async fn semantic_similarity(
        &self,
        article: ArticleId,
        candidate: ArticleId,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<f64>> {
        let a = self.embedding_for(article, now).await?;
        let b = self.embedding_for(candidate, now).await?;
        match (a, b) {
            (Some(a), Some(b)) => Ok(Some(cosine_similarity(&a, &b).clamp(0.0, 1.0))),
            _ => Ok(None),
        }
    }

    /// Cached-or-computed embedding of an article's technical summary.
    ///
    /// Failure is soft: a missing summary, absent embedder, timeout, or
    /// backend error all yield `None` and the scorer proceeds
    /// exact-match-only rather than failing the run.
    async fn embedding_for(
        &self,
        article: ArticleId,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Vec<f32>>> {
        if let Some(cached) = self.vector_cache.get(&article) {
            return Ok(cached.value().clone());
        }

        if let Some(stored) = self.store.load_embedding(article)? {
            self.vector_cache.insert(article, Some(stored.clone()));
            return Ok(Some(stored));
        }

        let vector = self.compute_embedding(article, now).await?;
        self.vector_cache.insert(article, vector.clone());
        Ok(vector)
    }

    async fn compute_embedding(
        &self,
        article: ArticleId,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Vec<f32>>> {
        let embedder = match &self.embedder {
            Some(e) => e,
            None => return Ok(None),
        };
        let summary = match self.store.load_article(article)? {
            Some(record) => match record.technical_summary {
                Some(s) if !s.trim().is_empty() => s,
                _ => {
                    debug!(article = %article, "no technical summary; skipping semantic signal");
                    return Ok(None);
                }
            },
            None => return Ok(None),
        };

        match tokio::time::timeout(self.embed_timeout, embedder.embed(&summary)).await {
            Ok(Ok(vector)) => {
                self.store.store_embedding(article, &vector, now)?;
                Ok(Some(vector))
            }
            Ok(Err(e)) => {
                warn!(article = %article, error = %e, "embedding failed; skipping semantic signal");
                Ok(None)
            }
            Err(_) => {
                warn!(
                    article = %article,
                    timeout_ms = self.embed_timeout.as_millis() as u64,
                    "embedding timed out; skipping semantic signal"
                );
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
struct EntitySets {
    indicators: BTreeSet<EntityId>,
    techniques: BTreeSet<EntityId>,
    actors: BTreeSet<EntityId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimilarityConfig {
        SimilarityConfig {
            w_indicator: 0.4,
            w_technique: 0.3,
            w_actor: 0.2,
            w_semantic: 0.1,
            min_score: 0.3,
            require_exact_match: false,
            ..SimilarityConfig::default()
        }
    }

    #[test]
    fn saturation_caps_at_one() {
        assert!((saturate(1) - 1.0 / 3.0).abs() < 1e-9);
        assert!((saturate(3) - 1.0).abs() < 1e-9);
        assert!((saturate(20) - 1.0).abs() < 1e-9);
        assert_eq!(saturate(0), 0.0);
    }

    #[test]
    fn composite_matches_hand_computation() {
        // One shared indicator, similarity 0.2:
        // 0.4 * (1/3) + 0.1 * 0.2 = 0.1533...
        let score = composite_score(&config(), 1, 0, 0, Some(0.2));
        assert!((score - (0.4 / 3.0 + 0.02)).abs() < 1e-9);
    }

    #[test]
    fn twenty_shared_indicators_do_not_dominate() {
        let few = composite_score(&config(), 3, 0, 0, None);
        let many = composite_score(&config(), 20, 0, 0, None);
        assert_eq!(few, many);
    }

    #[test]
    fn missing_semantic_contributes_zero() {
        assert_eq!(
            composite_score(&config(), 0, 0, 0, None),
            0.0
        );
    }
}
