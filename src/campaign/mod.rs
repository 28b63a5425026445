//! Campaign clustering — batch connected-components over relationships
//!
//! Campaigns are a derived view: each rebuild reads the relationship graph
//! under one snapshot, recomputes every cluster in memory, and swaps the
//! stored campaign set in a single transaction. Nothing here mutates
//! incrementally during the scan.

mod unionfind;

pub use unionfind::UnionFind;

use crate::entity::{ArticleId, Campaign, CampaignId, EntityId, SimilarityConfig};
use crate::storage::{IntelStore, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// At most this many representative entities are kept per campaign.
pub const REPRESENTATIVE_LIMIT: usize = 5;

/// Groups articles transitively connected by above-threshold relationships.
pub struct CampaignClusterer {
    store: Arc<dyn IntelStore>,
}

impl CampaignClusterer {
    pub fn new(store: Arc<dyn IntelStore>) -> Self {
        Self { store }
    }

    /// Rebuild the campaign set from scratch and persist it, replacing the
    /// previous set. Components with fewer than two members are dropped —
    /// an article with no qualifying relationship belongs to no campaign.
    pub fn rebuild(
        &self,
        config: &SimilarityConfig,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Campaign>> {
        // Read everything first; clustering never holds a read open while
        // writing. The campaign threshold is deliberately separate from the
        // association persist threshold.
        let relationships = self.store.relationships_above(config.campaign_min_score)?;

        // Dense arena indices for the duration of the batch
        let mut index: BTreeMap<ArticleId, usize> = BTreeMap::new();
        let mut articles: Vec<ArticleId> = Vec::new();
        let mut arena_id = |id: ArticleId, articles: &mut Vec<ArticleId>| -> usize {
            *index.entry(id).or_insert_with(|| {
                articles.push(id);
                articles.len() - 1
            })
        };

        let mut edges = Vec::with_capacity(relationships.len());
        for rel in &relationships {
            let lo = arena_id(rel.article_lo, &mut articles);
            let hi = arena_id(rel.article_hi, &mut articles);
            edges.push((lo, hi));
        }

        let mut uf = UnionFind::new(articles.len());
        for (lo, hi) in edges {
            uf.union(lo, hi);
        }

        let mut campaigns = Vec::new();
        for component in uf.components() {
            if component.len() < 2 {
                continue;
            }
            let mut members: Vec<ArticleId> =
                component.into_iter().map(|i| articles[i]).collect();
            members.sort();
            campaigns.push(self.build_campaign(members, now)?);
        }

        self.store.replace_campaigns(&campaigns)?;
        info!(
            campaigns = campaigns.len(),
            threshold = config.campaign_min_score,
            "campaign rebuild complete"
        );
        Ok(campaigns)
    }

    fn build_campaign(
        &self,
        members: Vec<ArticleId>,
        now: DateTime<Utc>,
    ) -> StorageResult<Campaign> {
        let mut first_seen: Option<DateTime<Utc>> = None;
        let mut last_seen: Option<DateTime<Utc>> = None;
        for member in &members {
            if let Some(article) = self.store.load_article(*member)? {
                let published = article.published_at;
                first_seen = Some(first_seen.map_or(published, |f| f.min(published)));
                last_seen = Some(last_seen.map_or(published, |l| l.max(published)));
            }
        }

        Ok(Campaign {
            id: CampaignId::new(),
            representative_entities: self.representative_entities(&members)?,
            first_seen: first_seen.unwrap_or(now),
            last_seen: last_seen.unwrap_or(now),
            detected_at: now,
            member_ids: members,
        })
    }

    /// Entities linked to at least two members, most widely shared first.
    /// Ties break on entity id so rebuilds are deterministic.
    fn representative_entities(&self, members: &[ArticleId]) -> StorageResult<Vec<EntityId>> {
        let mut counts: BTreeMap<EntityId, usize> = BTreeMap::new();
        for member in members {
            for (entity, _) in self.store.linked_entities(*member)? {
                *counts.entry(entity).or_default() += 1;
            }
        }

        let mut shared: Vec<(EntityId, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .collect();
        shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(shared
            .into_iter()
            .take(REPRESENTATIVE_LIMIT)
            .map(|(entity, _)| entity)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ArticleRelationship, SimilarityConfig};
    use crate::storage::{OpenStore, SqliteStore};

    fn relate(store: &SqliteStore, a: ArticleId, b: ArticleId, score: f64) {
        let (lo, hi) = ArticleRelationship::ordered_pair(a, b);
        store
            .replace_relationships(
                a,
                &[b],
                &[ArticleRelationship {
                    article_lo: lo,
                    article_hi: hi,
                    shared_indicators: 1,
                    shared_techniques: 0,
                    shared_actors: 0,
                    semantic_similarity: None,
                    score,
                    lookback_days: 90,
                    computed_at: Utc::now(),
                }],
            )
            .unwrap();
    }

    #[test]
    fn triangle_forms_one_campaign_and_rebuild_replaces() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clusterer = CampaignClusterer::new(store.clone() as Arc<dyn IntelStore>);
        let config = SimilarityConfig {
            campaign_min_score: 0.5,
            ..SimilarityConfig::default()
        };

        let (a, b, c, d) = (
            ArticleId::new(),
            ArticleId::new(),
            ArticleId::new(),
            ArticleId::new(),
        );
        relate(&store, a, b, 0.8);
        relate(&store, b, c, 0.7);
        relate(&store, a, c, 0.6);
        // Below the campaign threshold: d stays isolated
        relate(&store, c, d, 0.4);

        let campaigns = clusterer.rebuild(&config, Utc::now()).unwrap();
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].len(), 3);
        assert!(!campaigns[0].contains(d));

        // Second rebuild replaces rather than accumulates
        let again = clusterer.rebuild(&config, Utc::now()).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(store.list_campaigns().unwrap().len(), 1);
    }

    #[test]
    fn chain_is_transitively_one_campaign() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clusterer = CampaignClusterer::new(store.clone() as Arc<dyn IntelStore>);
        let config = SimilarityConfig::default();

        let ids: Vec<ArticleId> = (0..4).map(|_| ArticleId::new()).collect();
        for pair in ids.windows(2) {
            relate(&store, pair[0], pair[1], 0.9);
        }

        let campaigns = clusterer.rebuild(&config, Utc::now()).unwrap();
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].len(), 4);
    }

    #[test]
    fn no_relationships_means_no_campaigns() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clusterer = CampaignClusterer::new(store.clone() as Arc<dyn IntelStore>);
        let campaigns = clusterer
            .rebuild(&SimilarityConfig::default(), Utc::now())
            .unwrap();
        assert!(campaigns.is_empty());
    }
}
