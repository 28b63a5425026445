//! Campaign clusters — a derived view over relationships

use super::ids::{ArticleId, CampaignId, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transitive cluster of articles connected by above-threshold
/// relationships, representing suspected coordinated threat activity.
///
/// Campaigns are recomputed wholesale by the clustering job and never
/// hand-edited; each rebuild replaces the previous set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    /// Member articles, sorted for deterministic output
    pub member_ids: Vec<ArticleId>,
    /// Entities shared by at least two members, most frequent first
    pub representative_entities: Vec<EntityId>,
    /// Publication date of the earliest member
    pub first_seen: DateTime<Utc>,
    /// Publication date of the latest member
    pub last_seen: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl Campaign {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn contains(&self, article: ArticleId) -> bool {
        self.member_ids.contains(&article)
    }
}
