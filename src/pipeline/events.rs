//! Outbound events for the surrounding product
//!
//! The admin UI and hunt-generation features react to analysis completion;
//! the pipeline itself never interprets these. Priority scoring is the
//! consumer's business — the payload just carries the inputs it needs
//! (entity counts, relationship scores).

use crate::entity::{ArticleId, RunId};
use serde::{Deserialize, Serialize};

/// Compact view of one persisted relationship, for event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSummary {
    pub other: ArticleId,
    pub score: f64,
}

/// Events emitted by the orchestrator and batch jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// An article finished the full analyze pass
    AnalysisComplete {
        article_id: ArticleId,
        run_id: RunId,
        /// Links on the article after this run
        entity_count: u32,
        /// Entities that did not exist before this run
        created_entities: u32,
        /// Relationships written by this run, best first
        relationships: Vec<RelationshipSummary>,
    },
    /// The campaign set was rebuilt
    CampaignsRebuilt { campaigns: usize },
}

/// Consumer interface for pipeline events.
///
/// Publishing must not block or fail the pipeline; implementations queue
/// or drop internally.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &PipelineEvent);
}

/// Sink that logs events through `tracing`. The default when the
/// surrounding product has not wired its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::AnalysisComplete {
                article_id,
                entity_count,
                relationships,
                ..
            } => {
                tracing::info!(
                    article = %article_id,
                    entities = entity_count,
                    relationships = relationships.len(),
                    "analysis complete"
                );
            }
            PipelineEvent::CampaignsRebuilt { campaigns } => {
                tracing::info!(campaigns, "campaigns rebuilt");
            }
        }
    }
}
