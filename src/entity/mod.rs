//! Core data model for the association pipeline

mod article;
mod campaign;
mod config;
mod ids;
mod relationship;
mod run;
mod types;

pub use article::ArticleRecord;
pub use campaign::Campaign;
pub use config::SimilarityConfig;
pub use ids::{ArticleId, CampaignId, EntityId, RunId};
pub use relationship::ArticleRelationship;
pub use run::{ExtractionRun, RunStatus};
pub use types::{ArticleEntityLink, CanonicalEntity, EntityKind, ExtractionSource, RawEntity};
