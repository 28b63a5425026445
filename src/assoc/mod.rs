//! Association engine: candidate generation, scoring, persistence
//!
//! Two-stage design: an indexed candidate pass narrows tens of thousands
//! of articles to the few that share an entity with the target, then the
//! scorer spends its budget only on those. The active [`SimilarityConfig`]
//! is fetched once per run and passed explicitly through every stage.

mod candidates;
mod scorer;
mod writer;

pub use crate::entity::SimilarityConfig;
pub use candidates::CandidateGenerator;
pub use scorer::{
    composite_score, saturate, RelevanceScorer, ScoredCandidate, DEFAULT_EMBED_TIMEOUT,
    OVERLAP_SATURATION,
};
pub use writer::AssociationWriter;
