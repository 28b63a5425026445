//! Tessera: Historical Association Engine for Threat-Intelligence Articles
//!
//! Given a newly ingested article, extract security entities (indicators,
//! techniques, threat actors), canonicalize them against a persistent
//! entity store, and find the historically related articles with a
//! two-stage candidate-generation-then-scoring pass. Related articles can
//! then be clustered into campaigns.
//!
//! # Core Concepts
//!
//! - **Canonical entities**: noisy extracted strings merged into stable
//!   rows with provenance (first/last seen, occurrence counts, aliases)
//! - **Two-stage association**: indexed candidate generation first, then
//!   weighted scoring of entity overlap and semantic similarity
//! - **Campaigns**: connected components over above-threshold
//!   relationships, rebuilt as a batch
//!
//! # Example
//!
//! ```
//! use tessera::{OpenStore, SqliteStore};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! // Store is ready for use
//! ```

pub mod adapter;
pub mod assoc;
pub mod campaign;
pub mod canonical;
pub mod entity;
pub mod pipeline;
pub mod storage;

pub use adapter::{AdapterError, Embedder, EntityExtractor, HashEmbedder, StaticExtractor};
pub use assoc::{AssociationWriter, CandidateGenerator, RelevanceScorer, ScoredCandidate};
pub use campaign::CampaignClusterer;
pub use canonical::Canonicalizer;
pub use entity::{
    ArticleEntityLink, ArticleId, ArticleRecord, ArticleRelationship, Campaign, CampaignId,
    CanonicalEntity, EntityId, EntityKind, ExtractionRun, ExtractionSource, RawEntity, RunId,
    RunStatus, SimilarityConfig,
};
pub use pipeline::{
    AnalysisOutcome, AnalysisState, EventSink, Orchestrator, PipelineError, PipelineEvent,
    PipelineResult,
};
pub use storage::{IntelStore, OpenStore, SqliteStore, StorageError, StorageResult, StoreStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
