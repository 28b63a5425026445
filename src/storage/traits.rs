//! Storage trait definitions

use crate::entity::{
    ArticleEntityLink, ArticleId, ArticleRecord, ArticleRelationship, Campaign, CanonicalEntity,
    EntityId, EntityKind, ExtractionRun, ExtractionSource, RunId, RunStatus, SimilarityConfig,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Id parsing error: {0}")]
    IdParse(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Article not found: {0}")]
    ArticleNotFound(String),

    /// A relationship write would have produced two rows for one pair.
    /// This is a bug in the caller's upsert logic; the transaction aborts.
    #[error("Duplicate relationship pair: {0}")]
    DuplicatePair(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Aggregate counts for operator-facing stats output.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub articles: usize,
    pub entities: usize,
    pub links: usize,
    pub relationships: usize,
    pub campaigns: usize,
    pub runs: usize,
}

/// Persistent store for the association pipeline.
///
/// Implementations must be thread-safe (Send + Sync): multiple orchestrator
/// workers share one store. All insert-or-update paths are atomic at the
/// storage level (`ON CONFLICT` upserts), never read-then-write from the
/// application — two concurrent extractions that both discover the same new
/// indicator must converge on one row.
pub trait IntelStore: Send + Sync {
    // === Articles ===

    /// Insert or update the pipeline's view of an article
    fn save_article(&self, article: &ArticleRecord) -> StorageResult<()>;

    /// Load an article by id
    fn load_article(&self, id: ArticleId) -> StorageResult<Option<ArticleRecord>>;

    // === Canonical entities ===

    /// Atomically record one occurrence of a (kind, value) pair.
    ///
    /// Creates the row with `occurrence_count = 1` if unseen, otherwise
    /// increments the count, advances `last_seen`, and keeps the maximum
    /// confidence. Returns the post-update row. `value` must already be
    /// normalized (or be an actor canonical name).
    fn record_occurrence(
        &self,
        kind: EntityKind,
        value: &str,
        confidence: u8,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<CanonicalEntity>;

    /// Add an alias to an entity (no-op if already present, case-insensitive)
    fn add_alias(&self, entity: EntityId, alias: &str) -> StorageResult<()>;

    /// Exact lookup by (kind, normalized value), case-insensitive
    fn lookup_entity(&self, kind: EntityKind, value: &str)
        -> StorageResult<Option<CanonicalEntity>>;

    /// Load an entity by id
    fn load_entity(&self, id: EntityId) -> StorageResult<Option<CanonicalEntity>>;

    /// Exact threat-actor lookup by canonical name or any alias
    fn find_actor(&self, name: &str) -> StorageResult<Option<CanonicalEntity>>;

    /// All (id, canonical name) pairs for threat actors, for fuzzy matching.
    /// Excludes false positives.
    fn actor_directory(&self) -> StorageResult<Vec<(EntityId, String)>>;

    /// Set or clear the analyst false-positive flag
    fn set_false_positive(&self, entity: EntityId, flag: bool) -> StorageResult<()>;

    // === Article-entity links ===

    /// Insert or update the link for (article, entity)
    fn upsert_link(&self, link: &ArticleEntityLink) -> StorageResult<()>;

    /// All links for an article
    fn links_for_article(&self, article: ArticleId) -> StorageResult<Vec<ArticleEntityLink>>;

    /// (entity id, kind) pairs linked to an article, excluding entities
    /// flagged as false positives. The scorer's overlap input.
    fn linked_entities(&self, article: ArticleId) -> StorageResult<Vec<(EntityId, EntityKind)>>;

    /// Other articles linked to an entity, published in `[cutoff, now]`.
    /// Indexed: cost is proportional to the entity's fan-out, not the
    /// total article count.
    fn articles_linked_to(
        &self,
        entity: EntityId,
        published_after: DateTime<Utc>,
        exclude: ArticleId,
    ) -> StorageResult<Vec<ArticleId>>;

    // === Extraction runs ===

    /// Create a run record in `Running` state
    fn begin_run(
        &self,
        article: ArticleId,
        sources: &[ExtractionSource],
        started_at: DateTime<Utc>,
    ) -> StorageResult<RunId>;

    /// Finalize a run. Immutable afterwards.
    fn finish_run(
        &self,
        run: RunId,
        status: RunStatus,
        entity_count: u32,
        finished_at: DateTime<Utc>,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Most recent runs, newest first
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<ExtractionRun>>;

    // === Similarity config ===

    /// Insert a new config version and make it the single active one.
    /// Returns the config with its assigned version.
    fn insert_config(&self, config: &SimilarityConfig) -> StorageResult<SimilarityConfig>;

    /// The currently active config, if any
    fn active_config(&self) -> StorageResult<Option<SimilarityConfig>>;

    // === Relationships ===

    /// Replace association state for a source article in one transaction.
    ///
    /// Deletes any existing rows for the unordered pairs in `evaluated`
    /// (stale rows for re-scored pairs, including pairs that no longer
    /// clear the threshold), then inserts `accepted`. Pairs not listed in
    /// `evaluated` are left alone — the caller decides the re-evaluation
    /// scope. Either everything commits or nothing does. A duplicate pair
    /// in `accepted` aborts with [`StorageError::DuplicatePair`].
    fn replace_relationships(
        &self,
        article: ArticleId,
        evaluated: &[ArticleId],
        accepted: &[ArticleRelationship],
    ) -> StorageResult<()>;

    /// All relationships with either endpoint equal to `article`
    fn relationships_for(&self, article: ArticleId) -> StorageResult<Vec<ArticleRelationship>>;

    /// All relationships with composite score >= `min_score`
    fn relationships_above(&self, min_score: f64) -> StorageResult<Vec<ArticleRelationship>>;

    /// Article ids with at least one link, newest publication first.
    /// Drives association rebuilds after a config change.
    fn recently_linked_articles(&self, limit: usize) -> StorageResult<Vec<ArticleId>>;

    // === Campaigns ===

    /// Atomically discard the previous campaign set and store the new one
    fn replace_campaigns(&self, campaigns: &[Campaign]) -> StorageResult<()>;

    /// All campaigns, largest first
    fn list_campaigns(&self) -> StorageResult<Vec<Campaign>>;

    // === Embedding cache ===

    /// Cached embedding vector for an article's technical summary
    fn load_embedding(&self, article: ArticleId) -> StorageResult<Option<Vec<f32>>>;

    /// Cache an embedding vector (insert or replace)
    fn store_embedding(
        &self,
        article: ArticleId,
        vector: &[f32],
        computed_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    // === Stats ===

    fn stats(&self) -> StorageResult<StoreStats>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: IntelStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
