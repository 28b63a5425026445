//! Pipeline orchestrator — one article through extraction, canonicalization,
//! and association as a single unit of work
//!
//! State machine: PENDING -> EXTRACTING -> CANONICALIZING -> ASSOCIATING ->
//! DONE, with FAILED reachable from any working state. Every stage is
//! upsert-based, so re-running an article from the top is always safe.
//! Transactions never span an adapter call: scoring (which may hit the
//! embedding backend) completes before the association write begins.

use super::events::{EventSink, PipelineEvent, RelationshipSummary};
use crate::adapter::{AdapterError, Embedder, EntityExtractor};
use crate::assoc::{
    AssociationWriter, CandidateGenerator, RelevanceScorer, ScoredCandidate, SimilarityConfig,
};
use crate::campaign::CampaignClusterer;
use crate::canonical::{CanonicalizeOutcome, Canonicalizer};
use crate::entity::{ArticleId, ArticleRecord, ArticleRelationship, ExtractionSource, RawEntity, RunId, RunStatus};
use crate::storage::{IntelStore, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Errors that fail a pipeline run.
///
/// Stage-local problems (malformed candidates, canonical-key conflicts)
/// are recovered inside the stages and never reach this type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("extraction failed after {attempts} attempts: {source}")]
    ExtractionFailed {
        attempts: u32,
        #[source]
        source: AdapterError,
    },

    /// No active similarity configuration — operator action required
    #[error("no active similarity configuration")]
    NoActiveConfig,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Structured code recorded on the failed run for operators.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(StorageError::DuplicatePair(_)) => "CONSISTENCY_VIOLATION",
            Self::Storage(_) => "STORAGE",
            Self::ExtractionFailed { .. } => "EXTRACTION_FAILED",
            Self::NoActiveConfig => "CONFIG_MISSING",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Orchestrator states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Pending,
    Extracting,
    Canonicalizing,
    Associating,
    Done,
    Failed,
}

impl std::fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Canonicalizing => "canonicalizing",
            Self::Associating => "associating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What one successful analyze pass produced.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub run_id: RunId,
    /// Links on the article after this run
    pub entity_count: u32,
    /// Entities created (previously unseen) during this run
    pub created_entities: u32,
    /// Raw candidates dropped as malformed
    pub dropped_candidates: u32,
    /// Relationships persisted by this run
    pub relationships: Vec<ArticleRelationship>,
}

/// Drives articles through the full pipeline.
///
/// Safe to share across tasks; concurrent `analyze` calls are capped by an
/// internal semaphore and contend only on the storage layer's upserts.
pub struct Orchestrator {
    store: Arc<dyn IntelStore>,
    extractor: Arc<dyn EntityExtractor>,
    canonicalizer: Canonicalizer,
    generator: CandidateGenerator,
    scorer: RelevanceScorer,
    writer: AssociationWriter,
    clusterer: CampaignClusterer,
    sinks: Vec<Arc<dyn EventSink>>,
    permits: Arc<Semaphore>,
    max_extraction_attempts: u32,
    retry_backoff: Duration,
    extract_timeout: Duration,
    refresh_campaigns: bool,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn IntelStore>, extractor: Arc<dyn EntityExtractor>) -> Self {
        Self {
            canonicalizer: Canonicalizer::new(store.clone()),
            generator: CandidateGenerator::new(store.clone()),
            scorer: RelevanceScorer::new(store.clone()),
            writer: AssociationWriter::new(store.clone()),
            clusterer: CampaignClusterer::new(store.clone()),
            store,
            extractor,
            sinks: Vec::new(),
            permits: Arc::new(Semaphore::new(4)),
            max_extraction_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            extract_timeout: Duration::from_secs(60),
            refresh_campaigns: false,
        }
    }

    /// Attach an embedding backend, enabling semantic scoring.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.scorer = self.scorer.with_embedder(embedder);
        self
    }

    /// Deadline for one embedding call before the scorer falls back to
    /// exact-match-only.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.scorer = self.scorer.with_embed_timeout(timeout);
        self
    }

    /// Register an event sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Cap on concurrently running analyze calls.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit));
        self
    }

    /// Rebuild campaigns after every successful analyze pass.
    pub fn with_campaign_refresh(mut self, enabled: bool) -> Self {
        self.refresh_campaigns = enabled;
        self
    }

    pub fn with_max_extraction_attempts(mut self, attempts: u32) -> Self {
        self.max_extraction_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    /// Replace the canonicalizer (custom alias matcher or threshold).
    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    /// Run one article through the full pipeline.
    ///
    /// Idempotent: re-running a `DONE` or `FAILED` article re-executes all
    /// stages from the top. `original_text` is the full article body, held
    /// by the surrounding product and never persisted here.
    pub async fn analyze(
        &self,
        article: &ArticleRecord,
        original_text: Option<&str>,
    ) -> PipelineResult<AnalysisOutcome> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| PipelineError::Internal(format!("semaphore closed: {}", e)))?;

        let now = Utc::now();
        self.store.save_article(article)?;

        // PENDING -> EXTRACTING
        let sources = Self::source_texts(article, original_text);
        let source_kinds: Vec<ExtractionSource> = sources.iter().map(|(s, _)| *s).collect();
        let run_id = self.store.begin_run(article.id, &source_kinds, now)?;
        info!(article = %article.id, run = %run_id, state = %AnalysisState::Extracting, "analysis started");

        let candidates = match self.extract_all(&sources).await {
            Ok(candidates) => candidates,
            Err(e) => return self.fail(run_id, 0, e),
        };

        // EXTRACTING -> CANONICALIZING (an empty candidate list is valid)
        info!(
            article = %article.id,
            candidates = candidates.len(),
            state = %AnalysisState::Canonicalizing,
            "extraction complete"
        );
        let canonical: CanonicalizeOutcome =
            match self.canonicalizer.canonicalize(article.id, &candidates, now) {
                Ok(outcome) => outcome,
                Err(e) => return self.fail(run_id, 0, e.into()),
            };
        let entity_count = canonical.links.len() as u32;

        // CANONICALIZING -> ASSOCIATING
        info!(
            article = %article.id,
            links = entity_count,
            state = %AnalysisState::Associating,
            "canonicalization complete"
        );
        let relationships = match self.associate(article.id, now).await {
            Ok(relationships) => relationships,
            Err(e) => return self.fail(run_id, entity_count, e),
        };

        // ASSOCIATING -> DONE
        let status = if canonical.dropped > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };
        self.store
            .finish_run(run_id, status, entity_count, Utc::now(), None, None)?;
        info!(article = %article.id, run = %run_id, state = %AnalysisState::Done, "analysis finished");

        if self.refresh_campaigns {
            if let Some(config) = self.store.active_config()? {
                self.clusterer.rebuild(&config, Utc::now())?;
            }
        }

        let outcome = AnalysisOutcome {
            run_id,
            entity_count,
            created_entities: canonical.created,
            dropped_candidates: canonical.dropped,
            relationships,
        };
        self.emit(&outcome, article.id);
        Ok(outcome)
    }

    /// Re-run candidate generation, scoring, and persistence for the most
    /// recently published articles that have links — the explicit rebuild
    /// that makes a config change take effect retroactively.
    pub async fn rebuild_associations(&self, limit: usize) -> PipelineResult<usize> {
        let articles = self.store.recently_linked_articles(limit)?;
        let now = Utc::now();
        let mut rebuilt = 0;
        for article in articles {
            self.associate(article, now).await?;
            rebuilt += 1;
        }
        info!(rebuilt, "association rebuild complete");
        Ok(rebuilt)
    }

    /// Rebuild the campaign set under the active config.
    pub async fn rebuild_campaigns(&self) -> PipelineResult<usize> {
        let config = self.active_config()?;
        let campaigns = self.clusterer.rebuild(&config, Utc::now())?;
        let event = PipelineEvent::CampaignsRebuilt {
            campaigns: campaigns.len(),
        };
        for sink in &self.sinks {
            sink.publish(&event);
        }
        Ok(campaigns.len())
    }

    fn active_config(&self) -> PipelineResult<SimilarityConfig> {
        self.store
            .active_config()?
            .ok_or(PipelineError::NoActiveConfig)
    }

    /// The association stage: config fetch, candidate generation, scoring,
    /// transactional write. All adapter calls happen during scoring; the
    /// write afterwards is pure storage work.
    async fn associate(
        &self,
        article: ArticleId,
        now: DateTime<Utc>,
    ) -> PipelineResult<Vec<ArticleRelationship>> {
        let config = self.active_config()?;

        let candidates = self
            .generator
            .generate(article, config.lookback_days, now)?;

        // Re-evaluate existing partners too, even when they fell out of
        // the candidate set (flagged entity, tightened lookback): their
        // stale rows must be deleted, not preserved. Only candidates are
        // scored — a pair outside the candidate set shares no usable
        // entity, so its correct state is absence.
        let mut evaluated: std::collections::BTreeSet<ArticleId> = candidates.clone();
        for rel in self.store.relationships_for(article)? {
            if let Some(other) = rel.other(article) {
                evaluated.insert(other);
            }
        }
        let evaluated: Vec<ArticleId> = evaluated.into_iter().collect();

        let mut accepted: Vec<ScoredCandidate> = Vec::new();
        for candidate in &candidates {
            if let Some(scored) = self.scorer.score(article, *candidate, &config, now).await? {
                accepted.push(scored);
            }
        }

        let rows = self.writer.persist(article, &evaluated, &accepted, &config, now)?;
        Ok(rows)
    }

    fn source_texts<'a>(
        article: &'a ArticleRecord,
        original_text: Option<&'a str>,
    ) -> Vec<(ExtractionSource, &'a str)> {
        let mut sources = Vec::new();
        if let Some(text) = original_text {
            sources.push((ExtractionSource::Original, text));
        }
        if let Some(text) = article.executive_summary.as_deref() {
            sources.push((ExtractionSource::ExecutiveSummary, text));
        }
        if let Some(text) = article.technical_summary.as_deref() {
            sources.push((ExtractionSource::TechnicalSummary, text));
        }
        sources
    }

    /// Run extraction over every available source, with bounded retries
    /// and backoff for transient adapter failures.
    async fn extract_all(
        &self,
        sources: &[(ExtractionSource, &str)],
    ) -> PipelineResult<Vec<RawEntity>> {
        let mut all = Vec::new();
        for (source, text) in sources {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let result =
                    tokio::time::timeout(self.extract_timeout, self.extractor.extract(text, *source))
                        .await
                        .unwrap_or_else(|_| {
                            Err(AdapterError::Timeout(self.extract_timeout.as_millis() as u64))
                        });

                match result {
                    Ok(candidates) => {
                        // Stamp the source we actually queried; adapters
                        // are not trusted to set it consistently
                        all.extend(candidates.into_iter().map(|c| c.with_source(*source)));
                        break;
                    }
                    Err(e) if e.is_transient() && attempt < self.max_extraction_attempts => {
                        warn!(
                            source = %source,
                            attempt,
                            error = %e,
                            "transient extraction failure; retrying"
                        );
                        tokio::time::sleep(self.retry_backoff * attempt).await;
                    }
                    Err(e) => {
                        return Err(PipelineError::ExtractionFailed {
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
            }
        }
        Ok(all)
    }

    /// Mark the run failed with a structured code and propagate the error.
    /// Stages already committed (article row, links) remain valid.
    fn fail<T>(
        &self,
        run_id: RunId,
        entity_count: u32,
        error: PipelineError,
    ) -> PipelineResult<T> {
        warn!(run = %run_id, code = error.code(), error = %error, "analysis failed");
        if let Err(finish_err) = self.store.finish_run(
            run_id,
            RunStatus::Failed,
            entity_count,
            Utc::now(),
            Some(error.code()),
            Some(&error.to_string()),
        ) {
            warn!(run = %run_id, error = %finish_err, "could not finalize failed run");
        }
        Err(error)
    }

    fn emit(&self, outcome: &AnalysisOutcome, article_id: ArticleId) {
        if self.sinks.is_empty() {
            return;
        }
        let mut relationships: Vec<RelationshipSummary> = outcome
            .relationships
            .iter()
            .filter_map(|rel| {
                rel.other(article_id).map(|other| RelationshipSummary {
                    other,
                    score: rel.score,
                })
            })
            .collect();
        relationships.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let event = PipelineEvent::AnalysisComplete {
            article_id,
            run_id: outcome.run_id,
            entity_count: outcome.entity_count,
            created_entities: outcome.created_entities,
            relationships,
        };
        for sink in &self.sinks {
            sink.publish(&event);
        }
    }
}
