//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tessera::adapter::AdapterError;
use tessera::{
    ArticleId, ArticleRecord, Embedder, EntityExtractor, EntityKind, ExtractionSource, IntelStore,
    Orchestrator, RawEntity, SimilarityConfig, SqliteStore, StaticExtractor,
};

pub fn store() -> Arc<SqliteStore> {
    use tessera::OpenStore;
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

/// Config matching the documented defaults, exact-match override off.
pub fn base_config() -> SimilarityConfig {
    SimilarityConfig {
        version: None,
        lookback_days: 90,
        w_indicator: 0.4,
        w_technique: 0.3,
        w_actor: 0.2,
        w_semantic: 0.1,
        min_score: 0.3,
        require_exact_match: false,
        campaign_min_score: 0.5,
        created_at: Utc::now(),
    }
}

pub fn activate(store: &SqliteStore, config: &SimilarityConfig) {
    store.insert_config(config).unwrap();
}

pub fn article(title: &str, days_ago: i64) -> ArticleRecord {
    ArticleRecord::new(
        ArticleId::new(),
        title,
        Utc::now() - Duration::days(days_ago),
    )
}

pub fn indicator(value: &str) -> RawEntity {
    RawEntity::new(EntityKind::Indicator, value, 60)
}

pub fn technique(value: &str) -> RawEntity {
    RawEntity::new(EntityKind::Technique, value, 70)
}

pub fn actor(value: &str) -> RawEntity {
    RawEntity::new(EntityKind::ThreatActor, value, 80)
}

pub fn orchestrator(store: Arc<SqliteStore>, candidates: Vec<RawEntity>) -> Orchestrator {
    Orchestrator::new(
        store as Arc<dyn IntelStore>,
        Arc::new(StaticExtractor::new(candidates)),
    )
}

/// Analyze an article whose extraction yields `candidates` (from the
/// original text source).
pub async fn analyze(
    store: &Arc<SqliteStore>,
    article: &ArticleRecord,
    candidates: Vec<RawEntity>,
) -> tessera::AnalysisOutcome {
    orchestrator(store.clone(), candidates)
        .analyze(article, Some("article body"))
        .await
        .unwrap()
}

/// Extractor that fails transiently a fixed number of times, then succeeds.
pub struct FlakyExtractor {
    failures_left: AtomicU32,
    candidates: Vec<RawEntity>,
}

impl FlakyExtractor {
    pub fn new(failures: u32, candidates: Vec<RawEntity>) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            candidates,
        }
    }
}

#[async_trait]
impl EntityExtractor for FlakyExtractor {
    async fn extract(
        &self,
        _text: &str,
        source: ExtractionSource,
    ) -> Result<Vec<RawEntity>, AdapterError> {
        if source != ExtractionSource::Original {
            return Ok(Vec::new());
        }
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AdapterError::Transport("connection reset".into()));
        }
        Ok(self.candidates.clone())
    }
}

/// Extractor that always fails with a non-transient error.
pub struct BrokenExtractor;

#[async_trait]
impl EntityExtractor for BrokenExtractor {
    async fn extract(
        &self,
        _text: &str,
        _source: ExtractionSource,
    ) -> Result<Vec<RawEntity>, AdapterError> {
        Err(AdapterError::Backend("model rejected the request".into()))
    }
}

/// Embedder that returns a fixed vector per exact text, so tests can pin
/// cosine similarities precisely.
pub struct MapEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl MapEmbedder {
    pub fn new(vectors: HashMap<String, Vec<f32>>) -> Self {
        Self { vectors }
    }
}

#[async_trait]
impl Embedder for MapEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| AdapterError::Backend(format!("no vector for: {}", text)))
    }

    fn dimension(&self) -> usize {
        2
    }
}

/// Embedder that never answers within any reasonable deadline.
pub struct StalledEmbedder;

#[async_trait]
impl Embedder for StalledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, AdapterError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        unreachable!("embedding deadline should fire first")
    }

    fn dimension(&self) -> usize {
        2
    }
}
