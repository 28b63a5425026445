//! Entity extraction adapter — the LLM boundary
//!
//! The model provider that turns article text into raw entity candidates is
//! a black box to the pipeline. This module defines the contract plus a
//! deterministic fixed-output implementation used by tests and by callers
//! (like the CLI) that receive pre-extracted candidates from the
//! surrounding product.

use super::AdapterError;
use crate::entity::{ExtractionSource, RawEntity};
use async_trait::async_trait;
use std::collections::HashMap;

/// Contract for extraction backends.
///
/// Implementations must tolerate malformed or empty text (return an empty
/// list) and error only on transport failure. The pipeline does its own
/// validation of candidate values; extractors are free to return noise.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    /// Extract raw entity candidates from one article text.
    async fn extract(
        &self,
        text: &str,
        source: ExtractionSource,
    ) -> Result<Vec<RawEntity>, AdapterError>;
}

/// Extractor that replays a fixed candidate set, routed by source.
///
/// Each candidate is returned only for the source it was tagged with, so
/// one logical extraction is not triplicated across the original and
/// summary passes.
#[derive(Debug, Default)]
pub struct StaticExtractor {
    per_source: HashMap<ExtractionSource, Vec<RawEntity>>,
}

impl StaticExtractor {
    pub fn new(candidates: Vec<RawEntity>) -> Self {
        let mut per_source: HashMap<ExtractionSource, Vec<RawEntity>> = HashMap::new();
        for candidate in candidates {
            per_source.entry(candidate.source).or_default().push(candidate);
        }
        Self { per_source }
    }
}

#[async_trait]
impl EntityExtractor for StaticExtractor {
    async fn extract(
        &self,
        _text: &str,
        source: ExtractionSource,
    ) -> Result<Vec<RawEntity>, AdapterError> {
        Ok(self.per_source.get(&source).cloned().unwrap_or_default())
    }
}
