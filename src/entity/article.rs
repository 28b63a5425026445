//! The pipeline's minimal view of an article
//!
//! Feed ingestion and the full article schema live in the surrounding
//! product; the pipeline persists only what candidate generation and
//! embedding need.

use super::ids::ArticleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An article as the association pipeline sees it.
///
/// The original full text is intentionally absent: it is handed to
/// `analyze()` by value at ingest time and never stored or embedded here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: ArticleId,
    pub title: String,
    pub published_at: DateTime<Utc>,
    /// Short analyst-facing summary (extraction input only)
    #[serde(default)]
    pub executive_summary: Option<String>,
    /// Bounded technical summary — the only text ever embedded
    #[serde(default)]
    pub technical_summary: Option<String>,
}

impl ArticleRecord {
    pub fn new(
        id: ArticleId,
        title: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            published_at,
            executive_summary: None,
            technical_summary: None,
        }
    }

    pub fn with_executive_summary(mut self, text: impl Into<String>) -> Self {
        self.executive_summary = Some(text.into());
        self
    }

    pub fn with_technical_summary(mut self, text: impl Into<String>) -> Self {
        self.technical_summary = Some(text.into());
        self
    }
}
