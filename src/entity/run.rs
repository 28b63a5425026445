//! Extraction run audit records

use super::ids::{ArticleId, RunId};
use super::types::ExtractionSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created at start, overwritten on finalization
    Running,
    Succeeded,
    /// Some candidates were dropped as malformed but the run completed
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of one pipeline pass over an article.
///
/// Created when the orchestrator leaves `PENDING`, finalized exactly once,
/// immutable afterwards. A new run for the same article supersedes but
/// never deletes the previous run's links — canonicalization upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRun {
    pub id: RunId,
    pub article_id: ArticleId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Links produced (resolved entities, not raw candidates)
    pub entity_count: u32,
    /// Which article texts fed extraction
    pub sources: Vec<ExtractionSource>,
    /// Structured code for operators when status is `Failed`
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}
