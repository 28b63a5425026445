//! External collaborator boundaries
//!
//! The extraction model and the embedding model live outside this crate;
//! these modules define the contracts they must satisfy plus deterministic
//! implementations for tests and degraded operation.

pub mod embedding;
pub mod extraction;

use thiserror::Error;

/// Errors crossing an adapter boundary.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network or transport failure — retryable with backoff
    #[error("transport failure: {0}")]
    Transport(String),

    /// The adapter did not answer within the configured deadline
    #[error("adapter timed out after {0}ms")]
    Timeout(u64),

    /// The backend answered but the response was unusable
    #[error("backend error: {0}")]
    Backend(String),
}

impl AdapterError {
    /// Whether retrying the same call can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

pub use embedding::{cosine_similarity, Embedder, HashEmbedder};
pub use extraction::{EntityExtractor, StaticExtractor};

#[cfg(feature = "embeddings")]
pub use embedding::FastEmbedEmbedder;
