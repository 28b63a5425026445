//! Embedding adapter — semantic similarity backend
//!
//! Uses a trait-based embedding backend (`Embedder`) so production code can
//! use fastembed-rs while tests use deterministic mock embedders. The
//! scorer treats embedding failure as "semantic signal unavailable", never
//! as a run failure, so every implementation here is allowed to be slow or
//! flaky — callers wrap it in a timeout.

use super::AdapterError;
use async_trait::async_trait;

/// Trait for embedding text into vectors.
///
/// Called only on an article's technical summary (bounded length), never on
/// full raw text. Implementations must return vectors of one fixed
/// dimensionality for the lifetime of the instance.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text into a fixed-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError>;

    /// The dimensionality every returned vector has.
    fn dimension(&self) -> usize;
}

/// Deterministic hashing embedder — the test/fallback path.
///
/// Projects character trigrams into a fixed-size vector with a simple FNV
/// hash. No semantic understanding, but identical text always produces the
/// identical vector and related texts share trigrams, which is enough for
/// reproducible tests and degraded operation without a model.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn fnv(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in bytes {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
        let mut vector = vec![0.0f32; self.dim];
        let lower = text.to_lowercase();
        let bytes = lower.as_bytes();
        if bytes.len() < 3 {
            return Ok(vector);
        }
        for window in bytes.windows(3) {
            let slot = (Self::fnv(window) % self.dim as u64) as usize;
            vector[slot] += 1.0;
        }
        // L2-normalize so cosine similarity is a plain dot product
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

// ---------------------------------------------------------------------------
// FastEmbedEmbedder — production embedder behind `embeddings` feature
// ---------------------------------------------------------------------------

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{AdapterError, Embedder};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Arc, Mutex};

    /// Production embedder backed by fastembed (ONNX Runtime).
    ///
    /// Wraps `fastembed::TextEmbedding` in a `Mutex` because its `embed`
    /// method requires `&mut self`, while the `Embedder` trait uses `&self`.
    /// Inference is blocking, so it runs on the blocking thread pool.
    pub struct FastEmbedEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
        dim: usize,
    }

    impl FastEmbedEmbedder {
        /// Create a new FastEmbedEmbedder with a specific model.
        pub fn new(model: EmbeddingModel, dim: usize) -> Result<Self, AdapterError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let embedding = TextEmbedding::try_new(options)
                .map_err(|e| AdapterError::Backend(e.to_string()))?;
            Ok(Self {
                model: Arc::new(Mutex::new(embedding)),
                dim,
            })
        }

        /// Create a new FastEmbedEmbedder with the default model
        /// (nomic-embed-text-v1.5, 768 dimensions).
        pub fn default_model() -> Result<Self, AdapterError> {
            Self::new(EmbeddingModel::NomicEmbedTextV15, 768)
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
            let model = Arc::clone(&self.model);
            let text = text.to_string();
            let mut vectors = tokio::task::spawn_blocking(move || {
                let mut model = model.lock().unwrap();
                model
                    .embed(vec![text], None)
                    .map_err(|e| AdapterError::Backend(e.to_string()))
            })
            .await
            .map_err(|e| AdapterError::Backend(format!("embedding task panicked: {}", e)))??;

            vectors
                .pop()
                .ok_or_else(|| AdapterError::Backend("embedding returned no results".into()))
        }

        fn dimension(&self) -> usize {
            self.dim
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basics() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);

        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 0.001);
    }

    #[test]
    fn cosine_similarity_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Emotet spam campaign").await.unwrap();
        let b = embedder.embed("Emotet spam campaign").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = embedder.embed("unrelated gardening article").await.unwrap();
        assert!(cosine_similarity(&a, &c) < cosine_similarity(&a, &b));
    }

    #[tokio::test]
    async fn hash_embedder_short_text_is_zero_vector() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed("ab").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
