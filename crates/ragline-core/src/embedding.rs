//! Embedding backend trait, batching wrapper, and vector utilities.
//!
//! The [`EmbeddingBackend`] trait is the pluggable seam for embedding
//! providers; the [`Embedder`] wrapper adds internal batching with strict
//! order, length, and dimensionality checks. A sub-batch failure fails the
//! whole call — the caller decides whether to retry with a smaller batch.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};

/// Pluggable embedding provider.
///
/// Implementations must be idempotent: the same text under the same
/// `model_id` yields the same vector (within the backend's documented
/// numeric tolerance).
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-3-small"`. A changed model
    /// id invalidates previously stored vectors.
    fn model_id(&self) -> &str;

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input, in input
    /// order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Batching front-end over an [`EmbeddingBackend`].
///
/// Splits large inputs into sub-batches of at most `max_batch_size` to
/// bound memory and per-call overhead. Batching is an internal
/// optimization, not an ordering guarantee visible to callers beyond
/// "output order matches input order".
#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    max_batch_size: usize,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model_id", &self.backend.model_id())
            .field("dims", &self.backend.dims())
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, max_batch_size: usize) -> Result<Self> {
        if max_batch_size == 0 {
            return Err(PipelineError::invalid_config(
                "embedding.batch_size",
                "must be > 0",
            ));
        }
        Ok(Self {
            backend,
            max_batch_size,
        })
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    /// Embed a batch of texts. Any sub-batch failure fails the whole call;
    /// there is no silent truncation.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch_size) {
            let vectors = self.backend.embed(batch).await?;
            if vectors.len() != batch.len() {
                return Err(PipelineError::EmbeddingBackend {
                    model_id: self.backend.model_id().to_string(),
                    detail: format!(
                        "backend returned {} vectors for {} inputs",
                        vectors.len(),
                        batch.len()
                    ),
                    retryable: false,
                });
            }
            for vector in &vectors {
                if vector.len() != self.backend.dims() {
                    return Err(PipelineError::DimensionMismatch {
                        expected: self.backend.dims(),
                        actual: vector.len(),
                    });
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed a single query text with the same model and dimensionality as
    /// chunk embedding.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| PipelineError::EmbeddingBackend {
            model_id: self.backend.model_id().to_string(),
            detail: "empty embedding response".to_string(),
            retryable: false,
        })
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
