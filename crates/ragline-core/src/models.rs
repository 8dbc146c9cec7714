//! Core data models for the ragline pipeline.
//!
//! These types represent the documents, chunks, embeddings, and answers that
//! flow through the ingestion and query paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source document registered with the pipeline.
///
/// Raw bytes are transient: they are passed through the ingestion call and
/// never stored on this struct. Re-ingesting the same `source_uri` supersedes
/// the previous version (same id, bumped `version`, replaced chunks) rather
/// than mutating it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_uri: String,
    pub mime_type: String,
    pub ingested_at: DateTime<Utc>,
    /// SHA-256 of the raw input bytes, used to detect unchanged re-ingestion.
    pub content_hash: String,
    pub version: i64,
}

/// A unit of parser output: one contiguous span of extracted text plus the
/// structural position it came from.
///
/// Blocks preserve reading order; the chunker uses block boundaries as the
/// structural breaks it is allowed to split on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub text: String,
    pub page: Option<u32>,
    pub section: Option<String>,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page: None,
            section: None,
        }
    }
}

/// Half-open token range `[start, end)` into a document's normalized token
/// sequence. Adjacent chunks overlap where `next.start < prev.end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

impl TokenSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A bounded span of a document's text, the unit of retrieval.
///
/// The id is a UUIDv5 derived from `(document_id, sequence_index)`, so
/// re-chunking unchanged input yields identical identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub token_span: TokenSpan,
    pub sequence_index: i64,
    /// SHA-256 of `text`, used for embedding staleness detection.
    pub content_hash: String,
    /// Structural metadata (page number, section heading) of the position
    /// where the chunk starts.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A dense vector for one chunk under one embedding model.
///
/// A changed `model_id` invalidates the vector: there is exactly one live
/// embedding per `(chunk, model_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model_id: String,
}

/// The persisted union of a chunk's lexical text and its (optional) vector,
/// keyed by chunk id. Removed transactionally with its chunk.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Option<Embedding>,
}

/// Which retrieval source produced (or contributed to) a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultOrigin {
    Lexical,
    Semantic,
    Fused,
}

/// One ranked entry of a [`RetrievalResult`].
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_uri: String,
    pub sequence_index: i64,
    pub score: f64,
    pub origin: ResultOrigin,
    pub text: String,
}

/// Immutable per-query snapshot of fused retrieval output. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            chunks: Vec::new(),
        }
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk_id.clone()).collect()
    }
}

/// Why the generation backend stopped producing text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
    Other(String),
}

/// Token accounting reported by the generation backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed generation.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// Append-only audit record of one query-path invocation. Never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub query: String,
    pub retrieved_chunk_ids: Vec<String>,
    pub prompt_text: String,
    pub answer_text: String,
    pub model_id: String,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of ingesting a single document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum IngestStatus {
    Accepted,
    Rejected { reason: String },
}

/// Per-document reply to an ingestion trigger.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub document_id: String,
    pub source_uri: String,
    pub status: IngestStatus,
    /// Number of chunks written to the index.
    pub chunks: usize,
    /// Number of chunks that received a vector inline. Chunks without one
    /// stay lexically searchable and are picked up by the embedding backfill.
    pub embedded: usize,
}

impl IngestReceipt {
    pub fn rejected(source_uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            document_id: String::new(),
            source_uri: source_uri.into(),
            status: IngestStatus::Rejected {
                reason: reason.into(),
            },
            chunks: 0,
            embedded: 0,
        }
    }
}
