//! Index store abstraction.
//!
//! The [`IndexStore`] trait defines every persistence operation the
//! pipeline needs, enabling pluggable backends: any engine supporting
//! nearest-neighbor search plus inverted-index keyword search satisfies
//! the contract. Implementations must be `Send + Sync`.
//!
//! Contract highlights:
//! - `upsert_entry` is transactional per chunk: the lexical posting and the
//!   vector become visible together or not at all.
//! - `replace_entries` supersedes a document's entries atomically.
//! - `search_lexical` / `search_vector` return an empty sequence for an
//!   empty index — never an error.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, ConversationTurn, Document, IndexEntry};

/// A candidate chunk returned from lexical or vector search.
///
/// Carries enough information for score normalization, fusion, tie-breaks,
/// and prompt assembly without further store round-trips.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub source_uri: String,
    pub sequence_index: i64,
    /// Raw score from the search backend (BM25-style rank or cosine
    /// similarity); normalized per result list during fusion.
    pub raw_score: f64,
    pub text: String,
}

/// Abstract storage backend for chunks, vectors, and audit turns.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or update a document record.
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    /// Look up a document by its source URI (used for supersede-on-reingest).
    async fn get_document(&self, source_uri: &str) -> Result<Option<Document>>;

    /// Atomically replace all of a document's index entries. Old entries
    /// (including their vectors and lexical postings) are removed in the
    /// same transaction that installs the new ones.
    async fn replace_entries(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Insert or update a single entry; lexical and vector representations
    /// become visible together or not at all.
    async fn upsert_entry(&self, entry: &IndexEntry) -> Result<()>;

    /// Remove a single entry (chunk, lexical posting, and vector).
    async fn delete_entry(&self, chunk_id: &str) -> Result<()>;

    /// Keyword search over lexical postings.
    async fn search_lexical(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;

    /// Nearest-neighbor search over stored vectors.
    async fn search_vector(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Chunks that have no vector under `model_id` or whose content changed
    /// since embedding (backfill source).
    async fn pending_embeddings(&self, model_id: &str) -> Result<Vec<Chunk>>;

    /// Append a conversation turn to the audit log.
    async fn log_turn(&self, turn: &ConversationTurn) -> Result<()>;

    /// Most recent audit turns, newest first.
    async fn recent_turns(&self, limit: usize) -> Result<Vec<ConversationTurn>>;
}
