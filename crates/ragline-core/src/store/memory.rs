//! In-memory [`IndexStore`] for tests and embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity; lexical search scores by
//! matched query terms.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{Chunk, ConversationTurn, Document, IndexEntry};

use super::{IndexStore, SearchHit};

/// In-memory index store.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    entries: RwLock<HashMap<String, IndexEntry>>,
    turns: RwLock<Vec<ConversationTurn>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn hit_for(&self, entry: &IndexEntry, raw_score: f64) -> SearchHit {
        let source_uri = self
            .docs
            .read()
            .unwrap()
            .get(&entry.chunk.document_id)
            .map(|d| d.source_uri.clone())
            .unwrap_or_default();
        SearchHit {
            chunk_id: entry.chunk.id.clone(),
            document_id: entry.chunk.document_id.clone(),
            source_uri,
            sequence_index: entry.chunk.sequence_index,
            raw_score,
            text: entry.chunk.text.clone(),
        }
    }

    /// Number of stored entries (test helper).
    pub fn entry_count(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

fn sort_and_truncate(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);
    hits
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.docs
            .write()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, source_uri: &str) -> Result<Option<Document>> {
        Ok(self
            .docs
            .read()
            .unwrap()
            .values()
            .find(|d| d.source_uri == source_uri)
            .cloned())
    }

    async fn replace_entries(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut stored = self.entries.write().unwrap();
        stored.retain(|_, e| e.chunk.document_id != document_id);
        for entry in entries {
            stored.insert(entry.chunk.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn upsert_entry(&self, entry: &IndexEntry) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(entry.chunk.id.clone(), entry.clone());
        Ok(())
    }

    async fn delete_entry(&self, chunk_id: &str) -> Result<()> {
        self.entries.write().unwrap().remove(chunk_id);
        Ok(())
    }

    async fn search_lexical(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let hits: Vec<SearchHit> = {
            let entries = self.entries.read().unwrap();
            entries
                .values()
                .filter_map(|entry| {
                    let text_lower = entry.chunk.text.to_lowercase();
                    let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                    (matches > 0).then(|| (entry.clone(), matches as f64))
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|(entry, score)| self.hit_for(&entry, score))
                .collect()
        };

        Ok(sort_and_truncate(hits, k))
    }

    async fn search_vector(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let hits: Vec<SearchHit> = {
            let entries = self.entries.read().unwrap();
            entries
                .values()
                .filter_map(|entry| {
                    entry.embedding.as_ref().map(|emb| {
                        let sim = cosine_similarity(query_vec, &emb.vector) as f64;
                        (entry.clone(), sim)
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|(entry, score)| self.hit_for(&entry, score))
                .collect()
        };

        Ok(sort_and_truncate(hits, k))
    }

    async fn pending_embeddings(&self, model_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .values()
            .filter(|e| match &e.embedding {
                None => true,
                Some(emb) => emb.model_id != model_id,
            })
            .map(|e| e.chunk.clone())
            .collect())
    }

    async fn log_turn(&self, turn: &ConversationTurn) -> Result<()> {
        self.turns.write().unwrap().push(turn.clone());
        Ok(())
    }

    async fn recent_turns(&self, limit: usize) -> Result<Vec<ConversationTurn>> {
        let turns = self.turns.read().unwrap();
        Ok(turns.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Embedding, TokenSpan};
    use chrono::Utc;

    fn doc(id: &str, uri: &str) -> Document {
        Document {
            id: id.to_string(),
            source_uri: uri.to_string(),
            mime_type: "text/plain".to_string(),
            ingested_at: Utc::now(),
            content_hash: "h".to_string(),
            version: 1,
        }
    }

    fn entry(chunk_id: &str, doc_id: &str, seq: i64, text: &str, vector: Option<Vec<f32>>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: chunk_id.to_string(),
                document_id: doc_id.to_string(),
                text: text.to_string(),
                token_span: TokenSpan { start: 0, end: 1 },
                sequence_index: seq,
                content_hash: format!("hash-{}", chunk_id),
                metadata: serde_json::Map::new(),
            },
            embedding: vector.map(|v| Embedding {
                chunk_id: chunk_id.to_string(),
                vector: v,
                model_id: "m1".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn empty_index_searches_return_empty_not_error() {
        let store = MemoryStore::new();
        assert!(store.search_lexical("anything", 5).await.unwrap().is_empty());
        assert!(store.search_vector(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_entries_supersedes_old_chunks() {
        let store = MemoryStore::new();
        store.upsert_document(&doc("d1", "file:///a")).await.unwrap();
        store
            .replace_entries("d1", &[entry("c1", "d1", 0, "old text", None)])
            .await
            .unwrap();
        store
            .replace_entries("d1", &[entry("c2", "d1", 0, "new text", None)])
            .await
            .unwrap();
        assert_eq!(store.entry_count(), 1);
        let hits = store.search_lexical("text", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c2");
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine() {
        let store = MemoryStore::new();
        store.upsert_document(&doc("d1", "file:///a")).await.unwrap();
        store
            .upsert_entry(&entry("c1", "d1", 0, "a", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        store
            .upsert_entry(&entry("c2", "d1", 1, "b", Some(vec![0.0, 1.0])))
            .await
            .unwrap();
        let hits = store.search_vector(&[1.0, 0.1], 10).await.unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].raw_score > hits[1].raw_score);
    }

    #[tokio::test]
    async fn pending_embeddings_tracks_model_changes() {
        let store = MemoryStore::new();
        store
            .upsert_entry(&entry("c1", "d1", 0, "a", Some(vec![1.0])))
            .await
            .unwrap();
        store
            .upsert_entry(&entry("c2", "d1", 1, "b", None))
            .await
            .unwrap();
        let pending = store.pending_embeddings("m1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "c2");
        // Under a different model, everything is stale.
        let pending = store.pending_embeddings("m2").await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn turns_are_append_only_and_recent_first() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .log_turn(&ConversationTurn {
                    id: format!("t{}", i),
                    query: "q".to_string(),
                    retrieved_chunk_ids: vec![],
                    prompt_text: "p".to_string(),
                    answer_text: "a".to_string(),
                    model_id: "m".to_string(),
                    latency_ms: 1,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let recent = store.recent_turns(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "t2");
    }
}
