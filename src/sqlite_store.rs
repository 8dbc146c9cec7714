//! SQLite-backed [`IndexStore`].
//!
//! Lexical postings live in an FTS5 virtual table (BM25 rank), vectors as
//! little-endian f32 BLOBs scanned with cosine similarity in Rust. Every
//! upsert runs in one transaction so a chunk's lexical and vector
//! representations become visible together or not at all.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use ragline_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragline_core::error::{PipelineError, Result};
use ragline_core::models::{Chunk, ConversationTurn, Document, IndexEntry, TokenSpan};
use ragline_core::store::{IndexStore, SearchHit};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_err(operation: &str) -> impl FnOnce(sqlx::Error) -> PipelineError + '_ {
    move |e| PipelineError::store(operation, e)
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    let token_start: i64 = row.get("token_start");
    let token_end: i64 = row.get("token_end");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        text: row.get("text"),
        token_span: TokenSpan {
            start: token_start as usize,
            end: token_end as usize,
        },
        sequence_index: row.get("sequence_index"),
        content_hash: row.get("content_hash"),
        metadata,
    }
}

async fn insert_entry_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entry: &IndexEntry,
) -> std::result::Result<(), sqlx::Error> {
    let chunk = &entry.chunk;
    let metadata_json =
        serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".to_string());

    sqlx::query(
        r#"
        INSERT INTO chunks (id, document_id, sequence_index, text, token_start, token_end, content_hash, metadata_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            text = excluded.text,
            token_start = excluded.token_start,
            token_end = excluded.token_end,
            content_hash = excluded.content_hash,
            metadata_json = excluded.metadata_json
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.document_id)
    .bind(chunk.sequence_index)
    .bind(&chunk.text)
    .bind(chunk.token_span.start as i64)
    .bind(chunk.token_span.end as i64)
    .bind(&chunk.content_hash)
    .bind(&metadata_json)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
        .bind(&chunk.id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.text)
        .execute(&mut **tx)
        .await?;

    match &entry.embedding {
        Some(embedding) => {
            let blob = vec_to_blob(&embedding.vector);
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, embedding, model, dims, content_hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    dims = excluded.dims,
                    content_hash = excluded.content_hash,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&blob)
            .bind(&embedding.model_id)
            .bind(embedding.vector.len() as i64)
            .bind(&chunk.content_hash)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut **tx)
            .await?;
        }
        None => {
            sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                .bind(&chunk.id)
                .execute(&mut **tx)
                .await?;
        }
    }

    Ok(())
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source_uri, mime_type, ingested_at, content_hash, version)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_uri) DO UPDATE SET
                mime_type = excluded.mime_type,
                ingested_at = excluded.ingested_at,
                content_hash = excluded.content_hash,
                version = excluded.version
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_uri)
        .bind(&doc.mime_type)
        .bind(doc.ingested_at.timestamp())
        .bind(&doc.content_hash)
        .bind(doc.version)
        .execute(&self.pool)
        .await
        .map_err(store_err("upsert_document"))?;
        Ok(())
    }

    async fn get_document(&self, source_uri: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, source_uri, mime_type, ingested_at, content_hash, version FROM documents WHERE source_uri = ?",
        )
        .bind(source_uri)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("get_document"))?;

        Ok(row.map(|r| {
            let ingested_at: i64 = r.get("ingested_at");
            Document {
                id: r.get("id"),
                source_uri: r.get("source_uri"),
                mime_type: r.get("mime_type"),
                ingested_at: chrono::DateTime::from_timestamp(ingested_at, 0)
                    .unwrap_or_else(chrono::Utc::now),
                content_hash: r.get("content_hash"),
                version: r.get("version"),
            }
        }))
    }

    async fn replace_entries(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_err("replace_entries"))?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err("replace_entries"))?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err("replace_entries"))?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err("replace_entries"))?;

        for entry in entries {
            insert_entry_tx(&mut tx, entry)
                .await
                .map_err(store_err("replace_entries"))?;
        }

        tx.commit().await.map_err(store_err("replace_entries"))?;
        Ok(())
    }

    async fn upsert_entry(&self, entry: &IndexEntry) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err("upsert_entry"))?;
        insert_entry_tx(&mut tx, entry)
            .await
            .map_err(store_err("upsert_entry"))?;
        tx.commit().await.map_err(store_err("upsert_entry"))?;
        Ok(())
    }

    async fn delete_entry(&self, chunk_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err("delete_entry"))?;
        for stmt in [
            "DELETE FROM chunk_vectors WHERE chunk_id = ?",
            "DELETE FROM chunks_fts WHERE chunk_id = ?",
            "DELETE FROM chunks WHERE id = ?",
        ] {
            sqlx::query(stmt)
                .bind(chunk_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err("delete_entry"))?;
        }
        tx.commit().await.map_err(store_err("delete_entry"))?;
        Ok(())
    }

    async fn search_lexical(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT f.chunk_id, f.document_id, f.rank,
                   c.sequence_index, c.text,
                   d.source_uri
            FROM chunks_fts f
            JOIN chunks c ON c.id = f.chunk_id
            JOIN documents d ON d.id = f.document_id
            WHERE chunks_fts MATCH ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("search_lexical"))?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    source_uri: row.get("source_uri"),
                    sequence_index: row.get("sequence_index"),
                    // BM25 rank is "lower is better"; negate so higher = better.
                    raw_score: -rank,
                    text: row.get("text"),
                }
            })
            .collect())
    }

    async fn search_vector(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            r#"
            SELECT v.chunk_id, v.document_id, v.embedding,
                   c.sequence_index, c.text,
                   d.source_uri
            FROM chunk_vectors v
            JOIN chunks c ON c.id = v.chunk_id
            JOIN documents d ON d.id = v.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("search_vector"))?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    source_uri: row.get("source_uri"),
                    sequence_index: row.get("sequence_index"),
                    raw_score: cosine_similarity(query_vec, &vector) as f64,
                    text: row.get("text"),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn pending_embeddings(&self, model_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.sequence_index, c.text,
                   c.token_start, c.token_end, c.content_hash, c.metadata_json
            FROM chunks c
            LEFT JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE v.chunk_id IS NULL
               OR v.model != ?
               OR v.content_hash != c.content_hash
            ORDER BY c.document_id, c.sequence_index
            "#,
        )
        .bind(model_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("pending_embeddings"))?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn log_turn(&self, turn: &ConversationTurn) -> Result<()> {
        let chunk_ids = serde_json::to_string(&turn.retrieved_chunk_ids)
            .unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            r#"
            INSERT INTO conversation_turns
                (id, query, retrieved_chunk_ids, prompt_text, answer_text, model_id, latency_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&turn.id)
        .bind(&turn.query)
        .bind(&chunk_ids)
        .bind(&turn.prompt_text)
        .bind(&turn.answer_text)
        .bind(&turn.model_id)
        .bind(turn.latency_ms)
        .bind(turn.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err("log_turn"))?;
        Ok(())
    }

    async fn recent_turns(&self, limit: usize) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, query, retrieved_chunk_ids, prompt_text, answer_text, model_id, latency_ms, created_at
            FROM conversation_turns
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("recent_turns"))?;

        Ok(rows
            .iter()
            .map(|row| {
                let chunk_ids: String = row.get("retrieved_chunk_ids");
                let created_at: i64 = row.get("created_at");
                ConversationTurn {
                    id: row.get("id"),
                    query: row.get("query"),
                    retrieved_chunk_ids: serde_json::from_str(&chunk_ids).unwrap_or_default(),
                    prompt_text: row.get("prompt_text"),
                    answer_text: row.get("answer_text"),
                    model_id: row.get("model_id"),
                    latency_ms: row.get("latency_ms"),
                    created_at: chrono::DateTime::from_timestamp(created_at, 0)
                        .unwrap_or_else(chrono::Utc::now),
                }
            })
            .collect())
    }
}
