//! Ingestion pipeline orchestration.
//!
//! Coordinates parse → chunk → embed → index for each document. Documents
//! are independent: failures are reported per document and the rest of the
//! batch continues; multiple documents run concurrently with a bounded
//! buffer. Inline embedding is non-fatal — a chunk whose vector could not
//! be produced is indexed lexically and left for `rgl embed pending`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ragline_core::chunk::{chunk_blocks, ChunkerConfig};
use ragline_core::embedding::Embedder;
use ragline_core::error::{PipelineError, Result};
use ragline_core::models::{
    Document, Embedding, IndexEntry, IngestReceipt, IngestStatus,
};
use ragline_core::store::IndexStore;

use crate::extract;
use crate::ocr::OcrEngine;

/// One raw document handed to the pipeline by an ingestion trigger.
#[derive(Debug, Clone)]
pub struct IngestInput {
    pub source_uri: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// How many documents are processed concurrently.
const DEFAULT_CONCURRENCY: usize = 4;

pub struct IngestPipeline {
    store: Arc<dyn IndexStore>,
    embedder: Option<Embedder>,
    ocr: Arc<dyn OcrEngine>,
    chunker: ChunkerConfig,
    concurrency: usize,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Option<Embedder>,
        ocr: Arc<dyn OcrEngine>,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            ocr,
            chunker,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Ingest a batch of documents. Per-document failures become
    /// `Rejected` receipts; the batch itself never fails.
    pub async fn ingest_all(&self, inputs: Vec<IngestInput>) -> Vec<IngestReceipt> {
        futures::stream::iter(inputs)
            .map(|input| self.ingest_one(input))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Ingest one document, mapping any pipeline error onto a rejection
    /// receipt.
    pub async fn ingest_one(&self, input: IngestInput) -> IngestReceipt {
        match self.process(&input).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(source_uri = %input.source_uri, error = %err, "document rejected");
                IngestReceipt::rejected(&input.source_uri, err.to_string())
            }
        }
    }

    async fn process(&self, input: &IngestInput) -> Result<IngestReceipt> {
        let blocks = extract::parse(&input.bytes, &input.mime_type, self.ocr.as_ref()).await?;

        let mut hasher = Sha256::new();
        hasher.update(&input.bytes);
        let content_hash = format!("{:x}", hasher.finalize());

        // Re-ingesting a known source URI supersedes the prior version:
        // same document id, replaced entries, version bumped when the
        // content actually changed.
        let existing = self.store.get_document(&input.source_uri).await?;
        let (doc_id, version) = match &existing {
            Some(doc) if doc.content_hash == content_hash => (doc.id.clone(), doc.version),
            Some(doc) => (doc.id.clone(), doc.version + 1),
            None => (Uuid::new_v4().to_string(), 1),
        };

        let chunks = chunk_blocks(&doc_id, &blocks, &self.chunker)?;
        if chunks.is_empty() {
            return Err(PipelineError::CorruptInput {
                mime_type: input.mime_type.clone(),
                detail: "no extractable text".to_string(),
            });
        }

        let vectors = match &self.embedder {
            Some(embedder) => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                match embedder.embed_batch(&texts).await {
                    Ok(vectors) => {
                        let model_id = embedder.model_id().to_string();
                        vectors
                            .into_iter()
                            .zip(chunks.iter())
                            .map(|(vector, chunk)| {
                                Some(Embedding {
                                    chunk_id: chunk.id.clone(),
                                    vector,
                                    model_id: model_id.clone(),
                                })
                            })
                            .collect()
                    }
                    Err(err) => {
                        warn!(
                            source_uri = %input.source_uri,
                            error = %err,
                            "inline embedding failed; chunks left pending"
                        );
                        vec![None; chunks.len()]
                    }
                }
            }
            None => vec![None; chunks.len()],
        };

        let embedded = vectors.iter().filter(|v| v.is_some()).count();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        let document = Document {
            id: doc_id.clone(),
            source_uri: input.source_uri.clone(),
            mime_type: input.mime_type.clone(),
            ingested_at: chrono::Utc::now(),
            content_hash,
            version,
        };

        self.store.upsert_document(&document).await?;
        self.store.replace_entries(&doc_id, &entries).await?;

        debug!(
            source_uri = %input.source_uri,
            document_id = %doc_id,
            chunks = entries.len(),
            embedded,
            version,
            "document ingested"
        );

        Ok(IngestReceipt {
            document_id: doc_id,
            source_uri: input.source_uri.clone(),
            status: IngestStatus::Accepted,
            chunks: entries.len(),
            embedded,
        })
    }

    /// Backfill vectors for chunks that have none under the current model
    /// or whose content changed since embedding. Returns the number of
    /// chunks embedded.
    pub async fn embed_pending(&self) -> Result<usize> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            PipelineError::invalid_config("embedding.provider", "embedding is disabled")
        })?;

        let pending = self.store.pending_embeddings(embedder.model_id()).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!(count = pending.len(), "embedding pending chunks");

        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        let model_id = embedder.model_id().to_string();

        let mut embedded = 0usize;
        for (chunk, vector) in pending.into_iter().zip(vectors) {
            let entry = IndexEntry {
                embedding: Some(Embedding {
                    chunk_id: chunk.id.clone(),
                    vector,
                    model_id: model_id.clone(),
                }),
                chunk,
            };
            self.store.upsert_entry(&entry).await?;
            embedded += 1;
        }
        Ok(embedded)
    }
}

/// Map a file extension to the MIME type the parser understands.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some(extract::MIME_TEXT),
        "md" | "markdown" => Some(extract::MIME_MARKDOWN),
        "pdf" => Some(extract::MIME_PDF),
        "docx" => Some(extract::MIME_DOCX),
        "html" | "htm" => Some(extract::MIME_HTML),
        "png" => Some(extract::MIME_PNG),
        "jpg" | "jpeg" => Some(extract::MIME_JPEG),
        "tif" | "tiff" => Some(extract::MIME_TIFF),
        _ => None,
    }
}

/// Expand CLI path arguments (files or directories) into ingest inputs.
/// Files with unrecognized extensions are skipped with a warning.
pub fn collect_inputs(paths: &[PathBuf]) -> anyhow::Result<Vec<IngestInput>> {
    let mut inputs = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in walkdir::WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                push_input(&mut inputs, entry.path())?;
            }
        } else {
            push_input(&mut inputs, path)?;
        }
    }
    Ok(inputs)
}

fn push_input(inputs: &mut Vec<IngestInput>, path: &Path) -> anyhow::Result<()> {
    let Some(mime_type) = mime_for_path(path) else {
        warn!(path = %path.display(), "skipping file with unrecognized extension");
        return Ok(());
    };
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    inputs.push(IngestInput {
        source_uri: format!("file://{}", path.display()),
        mime_type: mime_type.to_string(),
        bytes,
    });
    Ok(())
}
