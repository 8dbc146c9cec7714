//! Concurrent hybrid retrieval.
//!
//! Lexical and vector searches run concurrently with no ordering
//! dependency; their results are fused only after both complete. A single
//! failing source degrades to the survivor's ranking — that tolerance is
//! load-bearing, not incidental. Only when both sources fail does the call
//! surface `RetrievalUnavailable`.

use std::sync::Arc;

use tracing::{debug, warn};

use ragline_core::embedding::Embedder;
use ragline_core::error::{PipelineError, Result};
use ragline_core::fuse::{fuse, FusionWeights};
use ragline_core::models::RetrievalResult;
use ragline_core::store::{IndexStore, SearchHit};

#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub weights: FusionWeights,
    pub candidate_k_lexical: usize,
    pub candidate_k_vector: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            candidate_k_lexical: 80,
            candidate_k_vector: 80,
        }
    }
}

pub struct Retriever {
    store: Arc<dyn IndexStore>,
    embedder: Option<Embedder>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Option<Embedder>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    /// Run the hybrid query and fuse the results down to `k` chunks.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        if query.trim().is_empty() {
            return Ok(RetrievalResult::empty(query));
        }

        let lexical_fut = self
            .store
            .search_lexical(query, self.params.candidate_k_lexical);
        let semantic_fut = self.semantic_search(query);

        // Independent sources; fused only after both complete.
        let (lexical, semantic) = tokio::join!(lexical_fut, semantic_fut);

        let (lexical_hits, semantic_hits) = match (lexical, semantic) {
            (Ok(l), Ok(s)) => (l, s),
            (Ok(l), Err(err)) => {
                warn!(error = %err, "semantic search failed; degrading to lexical ranking");
                (l, Vec::new())
            }
            (Err(err), Ok(s)) => {
                warn!(error = %err, "lexical search failed; degrading to semantic ranking");
                (Vec::new(), s)
            }
            (Err(lexical_err), Err(semantic_err)) => {
                return Err(PipelineError::RetrievalUnavailable {
                    lexical: lexical_err.to_string(),
                    semantic: semantic_err.to_string(),
                });
            }
        };

        let chunks = fuse(&lexical_hits, &semantic_hits, self.params.weights, k);
        debug!(
            lexical = lexical_hits.len(),
            semantic = semantic_hits.len(),
            fused = chunks.len(),
            "retrieval complete"
        );

        Ok(RetrievalResult {
            query: query.to_string(),
            chunks,
        })
    }

    async fn semantic_search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            PipelineError::invalid_config("embedding.provider", "embedding is disabled")
        })?;
        let query_vec = embedder.embed_query(query).await?;
        self.store
            .search_vector(&query_vec, self.params.candidate_k_vector)
            .await
    }
}
