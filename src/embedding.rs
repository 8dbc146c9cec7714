//! HTTP embedding backend (OpenAI-compatible `/v1/embeddings`).
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 413 → the batch itself is too large; surfaced as
//!   resource exhaustion so the caller can retry with a smaller batch
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use ragline_core::embedding::{Embedder, EmbeddingBackend};
use ragline_core::error::{PipelineError, Result};

use crate::config::EmbeddingConfig;

/// OpenAI-compatible embedding client.
pub struct HttpEmbeddingBackend {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpEmbeddingBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            PipelineError::invalid_config("embedding.model", "required when provider is enabled")
        })?;
        let dims = config.dims.ok_or_else(|| {
            PipelineError::invalid_config("embedding.dims", "required when provider is enabled")
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::EmbeddingBackend {
                model_id: model.clone(),
                detail: e.to_string(),
                retryable: false,
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).ok(),
            model,
            dims,
            max_retries: config.max_retries,
            client,
        })
    }

    fn backend_err(&self, detail: impl std::fmt::Display, retryable: bool) -> PipelineError {
        PipelineError::EmbeddingBackend {
            model_id: self.model.clone(),
            detail: detail.to_string(),
            retryable,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying embedding call");
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| self.backend_err(e, false))?;
                        return parse_embeddings_response(&json, &self.model);
                    }

                    if status.as_u16() == 413 {
                        return Err(PipelineError::EmbeddingBatchExceeded { size: texts.len() });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err =
                            Some(self.backend_err(format!("{}: {}", status, body_text), true));
                        continue;
                    }

                    // Client error (not 429/413) — don't retry.
                    return Err(self.backend_err(format!("{}: {}", status, body_text), false));
                }
                Err(e) => {
                    last_err = Some(self.backend_err(e, true));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| self.backend_err("embedding failed after retries", true)))
    }
}

/// Extract `data[].embedding` vectors, ordered by the response's `index`
/// field so output order always matches input order.
fn parse_embeddings_response(json: &serde_json::Value, model: &str) -> Result<Vec<Vec<f32>>> {
    let invalid = |detail: &str| PipelineError::EmbeddingBackend {
        model_id: model.to_string(),
        detail: detail.to_string(),
        retryable: false,
    };

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("response missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("response item missing embedding"))?;
        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Build the batching [`Embedder`] selected by configuration, or `None`
/// when embeddings are disabled (lexical-only operation).
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Embedder>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    let backend = Arc::new(HttpEmbeddingBackend::new(config)?);
    Ok(Some(Embedder::new(backend, config.batch_size)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_ordered_by_index_field() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 2.0] },
                { "index": 0, "embedding": [1.0, 1.0] },
            ]
        });
        let vectors = parse_embeddings_response(&json, "m").unwrap();
        assert_eq!(vectors[0], vec![1.0, 1.0]);
        assert_eq!(vectors[1], vec![2.0, 2.0]);
    }

    #[test]
    fn malformed_response_is_an_error() {
        let json = serde_json::json!({ "unexpected": true });
        assert!(parse_embeddings_response(&json, "m").is_err());
    }

    #[test]
    fn disabled_provider_builds_no_embedder() {
        let config = EmbeddingConfig::default();
        assert!(create_embedder(&config).unwrap().is_none());
    }
}
