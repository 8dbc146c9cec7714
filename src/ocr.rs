//! Pluggable OCR backend for image documents.
//!
//! Text recognition is delegated to an external extraction service over
//! HTTP; the pipeline itself never bundles an OCR engine. When no endpoint
//! is configured, image ingestion is rejected with a descriptive error.

use async_trait::async_trait;
use base64::Engine as _;
use std::time::Duration;

use ragline_core::error::{PipelineError, Result};

use crate::config::ParserConfig;

/// Text recognition over raster images.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, bytes: &[u8], mime_type: &str) -> Result<String>;
}

/// Used when `parser.ocr_endpoint` is not configured. Any attempt to OCR
/// an image fails with a descriptive error.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn recognize(&self, _bytes: &[u8], mime_type: &str) -> Result<String> {
        Err(PipelineError::Ocr {
            detail: format!(
                "no OCR backend configured; cannot extract text from {}",
                mime_type
            ),
        })
    }
}

/// HTTP extraction service: the image is posted base64-encoded and the
/// service answers with the recognized plain text.
pub struct RemoteOcr {
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteOcr {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Ocr {
                detail: e.to_string(),
            })?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl OcrEngine for RemoteOcr {
    async fn recognize(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        let body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(bytes),
            "mime_type": mime_type,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Ocr {
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Ocr {
                detail: format!("extraction service returned {}: {}", status, text),
            });
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| PipelineError::Ocr {
            detail: e.to_string(),
        })?;

        json.get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| PipelineError::Ocr {
                detail: "extraction service response missing 'text'".to_string(),
            })
    }
}

/// Instantiate the OCR engine selected by configuration.
pub fn create_ocr(config: &ParserConfig) -> Result<Box<dyn OcrEngine>> {
    match &config.ocr_endpoint {
        Some(endpoint) => Ok(Box::new(RemoteOcr::new(
            endpoint,
            Duration::from_secs(config.ocr_timeout_secs),
        )?)),
        None => Ok(Box::new(DisabledOcr)),
    }
}
