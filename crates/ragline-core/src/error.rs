//! Unified error type for the pipeline.
//!
//! Every failure a caller can observe maps onto one of four kinds:
//! input errors (caller's fault, never retried), transient backend
//! unavailability (retried where the component contract says so),
//! resource exhaustion, and deadline expiry. The query endpoint renders
//! messages from `kind()` + `retryable()` without re-deriving internal
//! state.

use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Coarse failure classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed document, template, or configuration. Not retried.
    InputError,
    /// A backend (embedding, index store, generation, OCR) failed
    /// transiently.
    BackendUnavailable,
    /// A batch or token budget was exceeded.
    ResourceExhausted,
    /// A deadline elapsed before the operation completed.
    Timeout,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported format: {mime_type}")]
    UnsupportedFormat { mime_type: String },

    #[error("corrupt input ({mime_type}): {detail}")]
    CorruptInput { mime_type: String, detail: String },

    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("OCR backend error: {detail}")]
    Ocr { detail: String },

    #[error("embedding backend ({model_id}): {detail}")]
    EmbeddingBackend {
        model_id: String,
        detail: String,
        retryable: bool,
    },

    #[error("embedding batch of {size} texts exceeds backend limits")]
    EmbeddingBatchExceeded { size: usize },

    #[error("embedding dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index store {operation} failed: {detail}")]
    IndexStore { operation: String, detail: String },

    #[error("retrieval unavailable (lexical: {lexical}; semantic: {semantic})")]
    RetrievalUnavailable { lexical: String, semantic: String },

    #[error("prompt template: {detail}")]
    Template { detail: String },

    #[error("generation backend: {detail}")]
    RetryableGeneration { detail: String },

    #[error("generation rejected: {detail}")]
    NonRetryableGeneration { detail: String },

    #[error("generation deadline exceeded after {attempts} attempt(s)")]
    GenerationTimeout { attempts: u32 },
}

impl PipelineError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn store(operation: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::IndexStore {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. }
            | Self::CorruptInput { .. }
            | Self::InvalidConfig { .. }
            | Self::DimensionMismatch { .. }
            | Self::Template { .. }
            | Self::NonRetryableGeneration { .. } => ErrorKind::InputError,
            Self::EmbeddingBackend { .. }
            | Self::Ocr { .. }
            | Self::IndexStore { .. }
            | Self::RetrievalUnavailable { .. }
            | Self::RetryableGeneration { .. } => ErrorKind::BackendUnavailable,
            Self::EmbeddingBatchExceeded { .. } => ErrorKind::ResourceExhausted,
            Self::GenerationTimeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Whether re-issuing the same call may succeed.
    pub fn retryable(&self) -> bool {
        match self {
            Self::EmbeddingBackend { retryable, .. } => *retryable,
            _ => matches!(self.kind(), ErrorKind::BackendUnavailable | ErrorKind::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_not_retryable() {
        let err = PipelineError::UnsupportedFormat {
            mime_type: "application/octet-stream".into(),
        };
        assert_eq!(err.kind(), ErrorKind::InputError);
        assert!(!err.retryable());
    }

    #[test]
    fn backend_errors_honor_their_flag() {
        let transient = PipelineError::EmbeddingBackend {
            model_id: "m".into(),
            detail: "503".into(),
            retryable: true,
        };
        let fatal = PipelineError::EmbeddingBackend {
            model_id: "m".into(),
            detail: "401".into(),
            retryable: false,
        };
        assert!(transient.retryable());
        assert!(!fatal.retryable());
    }

    #[test]
    fn timeout_is_its_own_kind() {
        let err = PipelineError::GenerationTimeout { attempts: 2 };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.retryable());
    }
}
