//! Generation backend trait and streaming event types.
//!
//! A backend is any request/response or request/stream generative model
//! endpoint. Backends classify their own failures as retryable
//! ([`PipelineError::RetryableGeneration`]) or not
//! ([`PipelineError::NonRetryableGeneration`]); the retry/deadline policy
//! lives in the orchestrator in the application crate.
//!
//! Streaming is a cancellable lazy sequence of events: dropping the stream
//! must release the underlying connection without leaking resources.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::{Answer, FinishReason, Usage};

/// Sampling and length options for one generation request.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// One event of a streaming generation.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An ordered partial-text fragment.
    Delta(String),
    /// Terminal event; no further items follow.
    Done {
        finish_reason: FinishReason,
        usage: Usage,
    },
}

/// Lazily produced, cancellable sequence of generation events.
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Pluggable generative model backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Model identifier recorded on audit turns.
    fn model_id(&self) -> &str;

    /// Request/response generation.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Answer>;

    /// Request/stream generation. The returned stream yields ordered
    /// [`StreamEvent::Delta`] items followed by one [`StreamEvent::Done`].
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<EventStream>;
}
