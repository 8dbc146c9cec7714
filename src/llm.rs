//! HTTP generation backend (OpenAI-compatible `/v1/chat/completions`).
//!
//! Failures are classified at the HTTP layer: 429 and 5xx responses plus
//! network errors are retryable; authentication and other client errors
//! are not. The retry loop itself lives in
//! [`Orchestrator`](crate::generate::Orchestrator).
//!
//! Streaming parses the SSE response incrementally. The returned stream
//! owns the HTTP response body, so dropping it mid-consumption releases
//! the connection — no background task to leak.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use ragline_core::error::{PipelineError, Result};
use ragline_core::generate::{EventStream, GenerateOptions, GenerationBackend, StreamEvent};
use ragline_core::models::{Answer, FinishReason, Usage};

use crate::config::GenerationConfig;

/// OpenAI-compatible chat completion client.
pub struct HttpGenerationBackend {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl HttpGenerationBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            PipelineError::invalid_config("generation.model", "required when provider is enabled")
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::NonRetryableGeneration {
                detail: e.to_string(),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).ok(),
            model,
            client,
        })
    }

    async fn send(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": stream,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::RetryableGeneration {
                detail: format!("connection to {} failed: {}", url, e),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(PipelineError::RetryableGeneration {
                detail: format!("{}: {}", status, text),
            })
        } else {
            Err(PipelineError::NonRetryableGeneration {
                detail: format!("{}: {}", status, text),
            })
        }
    }
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None | Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some(other) => FinishReason::Other(other.to_string()),
    }
}

fn parse_usage(json: &serde_json::Value) -> Usage {
    let field = |name: &str| {
        json.get("usage")
            .and_then(|u| u.get(name))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    };
    Usage {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Answer> {
        let resp = self.send(prompt, options, false).await?;

        let json: serde_json::Value =
            resp.json()
                .await
                .map_err(|e| PipelineError::RetryableGeneration {
                    detail: format!("invalid response body: {}", e),
                })?;

        let choice = json
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| PipelineError::NonRetryableGeneration {
                detail: "no choices in response".to_string(),
            })?;

        let text = choice
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let finish_reason =
            parse_finish_reason(choice.get("finish_reason").and_then(|f| f.as_str()));

        Ok(Answer {
            text,
            finish_reason,
            usage: parse_usage(&json),
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<EventStream> {
        let resp = self.send(prompt, options, true).await?;
        let body: BoxStream<'static, reqwest::Result<Vec<u8>>> =
            resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();
        Ok(sse_event_stream(body))
    }
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: String,
    pending: VecDeque<Result<StreamEvent>>,
    finish_reason: FinishReason,
    usage: Usage,
    finished: bool,
}

/// Turn an SSE byte stream into ordered [`StreamEvent`]s.
///
/// The state owns the response body; dropping the stream drops the
/// connection.
fn sse_event_stream(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> EventStream {
    let state = SseState {
        body,
        buf: String::new(),
        pending: VecDeque::new(),
        finish_reason: FinishReason::Stop,
        usage: Usage::default(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((event, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    st.buf.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(pos) = st.buf.find('\n') {
                        let line: String = st.buf.drain(..=pos).collect();
                        process_sse_line(line.trim(), &mut st);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.push_back(Err(PipelineError::RetryableGeneration {
                        detail: format!("stream interrupted: {}", e),
                    }));
                }
                None => {
                    // Server closed without an explicit [DONE].
                    st.finished = true;
                    st.pending.push_back(Ok(StreamEvent::Done {
                        finish_reason: st.finish_reason.clone(),
                        usage: st.usage,
                    }));
                }
            }
        }
    })
    .boxed()
}

fn process_sse_line(line: &str, st: &mut SseState) {
    let Some(payload) = line.strip_prefix("data:") else {
        return;
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        st.finished = true;
        st.pending.push_back(Ok(StreamEvent::Done {
            finish_reason: st.finish_reason.clone(),
            usage: st.usage,
        }));
        return;
    }

    let Ok(json) = serde_json::from_str::<serde_json::Value>(payload) else {
        return;
    };

    if json.get("usage").is_some() {
        st.usage = parse_usage(&json);
    }
    if let Some(reason) = json
        .pointer("/choices/0/finish_reason")
        .and_then(|f| f.as_str())
    {
        st.finish_reason = parse_finish_reason(Some(reason));
    }
    if let Some(delta) = json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        if !delta.is_empty() {
            st.pending.push_back(Ok(StreamEvent::Delta(delta.to_string())));
        }
    }
}

/// Build the generation backend selected by configuration, or `None` when
/// generation is disabled (retrieval-only operation).
pub fn create_generation_backend(
    config: &GenerationConfig,
) -> Result<Option<Arc<dyn GenerationBackend>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    Ok(Some(Arc::new(HttpGenerationBackend::new(config)?)))
}
