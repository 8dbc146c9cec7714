//! The query path: retrieve → build prompt → generate → audit.
//!
//! Every completed query appends a [`ConversationTurn`] audit record.
//! Streaming answers log their turn when the terminal `Done` event passes
//! through; a stream cancelled mid-flight logs nothing and releases its
//! connection on drop.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use ragline_core::error::Result;
use ragline_core::generate::{EventStream, GenerateOptions, StreamEvent};
use ragline_core::models::{Answer, ConversationTurn, RetrievalResult};
use ragline_core::prompt::{build_prompt, PromptTemplate};
use ragline_core::store::IndexStore;

use crate::generate::Orchestrator;
use crate::retrieve::Retriever;

/// A completed non-streaming query.
pub struct QueryOutcome {
    pub answer: Answer,
    /// Provenance used to build citations.
    pub retrieval: RetrievalResult,
    pub turn_id: String,
}

pub struct QueryEngine {
    retriever: Retriever,
    orchestrator: Orchestrator,
    template: PromptTemplate,
    store: Arc<dyn IndexStore>,
    options: GenerateOptions,
    context_budget_tokens: usize,
    history_turns: usize,
}

impl QueryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        retriever: Retriever,
        orchestrator: Orchestrator,
        template: PromptTemplate,
        store: Arc<dyn IndexStore>,
        options: GenerateOptions,
        context_budget_tokens: usize,
        history_turns: usize,
    ) -> Self {
        Self {
            retriever,
            orchestrator,
            template,
            store,
            options,
            context_budget_tokens,
            history_turns,
        }
    }

    /// Answer a query and append the audit turn.
    pub async fn answer(&self, query: &str, k: usize) -> Result<QueryOutcome> {
        let started = Instant::now();
        let retrieval = self.retriever.retrieve(query, k).await?;
        let history = self.history_text().await;
        let prompt = build_prompt(
            &self.template,
            query,
            &retrieval,
            &history,
            self.context_budget_tokens,
        );

        let answer = self.orchestrator.generate(&prompt, &self.options).await?;

        let turn = ConversationTurn {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            retrieved_chunk_ids: retrieval.chunk_ids(),
            prompt_text: prompt,
            answer_text: answer.text.clone(),
            model_id: self.orchestrator.model_id().to_string(),
            latency_ms: started.elapsed().as_millis() as i64,
            created_at: chrono::Utc::now(),
        };
        let turn_id = turn.id.clone();
        if let Err(err) = self.store.log_turn(&turn).await {
            warn!(error = %err, "failed to append conversation turn");
        }

        info!(
            chunks = retrieval.chunks.len(),
            latency_ms = turn.latency_ms,
            "query answered"
        );

        Ok(QueryOutcome {
            answer,
            retrieval,
            turn_id,
        })
    }

    /// Answer a query as a stream of partial-text events. The retrieval
    /// provenance is returned up front so the caller can render citations
    /// while text arrives. Dropping the stream cancels generation and
    /// releases the connection; the audit turn is logged only when the
    /// terminal event passes through.
    pub async fn answer_stream(
        &self,
        query: &str,
        k: usize,
    ) -> Result<(EventStream, RetrievalResult)> {
        let started = Instant::now();
        let retrieval = self.retriever.retrieve(query, k).await?;
        let history = self.history_text().await;
        let prompt = build_prompt(
            &self.template,
            query,
            &retrieval,
            &history,
            self.context_budget_tokens,
        );

        let inner = self.orchestrator.generate_stream(&prompt, &self.options).await?;

        struct TeeState {
            inner: EventStream,
            store: Arc<dyn IndexStore>,
            accumulated: String,
            seed: Option<ConversationTurn>,
        }

        let seed = ConversationTurn {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            retrieved_chunk_ids: retrieval.chunk_ids(),
            prompt_text: prompt,
            answer_text: String::new(),
            model_id: self.orchestrator.model_id().to_string(),
            latency_ms: 0,
            created_at: chrono::Utc::now(),
        };

        let state = TeeState {
            inner,
            store: self.store.clone(),
            accumulated: String::new(),
            seed: Some(seed),
        };

        let stream = futures::stream::unfold(state, move |mut st| async move {
            let event = st.inner.next().await?;
            if let Ok(StreamEvent::Delta(delta)) = &event {
                st.accumulated.push_str(delta);
            }
            if matches!(event, Ok(StreamEvent::Done { .. })) {
                if let Some(mut turn) = st.seed.take() {
                    turn.answer_text = std::mem::take(&mut st.accumulated);
                    turn.latency_ms = started.elapsed().as_millis() as i64;
                    if let Err(err) = st.store.log_turn(&turn).await {
                        warn!(error = %err, "failed to append conversation turn");
                    }
                }
            }
            Some((event, st))
        })
        .boxed();

        Ok((stream, retrieval))
    }

    async fn history_text(&self) -> String {
        if self.history_turns == 0 {
            return String::new();
        }
        match self.store.recent_turns(self.history_turns).await {
            Ok(turns) => turns
                .into_iter()
                .rev()
                .map(|t| format!("Q: {}\nA: {}", t.query, t.answer_text))
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(err) => {
                warn!(error = %err, "history unavailable; continuing without it");
                String::new()
            }
        }
    }
}
