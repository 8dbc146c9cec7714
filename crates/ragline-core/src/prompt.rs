//! Prompt assembly from templates and retrieved context.
//!
//! Templates are parameterized strings with named slots (`{query}`,
//! `{context}`, `{history}`), validated once at load time and immutable
//! afterwards; slot substitution is the only mutation. Context is assembled
//! in fused-rank order with inline provenance markers and truncated at a
//! token budget, never mid-word.

use crate::error::{PipelineError, Result};
use crate::models::RetrievalResult;

/// Template used when the configuration does not point at a template file.
pub const DEFAULT_TEMPLATE: &str = "\
You are a documentation assistant. Answer the question using only the \
provided context. Cite the chunk markers you relied on. If the context does \
not contain the answer, say so.

{history}

Context:
{context}

Question: {query}
Answer:";

const SLOT_QUERY: &str = "{query}";
const SLOT_CONTEXT: &str = "{context}";
const SLOT_HISTORY: &str = "{history}";

/// A validated, immutable prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    raw: String,
}

impl PromptTemplate {
    /// Parse and validate a template. `{query}` and `{context}` are
    /// required; `{history}` is optional.
    pub fn parse(raw: &str) -> Result<Self> {
        for slot in [SLOT_QUERY, SLOT_CONTEXT] {
            if !raw.contains(slot) {
                return Err(PipelineError::Template {
                    detail: format!("missing required slot {}", slot),
                });
            }
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    /// Substitute slot values. The template text is scanned left to right,
    /// so slot-shaped text inside substituted values is never re-expanded.
    pub fn render(&self, query: &str, context: &str, history: &str) -> String {
        let mut out = String::with_capacity(
            self.raw.len() + query.len() + context.len() + history.len(),
        );
        let mut rest = self.raw.as_str();
        while let Some(pos) = rest.find('{') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(value) = [
                (SLOT_QUERY, query),
                (SLOT_CONTEXT, context),
                (SLOT_HISTORY, history),
            ]
            .iter()
            .find_map(|(slot, value)| tail.starts_with(slot).then_some((slot.len(), *value)))
            {
                out.push_str(value.1);
                rest = &tail[value.0..];
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

/// Concatenate retrieved chunk texts in fused-rank order, each preceded by
/// an inline provenance marker, stopping at `budget_tokens` whole words.
pub fn assemble_context(retrieval: &RetrievalResult, budget_tokens: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;

    for chunk in &retrieval.chunks {
        let marker = format!("[chunk {} | {}]", chunk.chunk_id, chunk.source_uri);
        let marker_tokens = marker.split_whitespace().count();
        if used + marker_tokens >= budget_tokens {
            break;
        }

        let words: Vec<&str> = chunk.text.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        let take = words.len().min(budget_tokens - used - marker_tokens);

        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&marker);
        out.push('\n');
        out.push_str(&words[..take].join(" "));
        used += marker_tokens + take;

        if take < words.len() {
            break;
        }
    }

    out
}

/// Build the final prompt text for a query. The template was validated at
/// load time; assembly itself cannot fail.
pub fn build_prompt(
    template: &PromptTemplate,
    query: &str,
    retrieval: &RetrievalResult,
    history: &str,
    context_budget_tokens: usize,
) -> String {
    let context = assemble_context(retrieval, context_budget_tokens);
    template.render(query, &context, history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultOrigin, RetrievedChunk};

    fn retrieval(chunks: Vec<(&str, &str)>) -> RetrievalResult {
        RetrievalResult {
            query: "q".into(),
            chunks: chunks
                .into_iter()
                .enumerate()
                .map(|(i, (id, text))| RetrievedChunk {
                    chunk_id: id.to_string(),
                    document_id: "doc1".to_string(),
                    source_uri: "file:///doc1.md".to_string(),
                    sequence_index: i as i64,
                    score: 1.0,
                    origin: ResultOrigin::Fused,
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn missing_required_slot_is_rejected() {
        let err = PromptTemplate::parse("Question: {query}").unwrap_err();
        assert!(matches!(err, PipelineError::Template { .. }));
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn default_template_is_valid() {
        PromptTemplate::parse(DEFAULT_TEMPLATE).unwrap();
    }

    #[test]
    fn render_substitutes_all_slots() {
        let t = PromptTemplate::parse("{history}|{context}|{query}").unwrap();
        assert_eq!(t.render("q", "ctx", "hist"), "hist|ctx|q");
    }

    #[test]
    fn render_does_not_reexpand_substituted_values() {
        let t = PromptTemplate::parse("{context} {query}").unwrap();
        let rendered = t.render("real question", "contains {query} literally", "");
        assert_eq!(rendered, "contains {query} literally real question");
    }

    #[test]
    fn unknown_braces_pass_through() {
        let t = PromptTemplate::parse("{query} {context} {json: 1}").unwrap();
        assert_eq!(t.render("q", "c", ""), "q c {json: 1}");
    }

    #[test]
    fn context_includes_provenance_markers_in_rank_order() {
        let r = retrieval(vec![("c-1", "first chunk text"), ("c-2", "second chunk text")]);
        let ctx = assemble_context(&r, 100);
        let first = ctx.find("[chunk c-1 | file:///doc1.md]").unwrap();
        let second = ctx.find("[chunk c-2 | file:///doc1.md]").unwrap();
        assert!(first < second);
        assert!(ctx.contains("first chunk text"));
    }

    #[test]
    fn context_truncates_at_word_boundary() {
        let r = retrieval(vec![("c-1", "alpha beta gamma delta epsilon")]);
        // Marker is 4 tokens; budget 7 leaves room for 3 content words.
        let ctx = assemble_context(&r, 7);
        assert!(ctx.ends_with("alpha beta gamma"));
        assert!(!ctx.contains("delta"));
    }

    #[test]
    fn context_stops_before_marker_without_room() {
        let r = retrieval(vec![("c-1", "alpha beta"), ("c-2", "gamma delta")]);
        let ctx = assemble_context(&r, 9);
        assert!(ctx.contains("c-1"));
        assert!(!ctx.contains("[chunk c-2"));
    }

    #[test]
    fn empty_retrieval_yields_empty_context() {
        let r = RetrievalResult::empty("q");
        assert!(assemble_context(&r, 100).is_empty());
    }
}
