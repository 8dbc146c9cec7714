//! Boundary-aware overlapping text chunker.
//!
//! Splits parsed [`TextBlock`]s into [`Chunk`]s that respect a hard
//! `max_tokens` limit while preferring to cut at structural boundaries
//! (sentence or paragraph ends) once a minimum size is reached. Adjacent
//! chunks share `overlap_tokens` trailing tokens so context spanning a cut
//! survives retrieval.
//!
//! Tokens are whitespace-delimited words. The document's normalized text is
//! its token sequence joined by single spaces; each chunk's [`TokenSpan`]
//! indexes into that sequence, which makes the overlap explicit:
//! `next.span.start = prev.span.end - overlap`.
//!
//! Each chunk id is a UUIDv5 of `document_id:sequence_index`, so repeated
//! chunking of unchanged input yields identical identifiers and ingestion
//! stays idempotent.
//!
//! # Algorithm
//!
//! 1. Flatten blocks into one token sequence, recording which tokens are
//!    followed by an allowed boundary for the configured policy.
//! 2. Walk tokens, accumulating a chunk. Emit when `max_tokens` is reached
//!    (hard split), or at a boundary once at least `min_tokens` have
//!    accumulated (prevents degenerate tiny chunks), or at end of input.
//! 3. After each emit, start the next chunk `overlap_tokens` back from the
//!    cut (capped so every chunk consumes at least one fresh token).

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::{Chunk, TextBlock, TokenSpan};

/// Where the chunker is allowed to cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// Cut at sentence ends (and block ends).
    Sentence,
    /// Cut at block (paragraph) ends only.
    Paragraph,
    /// No structural cuts; only the `max_tokens` hard split applies.
    Fixed,
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Hard upper bound on tokens per chunk.
    pub max_tokens: usize,
    /// Tokens shared between adjacent chunks.
    pub overlap_tokens: usize,
    /// Minimum accumulated tokens before a structural boundary may cut.
    pub min_tokens: usize,
    pub boundary: BoundaryPolicy,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 48,
            min_tokens: 32,
            boundary: BoundaryPolicy::Paragraph,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(PipelineError::invalid_config(
                "chunking.max_tokens",
                "must be > 0",
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(PipelineError::invalid_config(
                "chunking.overlap_tokens",
                format!(
                    "must be smaller than max_tokens ({} >= {})",
                    self.overlap_tokens, self.max_tokens
                ),
            ));
        }
        if self.min_tokens > self.max_tokens {
            return Err(PipelineError::invalid_config(
                "chunking.min_tokens",
                "must not exceed max_tokens",
            ));
        }
        Ok(())
    }
}

/// Deterministic chunk id from `(document_id, sequence_index)`.
pub fn chunk_id(document_id: &str, sequence_index: i64) -> String {
    let name = format!("{}:{}", document_id, sequence_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Split text blocks into ordered chunks.
///
/// Returns an empty vector when the blocks contain no tokens; the caller
/// decides whether that rejects the document.
pub fn chunk_blocks(
    document_id: &str,
    blocks: &[TextBlock],
    cfg: &ChunkerConfig,
) -> Result<Vec<Chunk>> {
    cfg.validate()?;

    let mut words: Vec<&str> = Vec::new();
    let mut word_block: Vec<usize> = Vec::new();
    let mut boundary_after: Vec<bool> = Vec::new();

    for (block_idx, block) in blocks.iter().enumerate() {
        let start_len = words.len();
        for word in block.text.split_whitespace() {
            words.push(word);
            word_block.push(block_idx);
            boundary_after.push(match cfg.boundary {
                BoundaryPolicy::Sentence => ends_sentence(word),
                BoundaryPolicy::Paragraph | BoundaryPolicy::Fixed => false,
            });
        }
        // Block ends are boundaries for both sentence and paragraph policy.
        if words.len() > start_len && cfg.boundary != BoundaryPolicy::Fixed {
            *boundary_after.last_mut().unwrap() = true;
        }
    }

    let n = words.len();
    let mut chunks = Vec::new();
    if n == 0 {
        return Ok(chunks);
    }

    let mut start = 0usize;
    for i in 0..n {
        let count = i - start + 1;
        let at_end = i + 1 == n;
        let emit =
            count >= cfg.max_tokens || at_end || (boundary_after[i] && count >= cfg.min_tokens);
        if !emit {
            continue;
        }

        let sequence_index = chunks.len() as i64;
        chunks.push(make_chunk(
            document_id,
            sequence_index,
            &words[start..=i],
            TokenSpan { start, end: i + 1 },
            &blocks[word_block[start]],
        ));

        if !at_end {
            // Cap the carry so every chunk consumes at least one fresh token.
            let overlap = cfg.overlap_tokens.min(count.saturating_sub(1));
            start = i + 1 - overlap;
        }
    }

    Ok(chunks)
}

fn ends_sentence(word: &str) -> bool {
    let trimmed = word.trim_end_matches(['"', '\'', ')', ']', '\u{201d}', '\u{2019}']);
    trimmed.ends_with('.') || trimmed.ends_with('!') || trimmed.ends_with('?')
}

fn make_chunk(
    document_id: &str,
    sequence_index: i64,
    words: &[&str],
    token_span: TokenSpan,
    origin: &TextBlock,
) -> Chunk {
    let text = words.join(" ");

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    let mut metadata = serde_json::Map::new();
    if let Some(page) = origin.page {
        metadata.insert("page".to_string(), serde_json::json!(page));
    }
    if let Some(ref section) = origin.section {
        metadata.insert("section".to_string(), serde_json::json!(section));
    }

    Chunk {
        id: chunk_id(document_id, sequence_index),
        document_id: document_id.to_string(),
        text,
        token_span,
        sequence_index,
        content_hash,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: usize, overlap: usize, min: usize, boundary: BoundaryPolicy) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: max,
            overlap_tokens: overlap,
            min_tokens: min,
            boundary,
        }
    }

    fn paragraphs(texts: &[&str]) -> Vec<TextBlock> {
        texts.iter().map(|t| TextBlock::new(*t)).collect()
    }

    #[test]
    fn small_input_single_chunk() {
        let blocks = paragraphs(&["Hello, world!"]);
        let chunks = chunk_blocks("doc1", &blocks, &ChunkerConfig::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].token_span, TokenSpan { start: 0, end: 2 });
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = chunk_blocks("doc1", &[], &ChunkerConfig::default()).unwrap();
        assert!(chunks.is_empty());
        let blank = paragraphs(&["   "]);
        let chunks = chunk_blocks("doc1", &blank, &ChunkerConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_max() {
        let err = chunk_blocks(
            "doc1",
            &paragraphs(&["a b c"]),
            &cfg(8, 8, 1, BoundaryPolicy::Fixed),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let err = chunk_blocks(
            "doc1",
            &paragraphs(&["a"]),
            &cfg(0, 0, 0, BoundaryPolicy::Fixed),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }

    #[test]
    fn hard_split_at_max_tokens() {
        let text = (0..20).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunk_blocks(
            "doc1",
            &paragraphs(&[text.as_str()]),
            &cfg(8, 0, 1, BoundaryPolicy::Fixed),
        )
        .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].token_span, TokenSpan { start: 0, end: 8 });
        assert_eq!(chunks[1].token_span, TokenSpan { start: 8, end: 16 });
        assert_eq!(chunks[2].token_span, TokenSpan { start: 16, end: 20 });
    }

    #[test]
    fn paragraph_boundary_respected_after_min() {
        let blocks = paragraphs(&[
            "one two three four",
            "five six seven eight",
            "nine ten",
        ]);
        let chunks = chunk_blocks("doc1", &blocks, &cfg(100, 0, 3, BoundaryPolicy::Paragraph))
            .unwrap();
        // Each block exceeds min_tokens=3 except the last, which flushes at
        // end of input.
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "one two three four");
        assert_eq!(chunks[1].text, "five six seven eight");
        assert_eq!(chunks[2].text, "nine ten");
    }

    #[test]
    fn tiny_paragraphs_accumulate_until_min() {
        let blocks = paragraphs(&["a b", "c d", "e f g h", "i"]);
        let chunks =
            chunk_blocks("doc1", &blocks, &cfg(100, 0, 6, BoundaryPolicy::Paragraph)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "a b c d e f g h");
        assert_eq!(chunks[1].text, "i");
    }

    #[test]
    fn sentence_policy_cuts_at_sentence_ends() {
        let blocks = paragraphs(&["First sentence here. Second one follows! Third trails"]);
        let chunks =
            chunk_blocks("doc1", &blocks, &cfg(100, 0, 2, BoundaryPolicy::Sentence)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "First sentence here.");
        assert_eq!(chunks[1].text, "Second one follows!");
        assert_eq!(chunks[2].text, "Third trails");
    }

    #[test]
    fn fixed_policy_ignores_structure() {
        let blocks = paragraphs(&["one two", "three four", "five six"]);
        let chunks =
            chunk_blocks("doc1", &blocks, &cfg(4, 0, 1, BoundaryPolicy::Fixed)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "one two three four");
        assert_eq!(chunks[1].text, "five six");
    }

    #[test]
    fn overlap_carries_trailing_tokens() {
        let text = (0..10).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunk_blocks(
            "doc1",
            &paragraphs(&[text.as_str()]),
            &cfg(6, 2, 1, BoundaryPolicy::Fixed),
        )
        .unwrap();
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].token_span, TokenSpan { start: 0, end: 6 });
        assert_eq!(chunks[1].token_span.start, 4);
        assert!(chunks[1].text.starts_with("w4 w5"));
    }

    #[test]
    fn concatenation_minus_overlap_reconstructs_input() {
        let blocks = paragraphs(&[
            "alpha beta gamma delta epsilon zeta",
            "eta theta iota kappa lambda mu nu xi",
            "omicron pi rho sigma tau",
        ]);
        let normalized = blocks
            .iter()
            .flat_map(|b| b.text.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ");

        for overlap in [0usize, 2, 4] {
            let chunks = chunk_blocks(
                "doc1",
                &blocks,
                &cfg(5, overlap, 1, BoundaryPolicy::Paragraph),
            )
            .unwrap();

            let mut rebuilt: Vec<String> = Vec::new();
            let mut prev_end = 0usize;
            for chunk in &chunks {
                let skip = prev_end.saturating_sub(chunk.token_span.start);
                rebuilt.extend(
                    chunk
                        .text
                        .split_whitespace()
                        .skip(skip)
                        .map(|w| w.to_string()),
                );
                prev_end = chunk.token_span.end;
            }
            assert_eq!(rebuilt.join(" "), normalized, "overlap={}", overlap);
        }
    }

    #[test]
    fn chunk_ids_deterministic_across_runs() {
        let blocks = paragraphs(&["alpha beta", "gamma delta", "epsilon zeta"]);
        let config = cfg(3, 1, 1, BoundaryPolicy::Paragraph);
        let a = chunk_blocks("doc1", &blocks, &config).unwrap();
        let b = chunk_blocks("doc1", &blocks, &config).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.content_hash, y.content_hash);
            assert_eq!(x.token_span, y.token_span);
        }
        // Different documents never collide.
        let c = chunk_blocks("doc2", &blocks, &config).unwrap();
        assert_ne!(a[0].id, c[0].id);
    }

    #[test]
    fn metadata_records_page_and_section() {
        let blocks = vec![
            TextBlock {
                text: "intro words here".into(),
                page: Some(1),
                section: Some("Overview".into()),
            },
            TextBlock {
                text: "second page content".into(),
                page: Some(2),
                section: None,
            },
        ];
        let chunks =
            chunk_blocks("doc1", &blocks, &cfg(100, 0, 2, BoundaryPolicy::Paragraph)).unwrap();
        assert_eq!(chunks[0].metadata.get("page"), Some(&serde_json::json!(1)));
        assert_eq!(
            chunks[0].metadata.get("section"),
            Some(&serde_json::json!("Overview"))
        );
        assert_eq!(chunks[1].metadata.get("page"), Some(&serde_json::json!(2)));
    }
}
