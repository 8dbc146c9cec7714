//! Hybrid score fusion for lexical + semantic retrieval.
//!
//! Both candidate lists are min-max normalized to `[0, 1]` within the list,
//! deduplicated by chunk id (a chunk appearing in both lists is merged, not
//! double-counted), combined with a weighted sum, and ranked:
//! score (desc) → `sequence_index` (asc, earlier content wins ties) →
//! chunk id (asc, for full determinism).

use std::collections::HashMap;

use crate::models::{ResultOrigin, RetrievedChunk};
use crate::store::SearchHit;

/// Fusion weights for the two retrieval sources. Defaults to equal weight.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub lexical: f64,
    pub semantic: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            semantic: 0.5,
        }
    }
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they normalize to `1.0`.
pub fn normalize_scores(hits: &[SearchHit]) -> Vec<(&SearchHit, f64)> {
    if hits.is_empty() {
        return Vec::new();
    }

    let s_min = hits.iter().map(|h| h.raw_score).fold(f64::INFINITY, f64::min);
    let s_max = hits
        .iter()
        .map(|h| h.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|h| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (h.raw_score - s_min) / (s_max - s_min)
            };
            (h, norm)
        })
        .collect()
}

/// Fuse lexical and semantic candidate lists into one ranking of at most
/// `k` chunks.
pub fn fuse(
    lexical: &[SearchHit],
    semantic: &[SearchHit],
    weights: FusionWeights,
    k: usize,
) -> Vec<RetrievedChunk> {
    let norm_lexical = normalize_scores(lexical);
    let norm_semantic = normalize_scores(semantic);

    let lex_map: HashMap<&str, f64> = norm_lexical
        .iter()
        .map(|(h, s)| (h.chunk_id.as_str(), *s))
        .collect();
    let sem_map: HashMap<&str, f64> = norm_semantic
        .iter()
        .map(|(h, s)| (h.chunk_id.as_str(), *s))
        .collect();

    // Union of candidates, first occurrence carries the payload.
    let mut merged: HashMap<&str, &SearchHit> = HashMap::new();
    for hit in lexical.iter().chain(semantic.iter()) {
        merged.entry(hit.chunk_id.as_str()).or_insert(hit);
    }

    let mut fused: Vec<RetrievedChunk> = merged
        .into_values()
        .map(|hit| {
            let lex = lex_map.get(hit.chunk_id.as_str()).copied();
            let sem = sem_map.get(hit.chunk_id.as_str()).copied();
            let origin = match (lex, sem) {
                (Some(_), Some(_)) => ResultOrigin::Fused,
                (Some(_), None) => ResultOrigin::Lexical,
                _ => ResultOrigin::Semantic,
            };
            let score =
                weights.lexical * lex.unwrap_or(0.0) + weights.semantic * sem.unwrap_or(0.0);
            RetrievedChunk {
                chunk_id: hit.chunk_id.clone(),
                document_id: hit.document_id.clone(),
                source_uri: hit.source_uri.clone(),
                sequence_index: hit.sequence_index,
                score,
                origin,
                text: hit.text.clone(),
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.sequence_index.cmp(&b.sequence_index))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    fused.truncate(k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: &str, seq: i64, score: f64) -> SearchHit {
        SearchHit {
            chunk_id: chunk_id.to_string(),
            document_id: "doc1".to_string(),
            source_uri: "file:///doc1".to_string(),
            sequence_index: seq,
            raw_score: score,
            text: format!("text of {}", chunk_id),
        }
    }

    #[test]
    fn normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalize_single_is_one() {
        let hits = vec![hit("c1", 0, 5.0)];
        let norm = normalize_scores(&hits);
        assert!((norm[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_range_and_bounds() {
        let hits = vec![hit("c1", 0, 10.0), hit("c2", 1, 5.0), hit("c3", 2, 0.0)];
        let norm = normalize_scores(&hits);
        assert!((norm[0].1 - 1.0).abs() < 1e-9);
        assert!((norm[1].1 - 0.5).abs() < 1e-9);
        assert!((norm[2].1 - 0.0).abs() < 1e-9);
        for (_, s) in normalize_scores(&[hit("a", 0, -5.0), hit("b", 1, 100.0)]) {
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn fusion_worked_example_ties_break_on_sequence_index() {
        // lexical [(A,0.9),(B,0.5)], semantic [(B,0.8),(C,0.6)], equal weights.
        // After min-max: A=1.0/B=0.0 lexically, B=1.0/C=0.0 semantically.
        // Combined: A=0.5, B=0.5, C=0.0 — A and B tie, lower sequence index
        // wins, C ranks below both.
        let lexical = vec![hit("A", 0, 0.9), hit("B", 3, 0.5)];
        let semantic = vec![hit("B", 3, 0.8), hit("C", 5, 0.6)];

        let fused = fuse(&lexical, &semantic, FusionWeights::default(), 10);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].chunk_id, "A");
        assert_eq!(fused[1].chunk_id, "B");
        assert_eq!(fused[2].chunk_id, "C");
        assert!((fused[0].score - fused[1].score).abs() < 1e-9);
        assert!(fused[2].score < fused[1].score);
        assert_eq!(fused[1].origin, ResultOrigin::Fused);
        assert_eq!(fused[0].origin, ResultOrigin::Lexical);
        assert_eq!(fused[2].origin, ResultOrigin::Semantic);
    }

    #[test]
    fn duplicate_chunk_merged_not_double_counted() {
        let lexical = vec![hit("X", 0, 1.0)];
        let semantic = vec![hit("X", 0, 1.0)];
        let fused = fuse(&lexical, &semantic, FusionWeights::default(), 10);
        assert_eq!(fused.len(), 1);
        // 0.5 * 1.0 + 0.5 * 1.0, not 2.0.
        assert!((fused[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_source_ranking_survives() {
        let semantic = vec![hit("X", 0, 0.7)];
        let fused = fuse(&[], &semantic, FusionWeights::default(), 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].chunk_id, "X");
        assert_eq!(fused[0].origin, ResultOrigin::Semantic);
    }

    #[test]
    fn truncates_to_k() {
        let lexical: Vec<SearchHit> =
            (0..10i64).map(|i| hit(&format!("c{}", i), i, i as f64)).collect();
        let fused = fuse(&lexical, &[], FusionWeights::default(), 3);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].chunk_id, "c9");
    }

    #[test]
    fn custom_weights_shift_ranking() {
        let lexical = vec![hit("L", 0, 1.0), hit("M", 1, 0.0)];
        let semantic = vec![hit("S", 2, 1.0), hit("M", 1, 0.9)];
        let weights = FusionWeights {
            lexical: 0.1,
            semantic: 0.9,
        };
        let fused = fuse(&lexical, &semantic, weights, 10);
        assert_eq!(fused[0].chunk_id, "S");
    }
}
