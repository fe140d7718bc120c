//! Reciprocal-rank fusion of in-corpus and web result lists.

use gl_domain::reference::Reference;
use gl_domain::vecmath::cosine_similarity;
use std::collections::HashMap;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Merge ranked lists with reciprocal-rank fusion.
///
/// Each document's fused score is `Σ 1/(k + rank_i)` over the lists it
/// appears in (rank is 1-based). Deduplication is by stable id: the
/// first occurrence keeps its payload, later occurrences only add to
/// the fused score. The output is sorted by fused score, descending.
pub fn rrf_merge(lists: &[&[Reference]], k: f64) -> Vec<Reference> {
    let mut fused: Vec<Reference> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for list in lists {
        for (rank0, reference) in list.iter().enumerate() {
            let contribution = 1.0 / (k + (rank0 + 1) as f64);
            match index_by_id.get(&reference.id) {
                Some(&i) => fused[i].score += contribution,
                None => {
                    let mut merged = reference.clone();
                    merged.score = contribution;
                    index_by_id.insert(merged.id.clone(), fused.len());
                    fused.push(merged);
                }
            }
        }
    }

    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

/// Add a weighted cosine-similarity term to fused scores.
///
/// Documents without an embedding keep their RRF score unchanged.
/// Re-sorts the list afterwards.
pub fn apply_semantic_boost(
    merged: &mut Vec<Reference>,
    query_embedding: &[f32],
    embeddings_by_id: &HashMap<String, Vec<f32>>,
    weight: f64,
) {
    for reference in merged.iter_mut() {
        if let Some(embedding) = embeddings_by_id.get(&reference.id) {
            let sim = cosine_similarity(query_embedding, embedding) as f64;
            reference.score += weight * sim;
            reference.set_meta("semantic_boost", serde_json::json!(weight * sim));
        }
    }
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn make(id: &str) -> Reference {
        let mut r = Reference::new(id);
        r.content = Some(format!("content of {id}"));
        r
    }

    #[test]
    fn document_in_both_lists_ranks_first() {
        let corpus = vec![make("shared"), make("corpus-only")];
        let web = vec![make("web-only"), make("shared")];

        let merged = rrf_merge(&[&corpus, &web], DEFAULT_RRF_K);

        assert_eq!(merged[0].id, "shared");
        assert_eq!(merged.len(), 3);
        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((merged[0].score - expected).abs() < 1e-9);
    }

    #[test]
    fn dedup_is_by_stable_id() {
        let a = vec![make("x")];
        let b = vec![make("x")];
        let merged = rrf_merge(&[&a, &b], DEFAULT_RRF_K);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn lower_k_amplifies_rank_differences() {
        let list = vec![make("first"), make("second")];
        let merged_low = rrf_merge(&[&list], 1.0);
        let merged_high = rrf_merge(&[&list], 1000.0);

        let gap_low = merged_low[0].score - merged_low[1].score;
        let gap_high = merged_high[0].score - merged_high[1].score;
        assert!(gap_low > gap_high);
    }

    #[test]
    fn semantic_boost_reorders() {
        let corpus = vec![make("a"), make("b")];
        let mut merged = rrf_merge(&[&corpus], DEFAULT_RRF_K);
        assert_eq!(merged[0].id, "a");

        let mut embeddings = HashMap::new();
        embeddings.insert("a".to_string(), vec![1.0, 0.0]);
        embeddings.insert("b".to_string(), vec![0.0, 1.0]);
        // Query aligned with "b".
        apply_semantic_boost(&mut merged, &[0.0, 1.0], &embeddings, 1.0);
        assert_eq!(merged[0].id, "b");
    }

    #[test]
    fn missing_embeddings_keep_rrf_score() {
        let corpus = vec![make("a")];
        let mut merged = rrf_merge(&[&corpus], DEFAULT_RRF_K);
        let before = merged[0].score;
        apply_semantic_boost(&mut merged, &[1.0, 0.0], &HashMap::new(), 1.0);
        assert_eq!(merged[0].score, before);
    }
}
