//! Cosine similarity and top-k ranking.
//!
//! Zero-vector policy: cosine similarity is undefined when either vector has
//! zero norm. Such pairs score exactly `0.0`; no NaN ever leaves this module.
//!
//! Ordering: scores descending. Scores that agree to within [`SCORE_EPSILON`]
//! are treated as equal and ordered by key ascending, so results are stable
//! across runs and platforms.

use std::cmp::{Ordering, Reverse};

use serde::Serialize;

use crate::core::error::{Error, Result};

/// Width of a tie bucket when comparing scores.
pub const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredKey {
    pub key: String,
    pub score: f32,
}

/// Cosine similarity of two vectors of equal length, clamped to [-1, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(cosine_with_norm(a, l2_norm(a), b))
}

pub(crate) fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Cosine with `a`'s norm precomputed. Callers guarantee equal lengths.
pub(crate) fn cosine_with_norm(a: &[f32], norm_a: f64, b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 || !norm_a.is_finite() || !norm_b.is_finite() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let cos = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    if cos.is_nan() {
        0.0
    } else {
        cos as f32
    }
}

/// Total order used by every ranked output: score bucket descending, then key.
pub(crate) fn compare_scored(a_score: f32, a_key: &str, b_score: f32, b_key: &str) -> Ordering {
    let bucket = |s: f32| Reverse(((s as f64) / SCORE_EPSILON).round() as i64);
    bucket(a_score)
        .cmp(&bucket(b_score))
        .then_with(|| a_key.cmp(b_key))
}

/// Rank `candidates` against `query`, best first, at most `top_k` results.
///
/// Every candidate must have the query's dimension; a mismatch is a contract
/// violation and fails the whole call.
pub fn rank<K, V>(query: &[f32], candidates: &[(K, V)], top_k: usize) -> Result<Vec<ScoredKey>>
where
    K: AsRef<str>,
    V: AsRef<[f32]>,
{
    if candidates.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let query_norm = l2_norm(query);
    let mut scored = Vec::with_capacity(candidates.len());
    for (key, vector) in candidates {
        let vector = vector.as_ref();
        if vector.len() != query.len() {
            return Err(Error::DimensionMismatch {
                expected: query.len(),
                got: vector.len(),
            });
        }
        scored.push(ScoredKey {
            key: key.as_ref().to_string(),
            score: cosine_with_norm(query, query_norm, vector),
        });
    }

    scored.sort_by(|a, b| compare_scored(a.score, &a.key, b.score, &b.key));
    scored.truncate(top_k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cands(items: &[(&str, Vec<f32>)]) -> Vec<(String, Vec<f32>)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).unwrap().abs() < 1e-6);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_bounds_hold_for_scaled_vectors() {
        let a = vec![3.0e10, 4.0e10];
        let b = vec![6.0e10, 8.0e10];
        let cos = cosine_similarity(&a, &b).unwrap();
        assert!((-1.0..=1.0).contains(&cos));
        assert!((cos - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let zero = vec![0.0; 4];
        let b = vec![0.5, -0.5, 1.0, 2.0];
        assert_eq!(cosine_similarity(&zero, &b).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&b, &zero).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 3 }));
    }

    #[test]
    fn test_rank_orders_descending() {
        let candidates = cands(&[
            ("far", vec![0.0, 1.0]),
            ("near", vec![1.0, 0.1]),
            ("mid", vec![1.0, 1.0]),
        ]);
        let ranked = rank(&[1.0, 0.0], &candidates, 10).unwrap();

        let keys: Vec<_> = ranked.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["near", "mid", "far"]);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_rank_ties_break_by_key() {
        let candidates = cands(&[
            ("c", vec![1.0, 0.0]),
            ("a", vec![2.0, 0.0]),
            ("b", vec![0.5, 0.0]),
        ]);
        let ranked = rank(&[1.0, 0.0], &candidates, 3).unwrap();
        let keys: Vec<_> = ranked.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rank_top_k_caps_results() {
        let candidates: Vec<(String, Vec<f32>)> = (0..10)
            .map(|i| (format!("n{}", i), vec![1.0, i as f32 * 0.1]))
            .collect();

        assert_eq!(rank(&[1.0, 0.0], &candidates, 3).unwrap().len(), 3);
        assert_eq!(rank(&[1.0, 0.0], &candidates, 50).unwrap().len(), 10);
        assert!(rank(&[1.0, 0.0], &candidates, 0).unwrap().is_empty());
    }

    #[test]
    fn test_rank_empty_candidates() {
        let candidates: Vec<(String, Vec<f32>)> = Vec::new();
        assert!(rank(&[1.0, 0.0], &candidates, 5).unwrap().is_empty());
    }

    #[test]
    fn test_rank_zero_query_scores_all_zero() {
        let candidates = cands(&[("b", vec![1.0, 0.0]), ("a", vec![0.0, 1.0])]);
        let ranked = rank(&[0.0, 0.0], &candidates, 5).unwrap();
        assert!(ranked.iter().all(|r| r.score == 0.0));
        assert_eq!(ranked[0].key, "a");
    }

    #[test]
    fn test_rank_rejects_mixed_dimensions() {
        let candidates = cands(&[("a", vec![1.0, 0.0]), ("b", vec![1.0, 0.0, 0.0])]);
        let err = rank(&[1.0, 0.0], &candidates, 5).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}
