//! Min-max score normalization and weighted fusion of two candidate lists

use ahash::AHashMap;

/// A candidate after fusion, before hydration and deduplication.
#[derive(Debug, Clone)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub dense_score: Option<f32>,
    pub sparse_score: Option<f32>,
    pub fused_score: f32,
}

/// Min-max normalize raw scores to [0,1] over the candidate set itself.
///
/// A singleton or all-equal candidate set normalizes to 1.0: those chunks
/// are the best their index had to offer, and mapping them to 0 would erase
/// the signal entirely.
pub fn min_max_normalize(candidates: Vec<(String, f32)>) -> Vec<(String, f32)> {
    if candidates.is_empty() {
        return candidates;
    }

    let min = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::INFINITY, f32::min);
    let max = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);

    if (max - min).abs() <= f32::EPSILON {
        return candidates.into_iter().map(|(id, _)| (id, 1.0)).collect();
    }

    candidates
        .into_iter()
        .map(|(id, s)| (id, (s - min) / (max - min)))
        .collect()
}

/// Fuse two raw-scored candidate lists into one ranking.
///
/// Each list is normalized over its own candidate set, the id sets are
/// unioned, and `fused = alpha * dense + (1 - alpha) * sparse` with a
/// missing side contributing 0. `alpha = 1.0` considers only dense
/// candidates and `alpha = 0.0` only sparse ones, so the degenerate
/// rankings are exactly the single-index rankings.
///
/// The result is sorted by fused score descending, ties broken by dense
/// score descending, then chunk id ascending for determinism.
pub fn fuse(
    dense: Vec<(String, f32)>,
    sparse: Vec<(String, f32)>,
    alpha: f32,
) -> Vec<FusedCandidate> {
    let use_dense = alpha > 0.0;
    let use_sparse = alpha < 1.0;

    let dense = if use_dense { min_max_normalize(dense) } else { Vec::new() };
    let sparse = if use_sparse { min_max_normalize(sparse) } else { Vec::new() };

    let mut by_id: AHashMap<String, (Option<f32>, Option<f32>)> =
        AHashMap::with_capacity(dense.len() + sparse.len());

    for (id, score) in dense {
        by_id.entry(id).or_insert((None, None)).0 = Some(score);
    }
    for (id, score) in sparse {
        by_id.entry(id).or_insert((None, None)).1 = Some(score);
    }

    let mut candidates: Vec<FusedCandidate> = by_id
        .into_iter()
        .map(|(chunk_id, (dense_score, sparse_score))| {
            let fused_score = alpha * dense_score.unwrap_or(0.0)
                + (1.0 - alpha) * sparse_score.unwrap_or(0.0);
            FusedCandidate {
                chunk_id,
                dense_score,
                sparse_score,
                fused_score,
            }
        })
        .collect();

    sort_candidates(&mut candidates);
    candidates
}

fn sort_candidates(candidates: &mut [FusedCandidate]) {
    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.dense_score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.dense_score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(pairs: &[(&str, f32)]) -> Vec<(String, f32)> {
        pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    #[test]
    fn normalize_maps_to_unit_interval() {
        let normalized = min_max_normalize(scored(&[("a", 2.0), ("b", 6.0), ("c", 4.0)]));
        let by_id: AHashMap<_, _> = normalized.into_iter().collect();
        assert_eq!(by_id["a"], 0.0);
        assert_eq!(by_id["b"], 1.0);
        assert!((by_id["c"] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn normalize_all_equal_maps_to_one() {
        let normalized = min_max_normalize(scored(&[("a", 3.0), ("b", 3.0)]));
        assert!(normalized.iter().all(|(_, s)| *s == 1.0));

        let singleton = min_max_normalize(scored(&[("only", -0.2)]));
        assert_eq!(singleton[0].1, 1.0);
    }

    #[test]
    fn union_with_missing_side_as_zero() {
        let fused = fuse(
            scored(&[("a", 0.9), ("b", 0.5)]),
            scored(&[("b", 10.0), ("c", 5.0), ("d", 1.0)]),
            0.5,
        );

        assert_eq!(fused.len(), 4);
        // b matched both: dense 0.0 (min), sparse 1.0 (max) -> 0.5
        let b = fused.iter().find(|f| f.chunk_id == "b").unwrap();
        assert_eq!(b.dense_score, Some(0.0));
        assert_eq!(b.sparse_score, Some(1.0));
        assert!((b.fused_score - 0.5).abs() < 1e-6);

        // c matched only sparse: the missing dense term contributes zero,
        // but the sparse term it did earn survives
        let c = fused.iter().find(|f| f.chunk_id == "c").unwrap();
        assert_eq!(c.dense_score, None);
        assert!(c.fused_score > 0.0);
        assert!((c.fused_score - 0.5 * (4.0 / 9.0)).abs() < 1e-6);
    }

    #[test]
    fn alpha_one_is_exactly_dense_ranking() {
        let dense = scored(&[("a", 0.9), ("b", 0.7), ("c", 0.3)]);
        let sparse = scored(&[("z", 99.0), ("b", 50.0)]);

        let fused = fuse(dense, sparse, 1.0);

        let order: Vec<&str> = fused.iter().map(|f| f.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        // Sparse-only candidates are not considered at all.
        assert!(fused.iter().all(|f| f.chunk_id != "z"));
        assert!(fused.iter().all(|f| f.sparse_score.is_none()));
    }

    #[test]
    fn alpha_zero_is_exactly_sparse_ranking() {
        let dense = scored(&[("z", 0.99)]);
        let sparse = scored(&[("a", 12.0), ("b", 8.0), ("c", 1.0)]);

        let fused = fuse(dense, sparse, 0.0);

        let order: Vec<&str> = fused.iter().map(|f| f.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(fused.iter().all(|f| f.dense_score.is_none()));
    }

    #[test]
    fn fusion_is_monotonic_in_dense_score() {
        let sparse = scored(&[("a", 4.0), ("b", 4.0)]);

        let before = fuse(scored(&[("a", 0.2), ("b", 0.6), ("c", 0.8)]), sparse.clone(), 0.5);
        let after = fuse(scored(&[("a", 0.7), ("b", 0.6), ("c", 0.8)]), sparse, 0.5);

        let rank = |fused: &[FusedCandidate], id: &str| {
            fused.iter().position(|f| f.chunk_id == id).unwrap()
        };
        let score = |fused: &[FusedCandidate], id: &str| {
            fused.iter().find(|f| f.chunk_id == id).unwrap().fused_score
        };

        // Raising a's dense score never lowers its fused score or its rank
        // relative to the unchanged b.
        assert!(score(&after, "a") >= score(&before, "a"));
        let a_before_b_before = rank(&before, "a") < rank(&before, "b");
        let a_before_b_after = rank(&after, "a") < rank(&after, "b");
        assert!(a_before_b_after || !a_before_b_before);
    }

    #[test]
    fn ties_break_by_dense_then_chunk_id() {
        // Same fused score, different dense contribution.
        let fused = fuse(
            scored(&[("a", 1.0), ("b", 0.0)]),
            scored(&[("a", 0.0), ("b", 1.0)]),
            0.5,
        );
        assert_eq!(fused[0].chunk_id, "a");

        // Fully tied candidates order by chunk id.
        let fused = fuse(
            scored(&[("y", 1.0), ("x", 1.0)]),
            scored(&[("y", 1.0), ("x", 1.0)]),
            0.5,
        );
        assert_eq!(fused[0].chunk_id, "x");
        assert_eq!(fused[1].chunk_id, "y");
    }

    #[test]
    fn empty_inputs_fuse_to_empty() {
        assert!(fuse(Vec::new(), Vec::new(), 0.7).is_empty());
    }
}
