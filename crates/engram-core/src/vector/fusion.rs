//! Multi-query fusion strategies for `search_multi`.

use std::collections::HashMap;

/// How per-sub-query hits are combined into one ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMethod {
    WeightedMax,
    WeightedSum,
    Rrf,
}

/// L1-normalize a weight vector; an all-zero input is spread evenly.
pub fn normalize_weights(weights: &[f32]) -> Vec<f32> {
    let sum: f32 = weights.iter().sum();
    if sum <= 0.0 {
        let n = weights.len().max(1) as f32;
        return vec![1.0 / n; weights.len()];
    }
    weights.iter().map(|w| w / sum).collect()
}

/// One sub-query's ranked hits: `(id, similarity)`, already sorted by rank.
pub type SubqueryHits = Vec<(String, f32)>;

/// Fuse per-sub-query hit lists into one `id -> fused_score` map.
pub fn fuse(hits: &[SubqueryHits], weights: &[f32], method: FusionMethod) -> HashMap<String, f32> {
    let weights = normalize_weights(weights);
    let mut appearances: HashMap<String, u32> = HashMap::new();
    let mut fused: HashMap<String, f32> = HashMap::new();

    match method {
        FusionMethod::WeightedMax => {
            for (sub, w) in hits.iter().zip(weights.iter()) {
                for (id, sim) in sub {
                    *appearances.entry(id.clone()).or_insert(0) += 1;
                    let weighted = sim * w;
                    let entry = fused.entry(id.clone()).or_insert(f32::MIN);
                    if weighted > *entry {
                        *entry = weighted;
                    }
                }
            }
            for (id, score) in fused.iter_mut() {
                let n = *appearances.get(id).unwrap_or(&1) as f32;
                *score += 0.05 * n;
            }
        }
        FusionMethod::WeightedSum => {
            for (sub, w) in hits.iter().zip(weights.iter()) {
                for (id, sim) in sub {
                    *fused.entry(id.clone()).or_insert(0.0) += sim * w;
                }
            }
        }
        FusionMethod::Rrf => {
            const K: f32 = 60.0;
            for (sub, w) in hits.iter().zip(weights.iter()) {
                for (rank, (id, _sim)) in sub.iter().enumerate() {
                    *fused.entry(id.clone()).or_insert(0.0) += w / (rank as f32 + K);
                }
            }
        }
    }
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_sums_to_one() {
        let w = normalize_weights(&[0.5, 1.0, 1.5]);
        let sum: f32 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn weighted_max_rewards_multi_appearance() {
        let hits = vec![
            vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)],
            vec![("a".to_string(), 0.8)],
        ];
        let fused = fuse(&hits, &[1.0, 1.0], FusionMethod::WeightedMax);
        // a appears twice, should outrank a single-appearance equal-similarity item.
        assert!(fused["a"] > fused["b"]);
    }

    #[test]
    fn rrf_favors_top_ranks() {
        let hits = vec![vec![
            ("first".to_string(), 0.99),
            ("second".to_string(), 0.2),
        ]];
        let fused = fuse(&hits, &[1.0], FusionMethod::Rrf);
        assert!(fused["first"] > fused["second"]);
    }
}
