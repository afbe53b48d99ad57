use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use strata_core::fusion::hybrid_scores;
use strata_core::{Hit, Normalization, SearchOptions, merge, normalize, rank};

fn arb_hits(max_score: f64) -> impl Strategy<Value = Vec<Hit>> {
    prop::collection::vec((0u8..24, 0.0..max_score), 0..16).prop_map(|rows| {
        rows.into_iter()
            .map(|(id, score)| Hit::bare(format!("doc-{id}"), score))
            .collect()
    })
}

fn arb_normalization() -> impl Strategy<Value = Normalization> {
    prop_oneof![
        Just(Normalization::None),
        Just(Normalization::MinMax),
        Just(Normalization::ZScore),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn min_max_non_constant_spans_unit_interval(
        values in prop::collection::vec(-1.0e6..1.0e6f64, 2..64)
    ) {
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assume!(hi > lo);

        let out = normalize(&values, Normalization::MinMax);
        prop_assert_eq!(out.len(), values.len());
        prop_assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        prop_assert!(out.contains(&0.0));
        prop_assert!(out.contains(&1.0));
    }

    #[test]
    fn constant_columns_hit_documented_constants(
        value in -1.0e6..1.0e6f64,
        len in 1usize..32,
    ) {
        let values = vec![value; len];
        prop_assert_eq!(normalize(&values, Normalization::MinMax), vec![1.0; len]);
        prop_assert_eq!(normalize(&values, Normalization::ZScore), vec![0.0; len]);
    }

    #[test]
    fn merge_yields_one_candidate_per_identity(
        vector in arb_hits(1.0),
        lexical in arb_hits(40.0),
    ) {
        let union: HashSet<String> = vector
            .iter()
            .chain(&lexical)
            .map(|h| h.identity.to_string())
            .collect();

        let merged = merge(vector, lexical);
        let seen: HashSet<String> = merged.iter().map(|c| c.identity.to_string()).collect();

        prop_assert_eq!(merged.len(), union.len());
        prop_assert_eq!(seen, union);
    }

    #[test]
    fn raising_beta_never_hurts_the_stronger_vector_candidate(
        vector in arb_hits(1.0),
        lexical in arb_hits(40.0),
        alpha in 0.0..2.0f64,
        beta in 0.0..2.0f64,
        raise in 0.0..2.0f64,
        normalization in arb_normalization(),
    ) {
        let candidates = merge(vector, lexical);
        let low = SearchOptions { alpha, beta, normalization, ..SearchOptions::default() };
        let high = SearchOptions { beta: beta + raise, ..low };

        let vector_column: Vec<f64> = candidates.iter().map(|c| c.vector_score).collect();
        let norm_vector = normalize(&vector_column, normalization);
        let before = hybrid_scores(&candidates, &low);
        let after = hybrid_scores(&candidates, &high);

        for i in 0..candidates.len() {
            for j in 0..candidates.len() {
                if norm_vector[i] > norm_vector[j] {
                    let gap_before = before[i] - before[j];
                    let gap_after = after[i] - after[j];
                    prop_assert!(gap_after >= gap_before - 1e-9);
                }
            }
        }
    }

    #[test]
    fn ranking_honors_threshold_top_k_and_stable_order(
        vector in arb_hits(1.0),
        lexical in arb_hits(40.0),
        alpha in 0.0..1.0f64,
        beta in 0.0..1.0f64,
        threshold in -1.0..1.0f64,
        top_k in 1usize..12,
        normalization in arb_normalization(),
    ) {
        let candidates = merge(vector, lexical);
        let merge_position: HashMap<String, usize> = candidates
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.identity.to_string(), idx))
            .collect();

        let options = SearchOptions {
            alpha,
            beta,
            threshold,
            top_k,
            normalization,
            ..SearchOptions::default()
        };
        let ranked = rank(candidates, &options);

        prop_assert!(ranked.len() <= top_k);
        prop_assert!(ranked.iter().all(|r| r.hybrid_score >= threshold));
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].hybrid_score >= pair[1].hybrid_score);
            if pair[0].hybrid_score == pair[1].hybrid_score {
                let first = merge_position[pair[0].identity.as_str()];
                let second = merge_position[pair[1].identity.as_str()];
                prop_assert!(first < second);
            }
        }
    }
}

#[test]
fn empty_inputs_rank_to_empty_for_every_method() {
    for normalization in [
        Normalization::None,
        Normalization::MinMax,
        Normalization::ZScore,
    ] {
        let options = SearchOptions {
            normalization,
            threshold: f64::MIN,
            ..SearchOptions::default()
        };
        assert!(rank(merge(Vec::new(), Vec::new()), &options).is_empty());
    }
}
