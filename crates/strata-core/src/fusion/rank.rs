//! Weighted combination, threshold and top-k cut.

use super::normalize::normalize;
use crate::config::SearchOptions;
use crate::model::{Candidate, RankedResult};
use std::cmp::Ordering;
use tracing::debug;

/// Hybrid score per candidate, in candidate order.
///
/// `hybrid[i] = alpha * norm(lexical)[i] + beta * norm(vector)[i]`, with each
/// column normalized on its own statistics.
#[must_use]
// Same evaluation order as the fused SQL statement, so both paths agree bitwise.
#[allow(clippy::suboptimal_flops)]
pub fn hybrid_scores(candidates: &[Candidate], options: &SearchOptions) -> Vec<f64> {
    let vector: Vec<f64> = candidates.iter().map(|c| c.vector_score).collect();
    let lexical: Vec<f64> = candidates.iter().map(|c| c.lexical_score).collect();

    let norm_vector = normalize(&vector, options.normalization);
    let norm_lexical = normalize(&lexical, options.normalization);

    norm_lexical
        .iter()
        .zip(&norm_vector)
        .map(|(lex, vec)| options.alpha * lex + options.beta * vec)
        .collect()
}

/// Rank merged candidates into the final result list.
///
/// Raw component scores are carried through unchanged; only `hybrid_score`
/// reflects normalization.
#[must_use]
pub fn rank(candidates: Vec<Candidate>, options: &SearchOptions) -> Vec<RankedResult> {
    let scores = hybrid_scores(&candidates, options);

    let results: Vec<RankedResult> = candidates
        .into_iter()
        .zip(scores)
        .map(|(candidate, hybrid_score)| RankedResult {
            identity: candidate.identity,
            payload: candidate.payload,
            hybrid_score,
            lexical_score: candidate.lexical_score,
            vector_score: candidate.vector_score,
        })
        .collect();

    apply_cutoff(results, options.threshold, options.top_k)
}

/// Drop results below `threshold`, stable-sort by hybrid score descending and
/// keep at most `top_k`.
///
/// A score equal to the threshold is kept. Ties keep their input order.
#[must_use]
pub fn apply_cutoff(
    mut results: Vec<RankedResult>,
    threshold: f64,
    top_k: usize,
) -> Vec<RankedResult> {
    let before = results.len();
    results.retain(|r| r.hybrid_score >= threshold);

    // `sort_by` is stable; `partial_cmp` keeps 0.0 and -0.0 tied.
    results.sort_by(|a, b| {
        b.hybrid_score
            .partial_cmp(&a.hybrid_score)
            .unwrap_or(Ordering::Equal)
    });
    results.truncate(top_k);

    debug!(
        candidates = before,
        kept = results.len(),
        threshold,
        top_k,
        "applied hybrid cutoff"
    );
    results
}
