//! Full outer join of vector hits and lexical hits keyed by identity.

use crate::model::{Candidate, Hit, Identity};
use std::collections::HashMap;
use tracing::trace;

/// Merge vector and lexical hits into one candidate per distinct identity.
///
/// - A side that did not return an identity contributes a score of `0.0`.
/// - When both sides carry a record, the vector side's payload is kept.
/// - A duplicate identity within one side overwrites the earlier score (and
///   payload) from that side.
///
/// Output order is vector hits in input order followed by lexical-only hits in
/// input order. The ranker's stable sort preserves it for tied scores, and the
/// store-side fused statement reproduces it.
#[must_use]
pub fn merge(vector_hits: Vec<Hit>, lexical_hits: Vec<Hit>) -> Vec<Candidate> {
    let mut slots: HashMap<Identity, usize> =
        HashMap::with_capacity(vector_hits.len() + lexical_hits.len());
    let mut candidates: Vec<Candidate> = Vec::with_capacity(slots.capacity());
    // Tracks whether a candidate's payload came from the vector side.
    let mut vector_payload: Vec<bool> = Vec::with_capacity(slots.capacity());

    for hit in vector_hits {
        if let Some(&idx) = slots.get(&hit.identity) {
            trace!(identity = %hit.identity, "duplicate vector hit, last write wins");
            candidates[idx].vector_score = hit.score;
            candidates[idx].payload = hit.payload;
            continue;
        }

        slots.insert(hit.identity.clone(), candidates.len());
        candidates.push(Candidate {
            identity: hit.identity,
            payload: hit.payload,
            vector_score: hit.score,
            lexical_score: 0.0,
        });
        vector_payload.push(true);
    }

    for hit in lexical_hits {
        if let Some(&idx) = slots.get(&hit.identity) {
            candidates[idx].lexical_score = hit.score;
            if !vector_payload[idx] {
                candidates[idx].payload = hit.payload;
            }
            continue;
        }

        slots.insert(hit.identity.clone(), candidates.len());
        candidates.push(Candidate {
            identity: hit.identity,
            payload: hit.payload,
            vector_score: 0.0,
            lexical_score: hit.score,
        });
        vector_payload.push(false);
    }

    candidates
}
