use super::Identity;
use serde::{Deserialize, Serialize};

/// Record fields returned by the store. Passed through untouched.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One row from a single-signal store primitive (vector or lexical).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub identity: Identity,
    /// Cosine similarity for vector hits, rank score for lexical hits.
    pub score: f64,
    pub payload: Payload,
}

impl Hit {
    pub fn new(identity: impl Into<Identity>, score: f64, payload: Payload) -> Self {
        Self {
            identity: identity.into(),
            score,
            payload,
        }
    }

    /// Hit with an empty payload; mostly useful in tests and benches.
    pub fn bare(identity: impl Into<Identity>, score: f64) -> Self {
        Self::new(identity, score, Payload::new())
    }
}

/// A unified record eligible for hybrid ranking.
///
/// Missing component scores are already filled with `0.0` by the merger.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub identity: Identity,
    pub payload: Payload,
    pub vector_score: f64,
    pub lexical_score: f64,
}

/// A ranked row as returned to callers.
///
/// Component scores are the raw, pre-normalization values so callers can
/// explain a ranking; `hybrid_score` is only comparable within one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub identity: Identity,
    pub payload: Payload,
    pub hybrid_score: f64,
    pub lexical_score: f64,
    pub vector_score: f64,
}
