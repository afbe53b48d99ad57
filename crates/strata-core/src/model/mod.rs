//! Candidate model shared by the store primitives, the merger and the ranker.

pub mod candidate;
pub mod identity;

pub use candidate::{Candidate, Hit, Payload, RankedResult};
pub use identity::Identity;
