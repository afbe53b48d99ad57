//! Fusion of vector and lexical result sets into one hybrid ranking.
//!
//! The pipeline is `merge` → `normalize` (per column) → weighted sum →
//! `apply_cutoff` (threshold, stable sort, top-k). Every step is pure and
//! total: empty input yields empty output and degenerate statistics map to
//! documented constants instead of errors.

pub mod merge;
pub mod normalize;
pub mod rank;

pub use merge::merge;
pub use normalize::{Normalization, normalize};
pub use rank::{apply_cutoff, hybrid_scores, rank};
