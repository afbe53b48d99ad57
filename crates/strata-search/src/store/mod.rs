//! Store primitives the orchestrator fuses.
//!
//! A store exposes two single-signal queries (vector and lexical) and may
//! additionally expose a fused statement that performs min-max hybrid scoring
//! itself. Row ordering contracts:
//!
//! - vector and lexical rows: score descending, identity ascending on ties
//! - fused rows: hybrid descending, then vector rows before lexical-only rows
//!   (the order the client-side merger produces)

pub mod schema;
pub mod sqlite;

use anyhow::{Result, bail};
use strata_core::{Hit, RankedResult};

pub use schema::{EmbeddingSpace, Registration, RegistryError, TableSpec};
pub use sqlite::SqliteStore;

/// The table a search runs against and the field holding its searchable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTarget {
    pub table: String,
    pub content_field: String,
}

impl SearchTarget {
    pub fn new(table: impl Into<String>, content_field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            content_field: content_field.into(),
        }
    }
}

/// Nearest neighbours of `vector` by cosine similarity.
///
/// Only embeddings written by `provider` with the vector's width are
/// comparable; a store holding any other embedding for the target fails the
/// query instead of returning an empty window.
#[derive(Debug, Clone, Copy)]
pub struct VectorQuery<'a> {
    pub target: &'a SearchTarget,
    pub vector: &'a [f32],
    /// Provider that produced `vector`.
    pub provider: &'a str,
    pub k: usize,
}

/// Full-text matches of `text` ranked by lexical relevance.
#[derive(Debug, Clone, Copy)]
pub struct LexicalQuery<'a> {
    pub target: &'a SearchTarget,
    pub text: &'a str,
    pub k: usize,
}

/// Both primitives plus min-max fusion in one round trip.
#[derive(Debug, Clone, Copy)]
pub struct FusedQuery<'a> {
    pub target: &'a SearchTarget,
    pub vector: &'a [f32],
    /// Provider that produced `vector`.
    pub provider: &'a str,
    pub text: &'a str,
    pub alpha: f64,
    pub beta: f64,
    /// Window per side, before fusion.
    pub k: usize,
}

/// Backend able to answer hybrid search primitives.
///
/// Implementations must be `Sync`: the client-side path may run the vector
/// and lexical queries on two threads at once.
pub trait SearchStore: Sync {
    /// Up to `k` hits by cosine similarity, descending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be executed.
    fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<Hit>>;

    /// Up to `k` hits matching the full-text predicate, descending score.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be executed.
    fn lexical_search(&self, query: &LexicalQuery<'_>) -> Result<Vec<Hit>>;

    /// Whether [`SearchStore::fused_search`] is available.
    fn supports_fused(&self) -> bool {
        false
    }

    /// Min-max fused hybrid rows over both windows, unfiltered and uncut.
    ///
    /// # Errors
    ///
    /// Returns an error if the store has no fused primitive or the statement
    /// fails.
    fn fused_search(&self, query: &FusedQuery<'_>) -> Result<Vec<RankedResult>> {
        bail!(
            "store cannot fuse queries for table {}",
            query.target.table
        )
    }
}
