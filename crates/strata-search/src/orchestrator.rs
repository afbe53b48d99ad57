//! Hybrid query orchestration.
//!
//! One search embeds the query text once, then takes one of two paths:
//!
//! - **store-side**: min-max normalization with store fusion enabled and a
//!   store that can fuse. One combined statement returns pre-fused rows and
//!   only the threshold/top-k cut runs here.
//! - **client-side**: everything else. The vector and lexical windows are
//!   fetched separately, merged, normalized and ranked in process.
//!
//! Both paths return the same identities in the same order for min-max.
//! Any failure fails the whole search; a single-signal result is never
//! returned in place of a hybrid one. That includes a query embedded by a
//! fallback provider whose vectors the table does not hold: the store fails
//! the vector query rather than returning an empty window.

use crate::embedding::{Embedding, EmbeddingGateway};
use crate::store::{FusedQuery, LexicalQuery, SearchStore, SearchTarget, VectorQuery};
use anyhow::anyhow;
use std::thread::{self, ScopedJoinHandle};
use strata_core::{Dispatch, Hit, RankedResult, SearchError, SearchOptions, apply_cutoff, merge, rank};
use tracing::{debug, instrument, warn};

/// Borrowing front end over a store and an embedding gateway.
///
/// Holds no mutable state; one searcher may serve any number of calls.
#[derive(Clone, Copy)]
pub struct HybridSearcher<'a> {
    store: &'a dyn SearchStore,
    gateway: &'a EmbeddingGateway,
}

impl<'a> HybridSearcher<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn SearchStore, gateway: &'a EmbeddingGateway) -> Self {
        Self { store, gateway }
    }

    /// Rank the rows of `target` against `text`.
    ///
    /// # Errors
    ///
    /// - [`SearchError::InvalidOptions`] before anything else runs.
    /// - Gateway errors when the query cannot be embedded. No store query is
    ///   issued in that case.
    /// - [`SearchError::VectorQuery`], [`SearchError::LexicalQuery`] or
    ///   [`SearchError::FusedQuery`] when a store primitive fails.
    #[instrument(skip_all, fields(table = %target.table, top_k = options.top_k))]
    pub fn search(
        &self,
        target: &SearchTarget,
        text: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RankedResult>, SearchError> {
        options.validate()?;

        let embedding = self.gateway.embed(text)?;
        debug!(
            provider = %embedding.provider,
            dimensions = embedding.vector.len(),
            "query embedded"
        );

        if options.wants_store_fusion() && self.store.supports_fused() {
            self.search_store_side(target, text, &embedding, options)
        } else {
            self.search_client_side(target, text, &embedding, options)
        }
    }

    /// Fused statement in the store, then the threshold/top-k cut.
    ///
    /// # Errors
    ///
    /// [`SearchError::InvalidOptions`] or [`SearchError::FusedQuery`].
    pub fn search_store_side(
        &self,
        target: &SearchTarget,
        text: &str,
        embedding: &Embedding,
        options: &SearchOptions,
    ) -> Result<Vec<RankedResult>, SearchError> {
        options.validate()?;

        let rows = self
            .store
            .fused_search(&FusedQuery {
                target,
                vector: &embedding.vector,
                provider: &embedding.provider,
                text,
                alpha: options.alpha,
                beta: options.beta,
                k: options.candidate_window(),
            })
            .map_err(SearchError::FusedQuery)?;

        debug!(rows = rows.len(), path = "store", "fused rows received");
        Ok(apply_cutoff(rows, options.threshold, options.top_k))
    }

    /// Separate vector and lexical windows, merged and ranked in process.
    ///
    /// # Errors
    ///
    /// [`SearchError::InvalidOptions`], [`SearchError::VectorQuery`] or
    /// [`SearchError::LexicalQuery`].
    pub fn search_client_side(
        &self,
        target: &SearchTarget,
        text: &str,
        embedding: &Embedding,
        options: &SearchOptions,
    ) -> Result<Vec<RankedResult>, SearchError> {
        options.validate()?;

        let k = options.candidate_window();
        let vector_query = VectorQuery {
            target,
            vector: &embedding.vector,
            provider: &embedding.provider,
            k,
        };
        let lexical_query = LexicalQuery { target, text, k };

        let (vector_hits, lexical_hits) = match options.dispatch {
            Dispatch::Sequential => {
                let vector_hits = self
                    .store
                    .vector_search(&vector_query)
                    .map_err(SearchError::VectorQuery)?;
                let lexical_hits = self
                    .store
                    .lexical_search(&lexical_query)
                    .map_err(SearchError::LexicalQuery)?;
                (vector_hits, lexical_hits)
            }
            Dispatch::Concurrent => self.fetch_concurrently(&vector_query, &lexical_query)?,
        };

        debug!(
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            path = "client",
            dispatch = %options.dispatch,
            "candidate windows received"
        );
        Ok(rank(merge(vector_hits, lexical_hits), options))
    }

    fn fetch_concurrently(
        &self,
        vector_query: &VectorQuery<'_>,
        lexical_query: &LexicalQuery<'_>,
    ) -> Result<(Vec<Hit>, Vec<Hit>), SearchError> {
        let store = self.store;
        let (vector, lexical) = thread::scope(|scope| {
            let vector = scope.spawn(|| store.vector_search(vector_query));
            let lexical = scope.spawn(|| store.lexical_search(lexical_query));
            (join_query(vector, "vector"), join_query(lexical, "lexical"))
        });

        match (vector, lexical) {
            (Ok(vector_hits), Ok(lexical_hits)) => Ok((vector_hits, lexical_hits)),
            (Err(vector_err), lexical) => {
                if let Err(lexical_err) = lexical {
                    warn!("lexical query also failed: {lexical_err:#}");
                }
                Err(SearchError::VectorQuery(vector_err))
            }
            (Ok(_), Err(lexical_err)) => Err(SearchError::LexicalQuery(lexical_err)),
        }
    }
}

fn join_query(
    handle: ScopedJoinHandle<'_, anyhow::Result<Vec<Hit>>>,
    side: &str,
) -> anyhow::Result<Vec<Hit>> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("{side} query panicked")))
}
