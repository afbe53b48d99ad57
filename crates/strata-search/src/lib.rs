#![forbid(unsafe_code)]
//! strata-search library.
//!
//! Everything around the fusion engine that touches the outside world: the
//! SQLite store and its table registry, the embedding provider chain, the
//! embedding refresh queue and the hybrid query orchestrator.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for store and sync plumbing; the
//!   orchestrator and gateway return [`strata_core::SearchError`].
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod embedding;
pub mod orchestrator;
pub mod store;
pub mod sync;

pub use embedding::{Embedding, EmbeddingGateway, EmbeddingProvider, ProviderInfo};
pub use orchestrator::HybridSearcher;
pub use store::{EmbeddingSpace, SearchStore, SearchTarget, SqliteStore, TableSpec};
pub use sync::{SyncStats, sync_embeddings};
