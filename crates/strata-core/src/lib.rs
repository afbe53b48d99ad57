#![forbid(unsafe_code)]
//! strata-core library.
//!
//! Pure fusion engine: candidate model, score normalization, result merging
//! and hybrid ranking. Nothing in this crate performs I/O except config
//! loading.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for plumbing; [`error::SearchError`] is
//!   the typed error surfaced to search callers.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod error;
pub mod fusion;
pub mod model;

pub use config::{Dispatch, SearchOptions};
pub use error::{ErrorCode, SearchError};
pub use fusion::{Normalization, apply_cutoff, merge, normalize, rank};
pub use model::{Candidate, Hit, Identity, Payload, RankedResult};
