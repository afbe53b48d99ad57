//! Embedding providers and the fallback gateway in front of them.
//!
//! A provider turns text into fixed-length `f32` vectors. The gateway holds an
//! ordered chain (primary first) and serves every request from exactly one
//! provider: a batch is never stitched together from two providers, since
//! their vector spaces are not comparable.

mod gateway;
mod hashing;
mod http;

use anyhow::Result;
use serde::Serialize;
use strata_core::config::{EmbeddingConfig, ProviderConfig};
use std::time::Duration;

pub use gateway::{BatchEmbedding, Embedding, EmbeddingGateway};
pub use hashing::HashingProvider;
pub use http::{OllamaProvider, OpenAiProvider};

/// Static description of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    /// Output length, when the provider knows it up front.
    pub dimensions: Option<usize>,
    /// Longest input accepted, in characters. Longer input is truncated.
    pub max_input_length: usize,
    /// Most texts accepted by one `embed_batch` call.
    pub max_batch_size: usize,
}

/// A text-to-vector backend.
pub trait EmbeddingProvider: Send + Sync {
    fn describe(&self) -> ProviderInfo;

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, one vector per input, in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if any text cannot be embedded.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Cheap readiness check (credentials present, endpoint reachable).
    fn validate(&self) -> bool;
}

/// Build one provider from its config entry.
#[must_use]
pub fn provider_from_config(config: &ProviderConfig) -> Box<dyn EmbeddingProvider> {
    match config {
        ProviderConfig::Hashing { dimensions } => Box::new(HashingProvider::new(*dimensions)),
        ProviderConfig::OpenAi {
            model,
            base_url,
            api_key_env,
            dimensions,
            timeout_secs,
        } => Box::new(OpenAiProvider::new(
            model,
            base_url,
            std::env::var(api_key_env).ok(),
            *dimensions,
            Duration::from_secs(*timeout_secs),
        )),
        ProviderConfig::Ollama {
            model,
            base_url,
            dimensions,
            timeout_secs,
        } => Box::new(OllamaProvider::new(
            model,
            base_url,
            *dimensions,
            Duration::from_secs(*timeout_secs),
        )),
    }
}

impl EmbeddingGateway {
    /// Gateway over the configured provider chain, in config order.
    #[must_use]
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.providers.iter().map(provider_from_config).collect())
    }
}
