use super::{EmbeddingProvider, ProviderInfo};
use anyhow::{Result, bail};
use strata_core::SearchError;
use tracing::{debug, instrument, warn};

/// A query vector and the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub provider: String,
}

/// One vector per input text, all from the same provider.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEmbedding {
    pub vectors: Vec<Vec<f32>>,
    pub provider: String,
}

/// Ordered primary-plus-fallback provider chain.
///
/// Each request is offered to providers in order; the first one that serves
/// the whole request wins. Failures are logged and the next provider is
/// tried. No provider is retried.
pub struct EmbeddingGateway {
    providers: Vec<Box<dyn EmbeddingProvider>>,
}

impl EmbeddingGateway {
    #[must_use]
    pub fn new(providers: Vec<Box<dyn EmbeddingProvider>>) -> Self {
        Self { providers }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Descriptions of the chain, primary first.
    #[must_use]
    pub fn describe(&self) -> Vec<ProviderInfo> {
        self.providers.iter().map(|p| p.describe()).collect()
    }

    /// Readiness of every provider, primary first.
    #[must_use]
    pub fn validate(&self) -> Vec<(ProviderInfo, bool)> {
        self.providers
            .iter()
            .map(|p| (p.describe(), p.validate()))
            .collect()
    }

    /// Embed one text with the first provider that succeeds.
    ///
    /// # Errors
    ///
    /// [`SearchError::NoProviders`] for an empty chain,
    /// [`SearchError::Provider`] when a single-provider chain fails and
    /// [`SearchError::ProvidersExhausted`] when every provider of a longer
    /// chain fails.
    #[instrument(skip_all, fields(chars = text.chars().count()))]
    pub fn embed(&self, text: &str) -> Result<Embedding, SearchError> {
        let batch = self.run_chain(|provider, info| {
            let input = truncate_chars(text, info.max_input_length);
            let vector = provider.embed(input)?;
            check_vectors(info, std::slice::from_ref(&vector), 1)?;
            Ok(vec![vector])
        })?;

        let BatchEmbedding {
            mut vectors,
            provider,
        } = batch;
        let vector = vectors.pop().unwrap_or_default();
        Ok(Embedding { vector, provider })
    }

    /// Embed every text with a single provider, chunked by its batch limit.
    ///
    /// # Errors
    ///
    /// Same as [`EmbeddingGateway::embed`].
    #[instrument(skip_all, fields(texts = texts.len()))]
    pub fn embed_batch(&self, texts: &[&str]) -> Result<BatchEmbedding, SearchError> {
        if texts.is_empty() {
            let provider = self
                .providers
                .first()
                .map(|p| p.describe().name)
                .ok_or(SearchError::NoProviders)?;
            return Ok(BatchEmbedding {
                vectors: Vec::new(),
                provider,
            });
        }

        self.run_chain(|provider, info| {
            let inputs: Vec<&str> = texts
                .iter()
                .map(|text| truncate_chars(text, info.max_input_length))
                .collect();

            let mut vectors = Vec::with_capacity(inputs.len());
            for chunk in inputs.chunks(info.max_batch_size.max(1)) {
                let chunk_vectors = provider.embed_batch(chunk)?;
                check_vectors(info, &chunk_vectors, chunk.len())?;
                vectors.extend(chunk_vectors);
            }
            check_vectors(info, &vectors, inputs.len())?;
            Ok(vectors)
        })
    }

    fn run_chain<F>(&self, mut attempt: F) -> Result<BatchEmbedding, SearchError>
    where
        F: FnMut(&dyn EmbeddingProvider, &ProviderInfo) -> Result<Vec<Vec<f32>>>,
    {
        if self.providers.is_empty() {
            return Err(SearchError::NoProviders);
        }

        let mut failures: Vec<(String, String)> = Vec::new();
        for provider in &self.providers {
            let info = provider.describe();
            match attempt(provider.as_ref(), &info) {
                Ok(vectors) => {
                    if !failures.is_empty() {
                        debug!(provider = %info.name, skipped = failures.len(), "served by fallback provider");
                    }
                    return Ok(BatchEmbedding {
                        vectors,
                        provider: info.name,
                    });
                }
                Err(err) => {
                    warn!(provider = %info.name, "embedding provider failed: {err:#}");
                    failures.push((info.name, format!("{err:#}")));
                }
            }
        }

        if failures.len() == 1
            && let Some((provider, message)) = failures.pop()
        {
            return Err(SearchError::Provider { provider, message });
        }
        Err(SearchError::ProvidersExhausted {
            attempts: failures
                .into_iter()
                .map(|(provider, message)| format!("{provider}: {message}"))
                .collect(),
        })
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Count, dimensionality and finiteness checks on provider output.
fn check_vectors(info: &ProviderInfo, vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "provider returned {} embeddings for {expected} inputs",
            vectors.len()
        );
    }

    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let dims = info.dimensions.unwrap_or(first.len());
    for vector in vectors {
        if vector.is_empty() || vector.len() != dims {
            bail!(
                "embedding dimension mismatch: expected {dims}, got {}",
                vector.len()
            );
        }
        if vector.iter().any(|v| !v.is_finite()) {
            bail!("embedding contains non-finite values");
        }
    }
    Ok(())
}
