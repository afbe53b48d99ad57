//! Offline feature-hashing embedder.
//!
//! Every lower-cased alphanumeric term is hashed with SHA-256; the first eight
//! digest bytes pick a bucket and the ninth picks a sign. The bucket vector is
//! L2-normalized, so cosine similarity reduces to weighted term overlap. Useful
//! as a deterministic fallback and in tests; it has no notion of synonyms.

use super::{EmbeddingProvider, ProviderInfo};
use anyhow::{Result, bail};
use sha2::{Digest, Sha256};

const MAX_INPUT_CHARS: usize = 32_768;
const MAX_BATCH_SIZE: usize = 1_024;

pub struct HashingProvider {
    dimensions: usize,
}

impl HashingProvider {
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

fn bucket_and_sign(term: &str, dimensions: usize) -> (usize, f32) {
    let digest = Sha256::digest(term.as_bytes());
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    let hash = u64::from_le_bytes(head);
    // Modulo keeps the value below `dimensions`, which came from a usize.
    #[allow(clippy::cast_possible_truncation)]
    let bucket = (hash % dimensions as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    (bucket, sign)
}

impl EmbeddingProvider for HashingProvider {
    fn describe(&self) -> ProviderInfo {
        ProviderInfo {
            name: "hashing".to_string(),
            model: "sha256-feature-hash".to_string(),
            dimensions: Some(self.dimensions),
            max_input_length: MAX_INPUT_CHARS,
            max_batch_size: MAX_BATCH_SIZE,
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimensions == 0 {
            bail!("hashing provider configured with zero dimensions");
        }

        let mut vector = vec![0.0_f32; self.dimensions];
        let mut terms = 0_usize;
        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|term| !term.is_empty())
        {
            let (bucket, sign) = bucket_and_sign(&term.to_lowercase(), self.dimensions);
            vector[bucket] += sign;
            terms += 1;
        }

        if terms == 0 {
            bail!("text has no indexable terms");
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            bail!("term hashes cancelled out to a zero vector");
        }
        for value in &mut vector {
            *value /= norm;
        }
        Ok(vector)
    }

    fn validate(&self) -> bool {
        self.dimensions > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn output_is_unit_length_and_deterministic() {
        let provider = HashingProvider::new(64);
        let a = provider.embed("Rust ownership and borrowing").expect("embed");
        let b = provider.embed("rust OWNERSHIP and borrowing").expect("embed");

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_terms_raise_similarity() {
        let provider = HashingProvider::new(256);
        let query = provider.embed("sqlite full text search").expect("embed");
        let close = provider.embed("full text search in sqlite").expect("embed");
        let far = provider.embed("tomatoes need sunlight").expect("embed");
        assert!(dot(&query, &close) > dot(&query, &far));
    }

    #[test]
    fn text_without_terms_is_rejected() {
        let provider = HashingProvider::new(16);
        assert!(provider.embed("  ?! -- ").is_err());
        assert!(provider.embed("").is_err());
    }

    #[test]
    fn zero_dimensions_fail_validation() {
        let provider = HashingProvider::new(0);
        assert!(!provider.validate());
        assert!(provider.embed("anything").is_err());
    }
}
