//! Embedding generation.
//!
//! Dense-vector providers with unconditional unit normalization: even
//! when the upstream provider already normalizes, vectors are
//! re-normalized here so downstream code can assume `‖v‖ = 1`.

mod bedrock;
mod openai;

pub use bedrock::BedrockEmbedder;
pub use openai::OpenAiEmbedder;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Trait for embedding generators.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a unit-normalized embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Provider`] if generation fails, or
    /// [`crate::Error::Cancelled`] if the token fires first.
    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>>;

    /// Generates unit-normalized embeddings for multiple texts.
    ///
    /// Row order matches input order; the call succeeds or fails as a
    /// whole.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Provider`] if generation fails, or
    /// [`crate::Error::Cancelled`] if the token fires first.
    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>>;
}

/// Normalizes a vector to unit length in place. Zero vectors are left
/// untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Creates the configured embedding provider.
///
/// # Errors
///
/// Returns an error if the provider cannot be constructed.
pub async fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::from_config(config))),
        EmbeddingProviderKind::Bedrock => Ok(Arc::new(BedrockEmbedder::from_config(config).await)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_l2_normalize_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_l2_normalize_unit_vector_stable() {
        let mut v = vec![1.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![1.0, 0.0]);
    }
}
