//! `OpenAI` embeddings client.

use super::{Embedder, l2_normalize};
use crate::config::EmbeddingConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// `OpenAI` embeddings client (`text-embedding-3-small` by default).
///
/// Batch requests are sent as a single API call, so a batch succeeds or
/// fails atomically.
pub struct OpenAiEmbedder {
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Creates a client from configuration.
    #[must_use]
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            api_key: config.openai_api_key.clone(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: config.openai_model.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn provider_err(cause: impl Into<String>) -> Error {
        Error::Provider {
            provider: "openai".to_string(),
            cause: cause.into(),
        }
    }

    async fn request(&self, inputs: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Self::provider_err("OPENAI_API_KEY not set"))?;

        let request = EmbeddingsRequest {
            input: inputs,
            model: &self.model,
        };

        let send = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = send => response.map_err(|e| Self::provider_err(e.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(Self::provider_err(format!(
                "API returned status: {}",
                response.status()
            )));
        }

        let response: EmbeddingsResponse = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.json() => body.map_err(|e| Self::provider_err(e.to_string()))?,
        };

        let mut vectors: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();
        if vectors.len() != inputs.len() {
            return Err(Self::provider_err(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                vectors.len()
            )));
        }
        for vector in &mut vectors {
            l2_normalize(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()], cancel).await?;
        vectors
            .pop()
            .ok_or_else(|| Self::provider_err("empty embedding response"))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts, cancel).await
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingProviderKind;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: EmbeddingProviderKind::OpenAi,
            openai_api_key: None,
            openai_model: "text-embedding-3-small".to_string(),
            bedrock_model: String::new(),
            aws_region: "us-east-1".to_string(),
            aws_profile: None,
        }
    }

    #[tokio::test]
    async fn test_embed_without_key_fails() {
        let embedder = OpenAiEmbedder::from_config(&test_config());
        let result = embedder.embed("hello", &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Provider { .. })));
    }

    #[tokio::test]
    async fn test_embed_batch_empty_is_noop() {
        let embedder = OpenAiEmbedder::from_config(&test_config());
        let result = embedder
            .embed_batch(&[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_embed_honors_cancellation() {
        let embedder = OpenAiEmbedder::from_config(&test_config()).with_api_key("test-key");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = embedder.embed("hello", &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
