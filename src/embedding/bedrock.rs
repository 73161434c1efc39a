//! Amazon Titan embeddings through AWS Bedrock.

use super::{Embedder, l2_normalize};
use crate::config::EmbeddingConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_bedrockruntime::primitives::Blob;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Maximum in-flight `InvokeModel` calls for a batch.
const BATCH_CONCURRENCY: usize = 10;

/// Bedrock Titan embeddings client.
///
/// Titan takes one text per `InvokeModel` call, so batches fan out through
/// an order-preserving pool of at most [`BATCH_CONCURRENCY`] in-flight
/// requests; any single failure fails the whole batch.
pub struct BedrockEmbedder {
    client: aws_sdk_bedrockruntime::Client,
    model: String,
}

impl BedrockEmbedder {
    /// Creates a client from configuration, resolving AWS credentials
    /// from the configured region/profile.
    pub async fn from_config(config: &EmbeddingConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws_region.clone()));
        if let Some(profile) = &config.aws_profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        Self {
            client: aws_sdk_bedrockruntime::Client::new(&sdk_config),
            model: config.bedrock_model.clone(),
        }
    }

    fn provider_err(cause: impl Into<String>) -> Error {
        Error::Provider {
            provider: "bedrock".to_string(),
            cause: cause.into(),
        }
    }

    async fn invoke(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let body = serde_json::to_vec(&TitanRequest { input_text: text })
            .map_err(|e| Self::provider_err(e.to_string()))?;

        let send = self
            .client
            .invoke_model()
            .model_id(&self.model)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = send => response.map_err(|e| Self::provider_err(e.to_string()))?,
        };

        let parsed: TitanResponse = serde_json::from_slice(response.body().as_ref())
            .map_err(|e| Self::provider_err(format!("invalid response body: {e}")))?;

        let mut vector = parsed.embedding;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for BedrockEmbedder {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        self.invoke(text, cancel).await
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        // buffered() keeps result order aligned with input order
        let results: Vec<Result<Vec<f32>>> = futures::stream::iter(texts.to_vec())
            .map(|text: String| async move { self.invoke(text.as_str(), cancel).await })
            .buffered(BATCH_CONCURRENCY)
            .collect()
            .await;

        results.into_iter().collect()
    }
}

/// Titan request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TitanRequest<'a> {
    input_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TitanResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(TitanRequest { input_text: "hi" }).unwrap();
        assert_eq!(body["inputText"], "hi");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"embedding": [0.5, 0.5], "inputTextTokenCount": 2}"#;
        let parsed: TitanResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.embedding.len(), 2);
    }
}
