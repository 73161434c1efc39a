//! Anthropic models served through AWS Bedrock.

use super::LlmProvider;
use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_bedrockruntime::primitives::Blob;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Bedrock LLM client invoking Anthropic models via `InvokeModel`.
pub struct BedrockLlmClient {
    client: aws_sdk_bedrockruntime::Client,
    model: String,
}

impl BedrockLlmClient {
    /// Creates a client from configuration, resolving AWS credentials
    /// from the configured region/profile.
    pub async fn from_config(config: &LlmConfig) -> Self {
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
}

#[async_trait]
impl LlmProvider for BedrockLlmClient {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = serde_json::to_vec(&InvokeRequest {
            anthropic_version: "bedrock-2023-05-31",
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        })
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

        let parsed: InvokeResponse = serde_json::from_slice(response.body().as_ref())
            .map_err(|e| Self::provider_err(format!("invalid response body: {e}")))?;

        parsed
            .content
            .into_iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text)
            .ok_or_else(|| Self::provider_err("No text content in response"))
    }
}

/// Anthropic-on-Bedrock request body.
#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(InvokeRequest {
            anthropic_version: "bedrock-2023-05-31",
            max_tokens: 512,
            messages: vec![Message {
                role: "user",
                content: "hello",
            }],
        })
        .unwrap();
        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"content": [{"type": "text", "text": "an answer"}]}"#;
        let parsed: InvokeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content[0].text, "an answer");
    }
}
