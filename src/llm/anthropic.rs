//! Anthropic Claude client.

use super::{LlmHttpConfig, LlmProvider, build_http_client};
use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Anthropic Claude LLM client.
pub struct AnthropicClient {
    /// API key.
    api_key: Option<SecretString>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "claude-haiku-4-5-20251001";

    /// Creates a client from configuration.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            api_key: config.anthropic_api_key.clone(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            client: build_http_client(LlmHttpConfig::default()),
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

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    fn provider_err(cause: impl Into<String>) -> Error {
        Error::Provider {
            provider: "anthropic".to_string(),
            cause: cause.into(),
        }
    }

    async fn request(
        &self,
        messages: Vec<Message>,
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Self::provider_err("ANTHROPIC_API_KEY not set"))?;

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            messages,
        };

        let send = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
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

        let response: MessagesResponse = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.json() => body.map_err(|e| Self::provider_err(e.to_string()))?,
        };

        // Extract text from the first content block
        response
            .content
            .first()
            .and_then(|block| {
                if block.block_type == "text" {
                    Some(block.text.clone())
                } else {
                    None
                }
            })
            .ok_or_else(|| Self::provider_err("No text content in response"))
    }
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];

        self.request(messages, max_tokens, cancel).await
    }
}

/// Request to the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

/// A message in the conversation.
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

/// A content block in the response.
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
    use crate::config::LlmProviderKind;

    fn test_config() -> LlmConfig {
        LlmConfig {
            provider: LlmProviderKind::Anthropic,
            anthropic_api_key: None,
            bedrock_model: String::new(),
            aws_region: "us-east-1".to_string(),
            aws_profile: None,
        }
    }

    #[test]
    fn test_client_configuration() {
        let client = AnthropicClient::from_config(&test_config())
            .with_api_key("test-key")
            .with_endpoint("https://custom.endpoint")
            .with_model("claude-3-haiku-20240307");

        assert_eq!(client.name(), "anthropic");
        assert_eq!(client.endpoint, "https://custom.endpoint");
        assert_eq!(client.model, "claude-3-haiku-20240307");
        assert!(client.api_key.is_some());
    }

    #[tokio::test]
    async fn test_complete_without_key_fails() {
        let client = AnthropicClient::from_config(&test_config());
        let result = client
            .complete("hello", 64, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::Provider { .. })));
    }

    #[tokio::test]
    async fn test_complete_honors_cancellation() {
        let client = AnthropicClient::from_config(&test_config()).with_api_key("test-key");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.complete("hello", 64, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
