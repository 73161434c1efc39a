//! LLM client abstraction.
//!
//! Provides a unified interface over the supported providers:
//!
//! | Provider | Client | Credentials |
//! |----------|--------|-------------|
//! | Anthropic | [`AnthropicClient`] | `ANTHROPIC_API_KEY` |
//! | Bedrock | [`BedrockLlmClient`] | `AWS_REGION`, `AWS_PROFILE` |
//!
//! Clients are async; every call takes a [`CancellationToken`] that is
//! raced against the in-flight request, so cancellation propagates to the
//! network layer at the next await point.

mod anthropic;
mod bedrock;

pub use anthropic::AnthropicClient;
pub use bedrock::BedrockLlmClient;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Provider`] if the completion fails, or
    /// [`crate::Error::Cancelled`] if the token fires first.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// HTTP client configuration for LLM requests.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

/// Builds an async HTTP client for LLM requests with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::Client::new()
    })
}

/// Creates the configured LLM provider.
///
/// # Errors
///
/// Returns an error if the provider cannot be constructed.
pub async fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider {
        LlmProviderKind::Anthropic => Ok(Arc::new(AnthropicClient::from_config(config))),
        LlmProviderKind::Bedrock => Ok(Arc::new(BedrockLlmClient::from_config(config).await)),
    }
}

/// Extracts JSON from an LLM response, handling markdown code fences.
///
/// # Handling
///
/// 1. Markdown code blocks with a `json` language marker
/// 2. Markdown code blocks without a language marker
/// 3. Raw JSON objects (first `{` to last `}`)
/// 4. JSON arrays (first `[` to last `]`)
///
/// Returns the trimmed input when no JSON is found.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // Handle ```json ... ``` blocks
    if let Some((json_start, end)) = trimmed.find("```json").and_then(|start| {
        let json_start = start + 7;
        trimmed[json_start..]
            .find("```")
            .map(|end| (json_start, end))
    }) {
        return trimmed[json_start..json_start + end].trim();
    }

    // Handle ``` ... ``` blocks (without json marker)
    if let Some((json_start, end)) = trimmed.find("```").and_then(|start| {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find(['{', '['])
            .map_or(content_start, |pos| content_start + pos);
        trimmed[json_start..]
            .find("```")
            .map(|end| (json_start, end))
    }) {
        return trimmed[json_start..json_start + end].trim();
    }

    // Raw JSON object (first { to last })
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    // JSON array (decompose responses)
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    trimmed
}

/// Truncates an LLM response for inclusion in an error cause.
pub(crate) fn truncate_for_error(response: &str) -> String {
    const MAX_CHARS: usize = 200;
    if response.chars().count() > MAX_CHARS {
        let truncated: String = response.chars().take(MAX_CHARS).collect();
        format!("{truncated}...(truncated)")
    } else {
        response.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        let response = r#"{"key": "value"}"#;
        assert_eq!(extract_json_from_response(response), r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_markdown() {
        let response = "```json\n{\"key\": \"value\"}\n```";
        assert!(extract_json_from_response(response).contains("\"key\""));
    }

    #[test]
    fn test_extract_json_with_prefix() {
        let response = "Here is the result: {\"key\": \"value\"} hope this helps";
        assert_eq!(extract_json_from_response(response), r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_array() {
        let response = "```\n[\"one atom\", \"another atom\"]\n```";
        assert_eq!(
            extract_json_from_response(response),
            r#"["one atom", "another atom"]"#
        );
    }

    #[test]
    fn test_extract_json_bare_array() {
        let response = r#"["tag1", "tag2"]"#;
        assert_eq!(extract_json_from_response(response), r#"["tag1", "tag2"]"#);
    }

    #[test]
    fn test_truncate_for_error() {
        let short = "short response";
        assert_eq!(truncate_for_error(short), short);

        let long = "x".repeat(500);
        let truncated = truncate_for_error(&long);
        assert!(truncated.len() < 500);
        assert!(truncated.ends_with("...(truncated)"));
    }
}
