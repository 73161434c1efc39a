//! Configuration management.
//!
//! All environment reads happen in [`MemoryConfig::from_env`]; components
//! receive explicit config structs and never touch the environment
//! themselves.
//!
//! # Recognized environment variables
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `MEMORY_DB_PATH` | Storage file path; default `~/.claude/memory-access/memory.db` |
//! | `EMBEDDING_PROVIDER` | `openai` (default) or `bedrock` |
//! | `LLM_PROVIDER` | `anthropic` (default) or `bedrock` |
//! | `BEDROCK_EMBEDDING_MODEL` | Override the Bedrock embedding model id |
//! | `BEDROCK_LLM_MODEL` | Override the Bedrock LLM model id |
//! | `AWS_REGION`, `AWS_PROFILE` | Credentials for Bedrock clients |
//! | `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` | Credentials for the default providers |
//! | `FIRECRAWL_API_KEY` | Credentials for the default crawler |
//! | `MIN_CONFIDENCE_THRESHOLD` | Float in `[0, 1]`; default `0.5` |

use crate::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;

/// Default minimum confidence for ingestion filtering.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Default Bedrock embedding model.
pub const DEFAULT_BEDROCK_EMBEDDING_MODEL: &str = "amazon.titan-embed-text-v2:0";

/// Default Bedrock LLM model (Anthropic on Bedrock).
pub const DEFAULT_BEDROCK_LLM_MODEL: &str = "us.anthropic.claude-haiku-4-5-20251001-v1:0";

/// LLM provider selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProviderKind {
    /// Anthropic messages API (default).
    #[default]
    Anthropic,
    /// Anthropic models served through AWS Bedrock.
    Bedrock,
}

impl LlmProviderKind {
    /// Parses the `LLM_PROVIDER` selector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unrecognized values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "anthropic" => Ok(Self::Anthropic),
            "bedrock" => Ok(Self::Bedrock),
            other => Err(Error::InvalidInput(format!(
                "unrecognized LLM_PROVIDER: {other}"
            ))),
        }
    }
}

/// Embedding provider selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProviderKind {
    /// `OpenAI` embeddings API (default).
    #[default]
    OpenAi,
    /// Amazon Titan embeddings through AWS Bedrock.
    Bedrock,
}

impl EmbeddingProviderKind {
    /// Parses the `EMBEDDING_PROVIDER` selector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unrecognized values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "bedrock" => Ok(Self::Bedrock),
            other => Err(Error::InvalidInput(format!(
                "unrecognized EMBEDDING_PROVIDER: {other}"
            ))),
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Selected provider.
    pub provider: LlmProviderKind,
    /// Anthropic API key, when using the default provider.
    pub anthropic_api_key: Option<SecretString>,
    /// Bedrock model id override.
    pub bedrock_model: String,
    /// AWS region for Bedrock.
    pub aws_region: String,
    /// AWS named profile for Bedrock.
    pub aws_profile: Option<String>,
}

/// Embedding provider configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Selected provider.
    pub provider: EmbeddingProviderKind,
    /// `OpenAI` API key, when using the default provider.
    pub openai_api_key: Option<SecretString>,
    /// `OpenAI` embedding model.
    pub openai_model: String,
    /// Bedrock model id override.
    pub bedrock_model: String,
    /// AWS region for Bedrock.
    pub aws_region: String,
    /// AWS named profile for Bedrock.
    pub aws_profile: Option<String>,
}

/// Top-level configuration for the semantic memory engine.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Path to the `SQLite` storage file.
    pub db_path: PathBuf,
    /// LLM provider configuration.
    pub llm: LlmConfig,
    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,
    /// Minimum confidence; insights below are dropped at the ingestion
    /// boundary.
    pub min_confidence: f32,
    /// Credentials for the default crawler, when one is constructed by
    /// the caller.
    pub firecrawl_api_key: Option<SecretString>,
}

impl MemoryConfig {
    /// Loads configuration from the environment (and `.env`, if present).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unrecognized provider
    /// selectors or an out-of-range confidence threshold.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let db_path = std::env::var("MEMORY_DB_PATH").map_or_else(|_| default_db_path(), PathBuf::from);

        let llm_provider = match std::env::var("LLM_PROVIDER") {
            Ok(v) => LlmProviderKind::parse(&v)?,
            Err(_) => LlmProviderKind::default(),
        };
        let embedding_provider = match std::env::var("EMBEDDING_PROVIDER") {
            Ok(v) => EmbeddingProviderKind::parse(&v)?,
            Err(_) => EmbeddingProviderKind::default(),
        };

        let aws_region =
            std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let aws_profile = std::env::var("AWS_PROFILE").ok();

        let min_confidence = match std::env::var("MIN_CONFIDENCE_THRESHOLD") {
            Ok(raw) => {
                let value: f32 = raw.parse().map_err(|_| {
                    Error::InvalidInput(format!("unparseable MIN_CONFIDENCE_THRESHOLD: {raw}"))
                })?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(Error::InvalidInput(format!(
                        "MIN_CONFIDENCE_THRESHOLD out of [0, 1]: {value}"
                    )));
                }
                value
            },
            Err(_) => DEFAULT_MIN_CONFIDENCE,
        };

        Ok(Self {
            db_path,
            llm: LlmConfig {
                provider: llm_provider,
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                    .ok()
                    .map(SecretString::from),
                bedrock_model: std::env::var("BEDROCK_LLM_MODEL")
                    .unwrap_or_else(|_| DEFAULT_BEDROCK_LLM_MODEL.to_string()),
                aws_region: aws_region.clone(),
                aws_profile: aws_profile.clone(),
            },
            embedding: EmbeddingConfig {
                provider: embedding_provider,
                openai_api_key: std::env::var("OPENAI_API_KEY").ok().map(SecretString::from),
                openai_model: "text-embedding-3-small".to_string(),
                bedrock_model: std::env::var("BEDROCK_EMBEDDING_MODEL")
                    .unwrap_or_else(|_| DEFAULT_BEDROCK_EMBEDDING_MODEL.to_string()),
                aws_region,
                aws_profile,
            },
            min_confidence,
            firecrawl_api_key: std::env::var("FIRECRAWL_API_KEY")
                .ok()
                .map(SecretString::from),
        })
    }
}

/// Resolves the default storage path: `~/.claude/memory-access/memory.db`.
#[must_use]
pub fn default_db_path() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from("memory.db"),
        |dirs| {
            dirs.home_dir()
                .join(".claude")
                .join("memory-access")
                .join("memory.db")
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_selectors() {
        assert_eq!(
            LlmProviderKind::parse("anthropic").ok(),
            Some(LlmProviderKind::Anthropic)
        );
        assert_eq!(
            LlmProviderKind::parse("bedrock").ok(),
            Some(LlmProviderKind::Bedrock)
        );
        assert!(LlmProviderKind::parse("openai").is_err());

        assert_eq!(
            EmbeddingProviderKind::parse("openai").ok(),
            Some(EmbeddingProviderKind::OpenAi)
        );
        assert!(EmbeddingProviderKind::parse("anthropic").is_err());
    }

    #[test]
    fn test_default_db_path_is_home_relative() {
        let path = default_db_path();
        assert!(path.ends_with("memory.db"));
    }
}
