//! Knowledge-base types.

use super::Frame;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a knowledge base was populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KbSourceType {
    /// Multi-page site crawl.
    Crawl,
    /// Single-page scrape.
    Scrape,
    /// Local file import.
    File,
    /// Raw text.
    Text,
}

impl KbSourceType {
    /// Returns the source type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::Scrape => "scrape",
            Self::File => "file",
            Self::Text => "text",
        }
    }

    /// Parses a source type from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values outside the closed set.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "crawl" => Ok(Self::Crawl),
            "scrape" => Ok(Self::Scrape),
            "file" => Ok(Self::File),
            "text" => Ok(Self::Text),
            other => Err(Error::InvalidInput(format!(
                "unknown knowledge base source type: {other}"
            ))),
        }
    }
}

impl fmt::Display for KbSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named collection of document chunks from an external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// Row id.
    pub id: String,
    /// Unique name (slug).
    pub name: String,
    /// Optional description.
    pub description: String,
    /// How this KB was populated.
    pub source_type: KbSourceType,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A normalized chunk from a knowledge base document.
///
/// Identical in shape to [`super::Insight`] except that `kb_id` replaces
/// `source` and `source_url` records the originating page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbChunk {
    /// Row id (assigned at insert when `None`).
    pub id: Option<String>,
    /// Owning knowledge base id.
    pub kb_id: String,
    /// Verbatim input atom.
    pub text: String,
    /// Canonical rewrite under the frame's template.
    pub normalized_text: String,
    /// Semantic frame.
    pub frame: Frame,
    /// Caller-supplied domain labels.
    pub domains: Vec<String>,
    /// Extracted entities.
    pub entities: Vec<String>,
    /// Extracted problems.
    pub problems: Vec<String>,
    /// Extracted resolutions.
    pub resolutions: Vec<String>,
    /// Extracted situational contexts.
    pub contexts: Vec<String>,
    /// Deterministic confidence score in `[0, 1]`.
    pub confidence: f32,
    /// URL of the page this chunk came from.
    pub source_url: String,
    /// Creation timestamp (assigned at insert).
    pub created_at: Option<DateTime<Utc>>,
    /// Last-update timestamp (assigned at insert).
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single page returned by a crawl service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawledPage {
    /// Page URL.
    pub url: String,
    /// Page content as markdown.
    pub markdown: String,
    /// Provider metadata (e.g. `sourceURL`, `title`).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_round_trip() {
        for st in [
            KbSourceType::Crawl,
            KbSourceType::Scrape,
            KbSourceType::File,
            KbSourceType::Text,
        ] {
            assert_eq!(KbSourceType::parse(st.as_str()).ok(), Some(st));
        }
        assert!(KbSourceType::parse("rss").is_err());
    }
}
