//! Knowledge-base ingestion: crawl → clean → chunk → normalize →
//! batch-embed → store.
//!
//! Pages are processed sequentially (progress reporting depends on it);
//! chunks within a page are normalized sequentially but embedded in one
//! batch call per page. A chunk that fails normalization is logged and
//! skipped; the rest of the page proceeds.

use crate::embedding::Embedder;
use crate::models::{CrawledPage, KbChunk};
use crate::normalize::Normalizer;
use crate::storage::InsightStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default maximum chunk size in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 4000;

/// Feedback-footer markers; content from the first matching line on is
/// dropped during cleaning.
const FOOTER_MARKERS: &[&str] = &[
    "Did you find this page useful",
    "Thanks for rating this page",
    "Report a problem on this page",
];

/// Progress callback: `(current, total, url)`, invoked once per page.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize, &str) + Send + Sync);

/// A crawl provider yielding `(url, markdown)` pages.
///
/// The crawler itself is an external collaborator; this crate only
/// consumes the trait.
#[async_trait]
pub trait CrawlService: Send + Sync {
    /// Crawls a site, returning up to `limit` pages as markdown.
    async fn crawl(&self, url: &str, limit: usize) -> Result<Vec<CrawledPage>>;

    /// Scrapes a single URL as markdown.
    async fn scrape(&self, url: &str) -> Result<CrawledPage>;
}

/// Strips common boilerplate from crawled markdown.
///
/// Content starts at the first `# `-prefixed line (dropping navigation)
/// and ends before the first feedback-footer marker line.
#[must_use]
pub fn clean_markdown(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();

    let start = lines
        .iter()
        .position(|line| line.starts_with("# "))
        .unwrap_or(0);

    let end = lines[start..]
        .iter()
        .position(|line| FOOTER_MARKERS.iter().any(|marker| line.contains(marker)))
        .map_or(lines.len(), |offset| start + offset);

    lines[start..end].join("\n").trim().to_string()
}

/// Slices a string into pieces of at most `max_chars` characters.
fn hard_slice(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Splits markdown into chunks by `## ` headings with a size cap.
///
/// 1. Split on `## ` boundaries; each section keeps its own heading.
/// 2. Sections over `max_chars` re-split on blank-line paragraph
///    boundaries.
/// 3. Single paragraphs still over `max_chars` are sliced hard at
///    `max_chars` character boundaries.
///
/// Chunks are trimmed; empties are dropped.
#[must_use]
pub fn split_markdown(text: &str, max_chars: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut sections: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if line.starts_with("## ") && !current.is_empty() {
            sections.push(current.join("\n"));
            current = vec![line];
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        sections.push(current.join("\n"));
    }

    let mut chunks: Vec<String> = Vec::new();
    for section in sections {
        if section.chars().count() <= max_chars {
            chunks.push(section);
            continue;
        }

        let mut current_chunk = String::new();
        for para in section.split("\n\n") {
            if current_chunk.chars().count() + para.chars().count() + 2 > max_chars {
                if !current_chunk.is_empty() {
                    chunks.push(std::mem::take(&mut current_chunk));
                }
                if para.chars().count() > max_chars {
                    chunks.extend(hard_slice(para, max_chars));
                } else {
                    current_chunk = para.to_string();
                }
            } else if current_chunk.is_empty() {
                current_chunk = para.to_string();
            } else {
                current_chunk.push_str("\n\n");
                current_chunk.push_str(para);
            }
        }
        if !current_chunk.is_empty() {
            chunks.push(current_chunk);
        }
    }

    chunks
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// Orchestrates crawl → clean → chunk → normalize → embed → store.
pub struct Ingestor {
    store: InsightStore,
    normalizer: Normalizer,
    embedder: Arc<dyn Embedder>,
    crawl_service: Option<Arc<dyn CrawlService>>,
    min_confidence: f32,
    max_chunk_chars: usize,
}

impl Ingestor {
    /// Creates an ingestor. `crawl_service` may be omitted when only
    /// directory ingestion is used.
    #[must_use]
    pub fn new(
        store: InsightStore,
        normalizer: Normalizer,
        embedder: Arc<dyn Embedder>,
        crawl_service: Option<Arc<dyn CrawlService>>,
        min_confidence: f32,
    ) -> Self {
        Self {
            store,
            normalizer,
            embedder,
            crawl_service,
            min_confidence,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }

    /// Overrides the chunk size cap.
    #[must_use]
    pub const fn with_max_chunk_chars(mut self, max_chars: usize) -> Self {
        self.max_chunk_chars = max_chars;
        self
    }

    fn require_crawl_service(&self) -> Result<&Arc<dyn CrawlService>> {
        self.crawl_service
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("no crawl service configured".to_string()))
    }

    /// Crawls a URL and ingests all pages into a knowledge base. Returns
    /// the total number of chunks stored.
    pub async fn ingest_crawl(
        &self,
        kb_id: &str,
        url: &str,
        limit: usize,
        on_progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let pages = self.require_crawl_service()?.crawl(url, limit).await?;
        let total = pages.len();
        let mut total_chunks = 0;

        for (i, page) in pages.iter().enumerate() {
            if let Some(progress) = on_progress {
                progress(i + 1, total, &page.url);
            }
            total_chunks += self.ingest_page(kb_id, page, cancel).await?;
        }

        Ok(total_chunks)
    }

    /// Scrapes a single URL and ingests it. Returns the number of chunks
    /// stored.
    pub async fn ingest_scrape(
        &self,
        kb_id: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let page = self.require_crawl_service()?.scrape(url).await?;
        self.ingest_page(kb_id, &page, cancel).await
    }

    /// Loads crawler-export JSON files from a directory and ingests them.
    ///
    /// Each file holds `{"markdown": "...", "metadata": {"sourceURL": "..."}}`;
    /// files are processed in name order. Returns total chunks stored.
    pub async fn ingest_from_directory(
        &self,
        kb_id: &str,
        dir_path: &Path,
        on_progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut files: Vec<_> = std::fs::read_dir(dir_path)
            .map_err(|e| Error::InvalidInput(format!("unreadable directory: {e}")))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let total = files.len();
        let mut total_chunks = 0;

        for (i, file) in files.iter().enumerate() {
            let raw = std::fs::read_to_string(file)
                .map_err(|e| Error::InvalidInput(format!("unreadable file: {e}")))?;
            let data: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| Error::InvalidInput(format!("malformed crawl export: {e}")))?;

            let markdown = data["markdown"].as_str().unwrap_or_default().to_string();
            let metadata = data["metadata"].clone();
            let url = metadata["sourceURL"]
                .as_str()
                .or_else(|| metadata["url"].as_str())
                .map(String::from)
                .unwrap_or_else(|| {
                    file.file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });

            if let Some(progress) = on_progress {
                progress(i + 1, total, &url);
            }

            let page = CrawledPage {
                url,
                markdown,
                metadata: serde_json::from_value(metadata).unwrap_or_default(),
            };
            total_chunks += self.ingest_page(kb_id, &page, cancel).await?;
        }

        Ok(total_chunks)
    }

    /// Ingests a single page. Returns the number of chunks stored; a page
    /// with zero kept insights returns 0 without touching the database.
    pub async fn ingest_page(
        &self,
        kb_id: &str,
        page: &CrawledPage,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let cleaned = clean_markdown(&page.markdown);
        let text_chunks = split_markdown(&cleaned, self.max_chunk_chars);

        let mut all_insights = Vec::new();
        for chunk_text in &text_chunks {
            match self.normalizer.normalize(chunk_text, "", &[], cancel).await {
                Ok(insights) => all_insights.extend(insights),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(url = %page.url, error = %e, "failed to normalize chunk");
                    metrics::counter!("ingest_chunk_failures_total").increment(1);
                },
            }
        }

        let total = all_insights.len();
        all_insights.retain(|insight| insight.confidence >= self.min_confidence);
        if all_insights.len() != total {
            tracing::info!(
                filtered = total - all_insights.len(),
                total,
                threshold = self.min_confidence,
                "filtered insights below confidence threshold"
            );
        }

        if all_insights.is_empty() {
            return Ok(0);
        }

        // One batch call per page
        let texts: Vec<String> = all_insights
            .iter()
            .map(|insight| insight.normalized_text.clone())
            .collect();
        let embeddings = self.embedder.embed_batch(&texts, cancel).await?;

        let mut stored = 0;
        for (insight, embedding) in all_insights.into_iter().zip(embeddings) {
            let chunk = KbChunk {
                id: None,
                kb_id: kb_id.to_string(),
                text: insight.text,
                normalized_text: insight.normalized_text,
                frame: insight.frame,
                domains: insight.domains,
                entities: insight.entities,
                problems: insight.problems,
                resolutions: insight.resolutions,
                contexts: insight.contexts,
                confidence: insight.confidence,
                source_url: page.url.clone(),
                created_at: None,
                updated_at: None,
            };
            self.store.insert_kb_chunk(chunk, Some(embedding)).await?;
            stored += 1;
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_markdown_drops_navigation_and_footer() {
        let raw = "\
nav link one
nav link two
# Title

Body paragraph.

Did you find this page useful? Yes / No
trailing junk";
        let cleaned = clean_markdown(raw);
        assert!(cleaned.starts_with("# Title"));
        assert!(cleaned.contains("Body paragraph."));
        assert!(!cleaned.contains("nav link"));
        assert!(!cleaned.contains("useful"));
    }

    #[test]
    fn test_clean_markdown_without_heading_keeps_all() {
        let raw = "no headings here\njust text";
        assert_eq!(clean_markdown(raw), raw);
    }

    #[test]
    fn test_split_markdown_empty() {
        assert!(split_markdown("", 4000).is_empty());
        assert!(split_markdown("  \n ", 4000).is_empty());
    }

    #[test]
    fn test_split_markdown_by_headings() {
        let text = "# Title\nintro\n## Section A\ncontent a\n## Section B\ncontent b";
        let chunks = split_markdown(text, 4000);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("# Title"));
        assert!(chunks[1].starts_with("## Section A"));
        assert!(chunks[2].starts_with("## Section B"));
    }

    #[test]
    fn test_split_markdown_resplits_long_sections_on_paragraphs() {
        let para_a = "a".repeat(60);
        let para_b = "b".repeat(60);
        let text = format!("## Long\n\n{para_a}\n\n{para_b}");
        let chunks = split_markdown(&text, 80);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 80));
        assert!(chunks.iter().any(|c| c.contains(&para_a)));
        assert!(chunks.iter().any(|c| c.contains(&para_b)));
    }

    #[test]
    fn test_split_markdown_hard_slices_oversized_paragraph() {
        let para = "x".repeat(250);
        let chunks = split_markdown(&para, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 100);
        assert_eq!(chunks[2].chars().count(), 50);
    }

    #[test]
    fn test_split_markdown_keeps_small_sections_whole() {
        let text = "## A\nshort\n\nparagraphs\n\nstay together";
        let chunks = split_markdown(text, 4000);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("stay together"));
    }

    #[test]
    fn test_hard_slice_respects_char_boundaries() {
        let text = "héllo wörld".repeat(10);
        let slices = hard_slice(&text, 7);
        assert!(slices.iter().all(|s| s.chars().count() <= 7));
        assert_eq!(slices.concat(), text);
    }
}
