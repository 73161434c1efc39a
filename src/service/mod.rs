//! Insight service: composes storage, normalizer, and embedder into the
//! externally exposed operations.
//!
//! Each operation is a small orchestration returning typed outcomes;
//! [`crate::rendering`] turns them into readable lines for humans, and
//! `serde` serialization covers programmatic consumers.

use crate::config::MemoryConfig;
use crate::embedding::{Embedder, create_embedder};
use crate::ingest::{CrawlService, Ingestor, ProgressFn};
use crate::llm::create_llm_provider;
use crate::models::{
    Frame, GitContext, Insight, InsightUpdate, KbSourceType, KnowledgeBase, SearchResult,
    SubjectKind, SubjectRelationEdge, SubjectRelationType,
};
use crate::normalize::Normalizer;
use crate::storage::{Database, InsightStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Request to store free-form text as insights.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreInsightRequest {
    /// Raw input text.
    pub text: String,
    /// Comma-separated domain labels (e.g. `"node,auth"`).
    #[serde(default)]
    pub domain: String,
    /// Free-form provenance.
    #[serde(default)]
    pub source: String,
    /// Optional git context.
    #[serde(default)]
    pub git: GitContext,
}

/// Outcome of [`MemoryService::store_insight`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOutcome {
    /// The input carried no actionable insight.
    NoInsights,
    /// Insights were stored under the returned ids.
    Stored {
        /// Ids of the stored insights, in decomposition order.
        ids: Vec<String>,
    },
}

/// Outcome of [`MemoryService::add_knowledge_base`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KbOutcome {
    /// A KB with that name already exists.
    AlreadyExists {
        /// The conflicting name.
        name: String,
    },
    /// The KB was created and populated.
    Created {
        /// KB name.
        name: String,
        /// Number of chunks stored.
        chunks: usize,
        /// Source URL.
        url: String,
        /// Crawl page limit, when crawling (absent for scrape).
        crawl_limit: Option<usize>,
    },
}

/// Outcome of [`MemoryService::search_knowledge_base`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KbSearchOutcome {
    /// The named KB does not exist.
    KbNotFound {
        /// The requested name.
        name: String,
    },
    /// Ranked results in the insight shape.
    Results(Vec<SearchResult>),
}

/// Composes C2–C5 into the end-user operation set.
#[derive(Clone)]
pub struct MemoryService {
    store: InsightStore,
    normalizer: Normalizer,
    embedder: Arc<dyn Embedder>,
    crawl_service: Option<Arc<dyn CrawlService>>,
    min_confidence: f32,
}

impl MemoryService {
    /// Creates a service over explicit components.
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
        }
    }

    /// Creates a service from configuration: opens (and migrates) the
    /// database and constructs the configured providers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or a provider
    /// cannot be constructed.
    pub async fn from_config(config: &MemoryConfig) -> Result<Self> {
        let db = Database::open(config.db_path.clone()).await?;
        let store = InsightStore::new(&db);
        let llm = create_llm_provider(&config.llm).await?;
        let embedder = create_embedder(&config.embedding).await?;
        Ok(Self::new(
            store,
            Normalizer::new(llm),
            embedder,
            None,
            config.min_confidence,
        ))
    }

    /// Attaches a crawl service for knowledge-base ingestion.
    #[must_use]
    pub fn with_crawl_service(mut self, crawl_service: Arc<dyn CrawlService>) -> Self {
        self.crawl_service = Some(crawl_service);
        self
    }

    /// The underlying store (for embedders hosting extra operations).
    #[must_use]
    pub fn store(&self) -> &InsightStore {
        &self.store
    }

    /// Normalizes text into insights, embeds them in one batch, and
    /// inserts each with the supplied git context.
    pub async fn store_insight(
        &self,
        request: StoreInsightRequest,
        cancel: &CancellationToken,
    ) -> Result<StoreOutcome> {
        let domains: Vec<String> = request
            .domain
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from)
            .collect();

        let insights = self
            .normalizer
            .normalize(&request.text, &request.source, &domains, cancel)
            .await?;
        if insights.is_empty() {
            return Ok(StoreOutcome::NoInsights);
        }

        let texts: Vec<String> = insights
            .iter()
            .map(|insight| insight.normalized_text.clone())
            .collect();
        let embeddings = self.embedder.embed_batch(&texts, cancel).await?;

        let git = if request.git.is_empty() {
            None
        } else {
            Some(request.git)
        };

        let mut ids = Vec::with_capacity(insights.len());
        for (insight, embedding) in insights.into_iter().zip(embeddings) {
            let id = self
                .store
                .insert(insight, Some(embedding), git.clone())
                .await?;
            ids.push(id);
        }
        Ok(StoreOutcome::Stored { ids })
    }

    /// Embeds the query and runs ranked vector search.
    pub async fn search_insights(
        &self,
        query: &str,
        domain: Option<String>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedder.embed(query, cancel).await?;
        self.store
            .search_by_embedding(query_embedding, limit, domain)
            .await
    }

    /// Applies a typed update to an insight.
    pub async fn update_insight(
        &self,
        insight_id: &str,
        update: InsightUpdate,
    ) -> Result<Option<Insight>> {
        self.store.update(insight_id, update).await
    }

    /// Validates a raw field map against the update allowlist and applies
    /// it. Unknown keys are rejected with [`Error::InvalidField`].
    pub async fn update_insight_fields(
        &self,
        insight_id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<Insight>> {
        let update = parse_update_fields(fields)?;
        self.store.update(insight_id, update).await
    }

    /// Deletes an insight. Returns whether one existed.
    pub async fn forget(&self, insight_id: &str) -> Result<bool> {
        self.store.delete(insight_id).await
    }

    /// Lists insights newest-first with optional filters.
    pub async fn list_insights(
        &self,
        domain: Option<String>,
        frame: Option<Frame>,
        limit: usize,
    ) -> Result<Vec<Insight>> {
        self.store.list_all(domain, frame, limit).await
    }

    /// Finds insights tagged with a subject.
    pub async fn search_by_subject(
        &self,
        name: &str,
        kind: Option<SubjectKind>,
        limit: usize,
    ) -> Result<Vec<Insight>> {
        self.store.search_by_subject(name, kind, limit).await
    }

    /// One-hop related insights ordered by relation weight.
    pub async fn related_insights(
        &self,
        insight_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.store.related_insights(insight_id, limit).await
    }

    /// Creates a directed relation between two existing subjects.
    pub async fn add_subject_relation(
        &self,
        from_name: &str,
        from_kind: SubjectKind,
        to_name: &str,
        to_kind: SubjectKind,
        relation_type: SubjectRelationType,
    ) -> Result<bool> {
        self.store
            .add_subject_relation(from_name, from_kind, to_name, to_kind, relation_type)
            .await
    }

    /// Lists outgoing relation edges from a subject.
    pub async fn get_subject_relations(
        &self,
        name: &str,
        kind: Option<SubjectKind>,
        relation_type: Option<SubjectRelationType>,
        limit: usize,
    ) -> Result<Vec<SubjectRelationEdge>> {
        self.store
            .get_subject_relations(name, kind, relation_type, limit)
            .await
    }

    /// Creates a knowledge base by crawling or scraping a URL.
    ///
    /// Refuses duplicate names; when ingestion fails the created KB is
    /// deleted again before the error is returned.
    pub async fn add_knowledge_base(
        &self,
        name: &str,
        url: &str,
        description: &str,
        scrape_only: bool,
        limit: usize,
        on_progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<KbOutcome> {
        if self.store.get_kb_by_name(name).await?.is_some() {
            return Ok(KbOutcome::AlreadyExists {
                name: name.to_string(),
            });
        }

        let source_type = if scrape_only {
            KbSourceType::Scrape
        } else {
            KbSourceType::Crawl
        };
        let kb_id = self.store.create_kb(name, description, source_type).await?;

        let ingestor = Ingestor::new(
            self.store.clone(),
            self.normalizer.clone(),
            Arc::clone(&self.embedder),
            self.crawl_service.clone(),
            self.min_confidence,
        );

        let ingested = if scrape_only {
            ingestor.ingest_scrape(&kb_id, url, cancel).await
        } else {
            ingestor
                .ingest_crawl(&kb_id, url, limit, on_progress, cancel)
                .await
        };

        match ingested {
            Ok(chunks) => Ok(KbOutcome::Created {
                name: name.to_string(),
                chunks,
                url: url.to_string(),
                crawl_limit: (!scrape_only).then_some(limit),
            }),
            Err(e) => {
                // Roll the empty KB back so a retry can reuse the name
                if let Err(cleanup) = self.store.delete_kb(&kb_id).await {
                    tracing::warn!(error = %cleanup, "failed to roll back knowledge base");
                }
                Err(e)
            },
        }
    }

    /// Searches KB chunks by semantic similarity, optionally scoped to a
    /// named knowledge base.
    pub async fn search_knowledge_base(
        &self,
        query: &str,
        kb_name: Option<&str>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<KbSearchOutcome> {
        let kb_id = match kb_name {
            Some(name) => match self.store.get_kb_by_name(name).await? {
                Some(kb) => Some(kb.id),
                None => {
                    return Ok(KbSearchOutcome::KbNotFound {
                        name: name.to_string(),
                    });
                },
            },
            None => None,
        };

        let query_embedding = self.embedder.embed(query, cancel).await?;
        let results = self
            .store
            .search_kb_by_embedding(query_embedding, kb_id, limit)
            .await?;
        Ok(KbSearchOutcome::Results(results))
    }

    /// Lists all knowledge bases.
    pub async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        self.store.list_kbs().await
    }
}

/// Validates a raw field map against the update allowlist and converts it
/// into a typed [`InsightUpdate`].
///
/// # Errors
///
/// Returns [`Error::InvalidField`] for keys outside the allowlist and
/// [`Error::InvalidInput`] for values of the wrong shape.
pub fn parse_update_fields(
    fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<InsightUpdate> {
    let mut update = InsightUpdate::default();

    for (key, value) in fields {
        if !InsightUpdate::ALLOWED_FIELDS.contains(&key.as_str()) {
            return Err(Error::InvalidField { field: key.clone() });
        }

        let want_string = || {
            value
                .as_str()
                .map(String::from)
                .ok_or_else(|| Error::InvalidInput(format!("field '{key}' must be a string")))
        };
        let want_list = || -> Result<Vec<String>> {
            value
                .as_array()
                .and_then(|items| {
                    items
                        .iter()
                        .map(|item| item.as_str().map(String::from))
                        .collect::<Option<Vec<String>>>()
                })
                .ok_or_else(|| {
                    Error::InvalidInput(format!("field '{key}' must be an array of strings"))
                })
        };

        match key.as_str() {
            "text" => update.text = Some(want_string()?),
            "normalized_text" => update.normalized_text = Some(want_string()?),
            "source" => update.source = Some(want_string()?),
            "frame" => update.frame = Some(Frame::parse(&want_string()?)?),
            "domains" => update.domains = Some(want_list()?),
            "entities" => update.entities = Some(want_list()?),
            "problems" => update.problems = Some(want_list()?),
            "resolutions" => update.resolutions = Some(want_list()?),
            "contexts" => update.contexts = Some(want_list()?),
            "confidence" => {
                let confidence = value.as_f64().ok_or_else(|| {
                    Error::InvalidInput(format!("field '{key}' must be a number"))
                })?;
                if !(0.0..=1.0).contains(&confidence) {
                    return Err(Error::InvalidInput(format!(
                        "confidence out of [0, 1]: {confidence}"
                    )));
                }
                #[allow(clippy::cast_possible_truncation)]
                {
                    update.confidence = Some(confidence as f32);
                }
            },
            _ => unreachable!("allowlist covers every key"),
        }
    }

    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_update_fields_allowlist() {
        let map = json!({"confidence": 0.8, "frame": "pattern"});
        let update = parse_update_fields(map.as_object().unwrap()).unwrap();
        assert_eq!(update.frame, Some(Frame::Pattern));
        assert!((update.confidence.unwrap() - 0.8).abs() < 1e-6);

        let map = json!({"embedding": [1.0]});
        let err = parse_update_fields(map.as_object().unwrap());
        assert!(matches!(err, Err(Error::InvalidField { field }) if field == "embedding"));
    }

    #[test]
    fn test_parse_update_fields_value_shapes() {
        let map = json!({"domains": ["node", "auth"]});
        let update = parse_update_fields(map.as_object().unwrap()).unwrap();
        assert_eq!(
            update.domains,
            Some(vec!["node".to_string(), "auth".to_string()])
        );

        let map = json!({"domains": "node"});
        assert!(parse_update_fields(map.as_object().unwrap()).is_err());

        let map = json!({"confidence": 1.5});
        assert!(parse_update_fields(map.as_object().unwrap()).is_err());

        let map = json!({"frame": "vibes"});
        assert!(parse_update_fields(map.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_store_outcome_serializes() {
        let outcome = StoreOutcome::Stored {
            ids: vec!["a".to_string()],
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["Stored"]["ids"][0], "a");
    }
}
