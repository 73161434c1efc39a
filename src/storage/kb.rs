//! Knowledge-base operations on [`InsightStore`].
//!
//! KB chunks share the insight row shape; searches return results in the
//! insight shape (with `source` carrying the page URL) so downstream
//! rendering is uniform.

use crate::models::{Insight, KbChunk, KbSourceType, KnowledgeBase, SearchResult, SubjectKind};
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;
use uuid::Uuid;

use super::connection::with_connection;
use super::insights::{InsightStore, l2_norm};
use super::rows::{decode_embedding, encode_embedding, row_to_kb_chunk, row_to_knowledge_base};
use super::subjects;

fn storage_err(operation: &str, e: &rusqlite::Error) -> Error {
    Error::Storage {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

fn chunk_with_embedding(row: &rusqlite::Row<'_>) -> rusqlite::Result<(KbChunk, Vec<u8>)> {
    Ok((row_to_kb_chunk(row)?, row.get("embedding")?))
}

/// Converts a chunk into the insight shape used by search results.
fn chunk_to_insight(chunk: KbChunk) -> Insight {
    Insight {
        id: chunk.id,
        text: chunk.text,
        normalized_text: chunk.normalized_text,
        frame: chunk.frame,
        domains: chunk.domains,
        entities: chunk.entities,
        problems: chunk.problems,
        resolutions: chunk.resolutions,
        contexts: chunk.contexts,
        confidence: chunk.confidence,
        source: chunk.source_url,
        created_at: chunk.created_at,
        updated_at: chunk.updated_at,
    }
}

impl InsightStore {
    /// Creates a knowledge base, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a KB with the same name
    /// already exists.
    #[instrument(skip(self, description))]
    pub async fn create_kb(
        &self,
        name: &str,
        description: &str,
        source_type: KbSourceType,
    ) -> Result<String> {
        let name = name.to_string();
        let description = description.to_string();
        let conn = self.connection();
        with_connection(&conn, "create_kb", move |conn| {
            let kb_id = Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO knowledge_bases (id, name, description, source_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![kb_id, name, description, source_type.as_str(), now, now],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint failed") {
                    Error::InvalidInput(format!("knowledge base '{name}' already exists"))
                } else {
                    storage_err("create_kb", &e)
                }
            })?;
            metrics::counter!("knowledge_bases_created_total").increment(1);
            Ok(kb_id)
        })
        .await
    }

    /// Fetches a knowledge base by id.
    #[instrument(skip(self))]
    pub async fn get_kb(&self, kb_id: &str) -> Result<Option<KnowledgeBase>> {
        let kb_id = kb_id.to_string();
        let conn = self.connection();
        with_connection(&conn, "get_kb", move |conn| {
            conn.query_row(
                "SELECT * FROM knowledge_bases WHERE id = ?1",
                params![kb_id],
                row_to_knowledge_base,
            )
            .optional()
            .map_err(|e| storage_err("get_kb", &e))
        })
        .await
    }

    /// Fetches a knowledge base by its unique name.
    #[instrument(skip(self))]
    pub async fn get_kb_by_name(&self, name: &str) -> Result<Option<KnowledgeBase>> {
        let name = name.to_string();
        let conn = self.connection();
        with_connection(&conn, "get_kb_by_name", move |conn| {
            conn.query_row(
                "SELECT * FROM knowledge_bases WHERE name = ?1",
                params![name],
                row_to_knowledge_base,
            )
            .optional()
            .map_err(|e| storage_err("get_kb_by_name", &e))
        })
        .await
    }

    /// Lists all knowledge bases, newest-first.
    #[instrument(skip(self))]
    pub async fn list_kbs(&self) -> Result<Vec<KnowledgeBase>> {
        let conn = self.connection();
        with_connection(&conn, "list_kbs", move |conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM knowledge_bases ORDER BY created_at DESC, id DESC")
                .map_err(|e| storage_err("list_kbs", &e))?;
            let kbs = stmt
                .query_map([], row_to_knowledge_base)
                .map_err(|e| storage_err("list_kbs", &e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage_err("list_kbs", &e))?;
            Ok(kbs)
        })
        .await
    }

    /// Deletes a knowledge base and all its chunks (cascade). Returns
    /// whether a row was removed.
    #[instrument(skip(self))]
    pub async fn delete_kb(&self, kb_id: &str) -> Result<bool> {
        let kb_id = kb_id.to_string();
        let conn = self.connection();
        with_connection(&conn, "delete_kb", move |conn| {
            let rows = conn
                .execute("DELETE FROM knowledge_bases WHERE id = ?1", params![kb_id])
                .map_err(|e| storage_err("delete_kb", &e))?;
            Ok(rows > 0)
        })
        .await
    }

    /// Inserts a KB chunk with an optional embedding; upserts its tag
    /// subjects and membership edges in the same transaction. Returns the
    /// chunk id.
    #[instrument(skip(self, chunk, embedding), fields(kb_id = %chunk.kb_id))]
    pub async fn insert_kb_chunk(
        &self,
        chunk: KbChunk,
        embedding: Option<Vec<f32>>,
    ) -> Result<String> {
        let conn = self.connection();
        with_connection(&conn, "insert_kb_chunk", move |conn| {
            insert_kb_chunk_sync(conn, &chunk, embedding.as_deref())
        })
        .await
    }

    /// Lists chunks of a knowledge base, newest-first.
    #[instrument(skip(self))]
    pub async fn list_kb_chunks(&self, kb_id: &str, limit: usize) -> Result<Vec<KbChunk>> {
        let kb_id = kb_id.to_string();
        let conn = self.connection();
        with_connection(&conn, "list_kb_chunks", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM kb_chunks WHERE kb_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                )
                .map_err(|e| storage_err("list_kb_chunks", &e))?;
            let chunks = stmt
                .query_map(params![kb_id, limit as i64], row_to_kb_chunk)
                .map_err(|e| storage_err("list_kb_chunks", &e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage_err("list_kb_chunks", &e))?;
            Ok(chunks)
        })
        .await
    }

    /// Deletes all chunks of a knowledge base (for refresh). Returns the
    /// number deleted.
    #[instrument(skip(self))]
    pub async fn delete_kb_chunks(&self, kb_id: &str) -> Result<usize> {
        let kb_id = kb_id.to_string();
        let conn = self.connection();
        with_connection(&conn, "delete_kb_chunks", move |conn| {
            conn.execute("DELETE FROM kb_chunks WHERE kb_id = ?1", params![kb_id])
                .map_err(|e| storage_err("delete_kb_chunks", &e))
        })
        .await
    }

    /// Linear-scan cosine search over KB chunks, optionally restricted to
    /// a single knowledge base. Results come back in the insight shape
    /// with `source` carrying the page URL.
    #[instrument(skip(self, query_embedding))]
    pub async fn search_kb_by_embedding(
        &self,
        query_embedding: Vec<f32>,
        kb_id: Option<String>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let conn = self.connection();
        with_connection(&conn, "search_kb_by_embedding", move |conn| {
            let (sql, filter) = kb_id.as_ref().map_or_else(
                || {
                    (
                        "SELECT * FROM kb_chunks WHERE embedding IS NOT NULL ORDER BY rowid",
                        None,
                    )
                },
                |id| {
                    (
                        "SELECT * FROM kb_chunks
                         WHERE embedding IS NOT NULL AND kb_id = ?1 ORDER BY rowid",
                        Some(id.clone()),
                    )
                },
            );
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| storage_err("search_kb_by_embedding", &e))?;
            let rows = match filter {
                Some(id) => stmt.query_map(params![id], chunk_with_embedding),
                None => stmt.query_map([], chunk_with_embedding),
            }
            .map_err(|e| storage_err("search_kb_by_embedding", &e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage_err("search_kb_by_embedding", &e))?;

            let query_norm = l2_norm(&query_embedding);
            let mut results: Vec<SearchResult> = Vec::new();
            for (chunk, blob) in rows {
                let Ok(stored) = decode_embedding(&blob) else {
                    tracing::warn!(id = ?chunk.id, "skipping chunk with malformed embedding blob");
                    continue;
                };
                if stored.len() != query_embedding.len() {
                    continue;
                }
                let stored_norm = l2_norm(&stored);
                if query_norm == 0.0 || stored_norm == 0.0 {
                    continue;
                }
                let dot: f32 = query_embedding.iter().zip(&stored).map(|(a, b)| a * b).sum();
                results.push(SearchResult {
                    insight: chunk_to_insight(chunk),
                    score: dot / (query_norm * stored_norm),
                });
            }

            results.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            results.truncate(limit);
            Ok(results)
        })
        .await
    }
}

fn insert_kb_chunk_sync(
    conn: &mut Connection,
    chunk: &KbChunk,
    embedding: Option<&[f32]>,
) -> Result<String> {
    if !(0.0..=1.0).contains(&chunk.confidence) {
        return Err(Error::InvalidInput(format!(
            "confidence out of [0, 1]: {}",
            chunk.confidence
        )));
    }

    let chunk_id = chunk
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = Utc::now().to_rfc3339();
    let embedding_bytes = embedding.map(encode_embedding);
    let json = |list: &[String]| serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string());

    let tx = conn
        .transaction()
        .map_err(|e| storage_err("insert_kb_chunk_begin", &e))?;

    tx.execute(
        "INSERT INTO kb_chunks
         (id, kb_id, text, normalized_text, frame, domains, entities, problems, resolutions,
          contexts, confidence, source_url, embedding, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            chunk_id,
            chunk.kb_id,
            chunk.text,
            chunk.normalized_text,
            chunk.frame.as_str(),
            json(&chunk.domains),
            json(&chunk.entities),
            json(&chunk.problems),
            json(&chunk.resolutions),
            json(&chunk.contexts),
            f64::from(chunk.confidence),
            chunk.source_url,
            embedding_bytes,
            now,
            now,
        ],
    )
    .map_err(|e| storage_err("insert_kb_chunk", &e))?;

    subjects::upsert_tag_subjects(
        &tx,
        "INSERT OR IGNORE INTO kb_chunk_subjects (kb_chunk_id, subject_id) VALUES (?1, ?2)",
        &chunk_id,
        &[
            (SubjectKind::Domain, &chunk.domains),
            (SubjectKind::Entity, &chunk.entities),
            (SubjectKind::Problem, &chunk.problems),
            (SubjectKind::Resolution, &chunk.resolutions),
            (SubjectKind::Context, &chunk.contexts),
        ],
        &now,
    )?;

    tx.commit()
        .map_err(|e| storage_err("insert_kb_chunk_commit", &e))?;

    metrics::counter!("kb_chunks_stored_total").increment(1);
    Ok(chunk_id)
}
