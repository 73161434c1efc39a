//! Insight store: CRUD, vector search, and knowledge-graph maintenance.
//!
//! Every public operation is an async facade over a blocking body run on
//! the blocking thread pool; the shared connection serializes writers
//! while WAL mode lets readers proceed.

use crate::models::{
    GitContext, Insight, InsightUpdate, SearchResult, SubjectKind, SubjectRelationEdge,
    SubjectRelationType,
};
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Arc, Mutex};
use tracing::instrument;
use uuid::Uuid;

use super::connection::{Database, with_connection};
use super::rows::{decode_embedding, encode_embedding, row_to_insight};
use super::subjects;

fn storage_err(operation: &str, e: &rusqlite::Error) -> Error {
    Error::Storage {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Store for insights, subjects, and both relation graphs.
///
/// Cloning is cheap; clones share the underlying connection.
#[derive(Clone)]
pub struct InsightStore {
    conn: Arc<Mutex<Connection>>,
}

impl InsightStore {
    /// Creates a store over an opened [`Database`].
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Inserts an insight with an optional embedding and git context.
    ///
    /// Within a single transaction this writes the row, upserts all tag
    /// subjects and membership edges, applies the auto-relation rules,
    /// emits git-context subjects and relations when supplied, and
    /// refreshes `shared_subject` edges toward insights sharing at least
    /// one subject. Returns the new id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when `confidence` is outside
    /// `[0, 1]`, or [`Error::Storage`] on database failure.
    #[instrument(skip(self, insight, embedding, git), fields(frame = %insight.frame))]
    pub async fn insert(
        &self,
        insight: Insight,
        embedding: Option<Vec<f32>>,
        git: Option<GitContext>,
    ) -> Result<String> {
        with_connection(&self.conn, "insert_insight", move |conn| {
            insert_sync(conn, &insight, embedding.as_deref(), git.as_ref())
        })
        .await
    }

    /// Fetches an insight by id.
    #[instrument(skip(self))]
    pub async fn get(&self, insight_id: &str) -> Result<Option<Insight>> {
        let id = insight_id.to_string();
        with_connection(&self.conn, "get_insight", move |conn| {
            conn.query_row("SELECT * FROM insights WHERE id = ?1", params![id], |row| {
                row_to_insight(row)
            })
            .optional()
            .map_err(|e| storage_err("get_insight", &e))
        })
        .await
    }

    /// Applies a typed field update, returning the updated insight, or
    /// `None` when the id does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when `confidence` is outside
    /// `[0, 1]`.
    #[instrument(skip(self, update))]
    pub async fn update(&self, insight_id: &str, update: InsightUpdate) -> Result<Option<Insight>> {
        if let Some(confidence) = update.confidence
            && !(0.0..=1.0).contains(&confidence)
        {
            return Err(Error::InvalidInput(format!(
                "confidence out of [0, 1]: {confidence}"
            )));
        }

        let id = insight_id.to_string();
        with_connection(&self.conn, "update_insight", move |conn| {
            update_sync(conn, &id, &update)
        })
        .await
    }

    /// Deletes an insight. Memberships and insight relations cascade.
    /// Returns whether a row was removed.
    #[instrument(skip(self))]
    pub async fn delete(&self, insight_id: &str) -> Result<bool> {
        let id = insight_id.to_string();
        with_connection(&self.conn, "delete_insight", move |conn| {
            let rows = conn
                .execute("DELETE FROM insights WHERE id = ?1", params![id])
                .map_err(|e| storage_err("delete_insight", &e))?;
            if rows > 0 {
                metrics::counter!("insights_deleted_total").increment(1);
            }
            Ok(rows > 0)
        })
        .await
    }

    /// Linear-scan cosine search over stored embeddings.
    ///
    /// Rows without an embedding (or with a zero-norm vector) are
    /// skipped. The optional `domain` filter is a substring pre-filter
    /// against the stored JSON array text. Results are sorted by score
    /// descending, ties broken by insertion order, truncated to `limit`.
    #[instrument(skip(self, query_embedding))]
    pub async fn search_by_embedding(
        &self,
        query_embedding: Vec<f32>,
        limit: usize,
        domain: Option<String>,
    ) -> Result<Vec<SearchResult>> {
        with_connection(&self.conn, "search_by_embedding", move |conn| {
            let (sql, filter) = domain.as_ref().map_or_else(
                || {
                    (
                        "SELECT * FROM insights WHERE embedding IS NOT NULL ORDER BY rowid",
                        None,
                    )
                },
                |d| {
                    (
                        "SELECT * FROM insights
                         WHERE embedding IS NOT NULL AND domains LIKE ?1 ORDER BY rowid",
                        Some(format!("%\"{d}\"%")),
                    )
                },
            );

            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| storage_err("search_by_embedding", &e))?;
            let rows = match filter {
                Some(f) => stmt.query_map(params![f], row_with_embedding),
                None => stmt.query_map([], row_with_embedding),
            }
            .map_err(|e| storage_err("search_by_embedding", &e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage_err("search_by_embedding", &e))?;

            Ok(rank_by_cosine(&query_embedding, rows, limit))
        })
        .await
    }

    /// Lists insights newest-first with optional domain and frame filters.
    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        domain: Option<String>,
        frame: Option<crate::models::Frame>,
        limit: usize,
    ) -> Result<Vec<Insight>> {
        with_connection(&self.conn, "list_insights", move |conn| {
            let mut conditions: Vec<&str> = Vec::new();
            let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(d) = &domain {
                conditions.push("domains LIKE ?");
                bound.push(Box::new(format!("%\"{d}\"%")));
            }
            if let Some(f) = frame {
                conditions.push("frame = ?");
                bound.push(Box::new(f.as_str().to_string()));
            }

            let where_clause = if conditions.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", conditions.join(" AND "))
            };
            bound.push(Box::new(limit as i64));

            let sql = format!(
                "SELECT * FROM insights{where_clause} ORDER BY created_at DESC, id DESC LIMIT ?"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| storage_err("list_insights", &e))?;
            let bound_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(AsRef::as_ref).collect();
            let insights = stmt
                .query_map(bound_refs.as_slice(), row_to_insight)
                .map_err(|e| storage_err("list_insights", &e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage_err("list_insights", &e))?;
            Ok(insights)
        })
        .await
    }

    /// Finds insights tagged with a subject, newest-first.
    #[instrument(skip(self))]
    pub async fn search_by_subject(
        &self,
        name: &str,
        kind: Option<SubjectKind>,
        limit: usize,
    ) -> Result<Vec<Insight>> {
        let name = subjects::normalize_subject_name(name);
        with_connection(&self.conn, "search_by_subject", move |conn| {
            let insights = if let Some(kind) = kind {
                let mut stmt = conn
                    .prepare(
                        "SELECT i.* FROM insights i
                         JOIN insight_subjects isub ON i.id = isub.insight_id
                         JOIN subjects s ON isub.subject_id = s.id
                         WHERE s.name = ?1 AND s.kind = ?2
                         ORDER BY i.created_at DESC, i.id DESC LIMIT ?3",
                    )
                    .map_err(|e| storage_err("search_by_subject", &e))?;
                stmt.query_map(params![name, kind.as_str(), limit as i64], row_to_insight)
                    .map_err(|e| storage_err("search_by_subject", &e))?
                    .collect::<rusqlite::Result<Vec<_>>>()
            } else {
                let mut stmt = conn
                    .prepare(
                        "SELECT DISTINCT i.* FROM insights i
                         JOIN insight_subjects isub ON i.id = isub.insight_id
                         JOIN subjects s ON isub.subject_id = s.id
                         WHERE s.name = ?1
                         ORDER BY i.created_at DESC, i.id DESC LIMIT ?2",
                    )
                    .map_err(|e| storage_err("search_by_subject", &e))?;
                stmt.query_map(params![name, limit as i64], row_to_insight)
                    .map_err(|e| storage_err("search_by_subject", &e))?
                    .collect::<rusqlite::Result<Vec<_>>>()
            }
            .map_err(|e| storage_err("search_by_subject", &e))?;
            Ok(insights)
        })
        .await
    }

    /// Insights related to the given one via `insight_relations`, ordered
    /// by weight descending. The score of each result is the relation
    /// weight.
    #[instrument(skip(self))]
    pub async fn related_insights(
        &self,
        insight_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let id = insight_id.to_string();
        with_connection(&self.conn, "related_insights", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT i.*, r.weight AS rel_weight FROM insights i
                     JOIN insight_relations r ON (
                         (r.from_id = ?1 AND r.to_id = i.id) OR
                         (r.to_id = ?1 AND r.from_id = i.id)
                     )
                     ORDER BY r.weight DESC
                     LIMIT ?2",
                )
                .map_err(|e| storage_err("related_insights", &e))?;
            let results = stmt
                .query_map(params![id, limit as i64], |row| {
                    let insight = row_to_insight(row)?;
                    let weight: f64 = row.get("rel_weight")?;
                    let score = weight as f32;
                    Ok(SearchResult { insight, score })
                })
                .map_err(|e| storage_err("related_insights", &e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage_err("related_insights", &e))?;
            Ok(results)
        })
        .await
    }

    /// Creates a directed relation between two existing subjects.
    ///
    /// Returns `false` when either subject is missing; duplicate edges
    /// are ignored.
    #[instrument(skip(self))]
    pub async fn add_subject_relation(
        &self,
        from_name: &str,
        from_kind: SubjectKind,
        to_name: &str,
        to_kind: SubjectKind,
        relation_type: SubjectRelationType,
    ) -> Result<bool> {
        let from_name = subjects::normalize_subject_name(from_name);
        let to_name = subjects::normalize_subject_name(to_name);
        with_connection(&self.conn, "add_subject_relation", move |conn| {
            let lookup = |name: &str, kind: SubjectKind| -> Result<Option<String>> {
                conn.query_row(
                    "SELECT id FROM subjects WHERE name = ?1 AND kind = ?2",
                    params![name, kind.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| storage_err("add_subject_relation", &e))
            };

            let Some(from_id) = lookup(&from_name, from_kind)? else {
                return Ok(false);
            };
            let Some(to_id) = lookup(&to_name, to_kind)? else {
                return Ok(false);
            };

            let now = Utc::now().to_rfc3339();
            subjects::insert_relation(conn, &from_id, relation_type, &to_id, &now)?;
            Ok(true)
        })
        .await
    }

    /// Lists outgoing relation edges from a subject, with optional kind
    /// and relation-type filters.
    #[instrument(skip(self))]
    pub async fn get_subject_relations(
        &self,
        name: &str,
        kind: Option<SubjectKind>,
        relation_type: Option<SubjectRelationType>,
        limit: usize,
    ) -> Result<Vec<SubjectRelationEdge>> {
        let name = subjects::normalize_subject_name(name);
        with_connection(&self.conn, "get_subject_relations", move |conn| {
            let mut conditions: Vec<&str> = vec!["sf.name = ?"];
            let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(name)];

            if let Some(kind) = kind {
                conditions.push("sf.kind = ?");
                bound.push(Box::new(kind.as_str().to_string()));
            }
            if let Some(rt) = relation_type {
                conditions.push("sr.relation_type = ?");
                bound.push(Box::new(rt.as_str().to_string()));
            }
            bound.push(Box::new(limit as i64));

            let sql = format!(
                "SELECT sf.name AS from_name, sf.kind AS from_kind,
                        st.name AS to_name, st.kind AS to_kind, sr.relation_type
                 FROM subject_relations sr
                 JOIN subjects sf ON sr.from_subject_id = sf.id
                 JOIN subjects st ON sr.to_subject_id = st.id
                 WHERE {}
                 LIMIT ?",
                conditions.join(" AND ")
            );

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| storage_err("get_subject_relations", &e))?;
            let bound_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(AsRef::as_ref).collect();
            let edges = stmt
                .query_map(bound_refs.as_slice(), |row| {
                    let from_kind: String = row.get("from_kind")?;
                    let to_kind: String = row.get("to_kind")?;
                    let relation_type: String = row.get("relation_type")?;
                    Ok(SubjectRelationEdge {
                        from_name: row.get("from_name")?,
                        from_kind: SubjectKind::parse(&from_kind).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                1,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                        to_name: row.get("to_name")?,
                        to_kind: SubjectKind::parse(&to_kind).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                3,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                        relation_type: SubjectRelationType::parse(&relation_type).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                4,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                    })
                })
                .map_err(|e| storage_err("get_subject_relations", &e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage_err("get_subject_relations", &e))?;
            Ok(edges)
        })
        .await
    }

    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

fn row_with_embedding(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Insight, Vec<u8>)> {
    Ok((row_to_insight(row)?, row.get("embedding")?))
}

/// Ranks candidate rows by cosine similarity to the query.
///
/// The sort is stable, so equal scores keep insertion order.
fn rank_by_cosine(
    query: &[f32],
    rows: Vec<(Insight, Vec<u8>)>,
    limit: usize,
) -> Vec<SearchResult> {
    let query_norm = l2_norm(query);
    let mut results: Vec<SearchResult> = Vec::new();
    for (insight, blob) in rows {
        let Ok(stored) = decode_embedding(&blob) else {
            tracing::warn!(id = ?insight.id, "skipping insight with malformed embedding blob");
            continue;
        };
        if stored.len() != query.len() {
            continue;
        }
        let stored_norm = l2_norm(&stored);
        if query_norm == 0.0 || stored_norm == 0.0 {
            continue;
        }
        let dot: f32 = query.iter().zip(&stored).map(|(a, b)| a * b).sum();
        results.push(SearchResult {
            insight,
            score: dot / (query_norm * stored_norm),
        });
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}

fn insert_sync(
    conn: &mut Connection,
    insight: &Insight,
    embedding: Option<&[f32]>,
    git: Option<&GitContext>,
) -> Result<String> {
    if !(0.0..=1.0).contains(&insight.confidence) {
        return Err(Error::InvalidInput(format!(
            "confidence out of [0, 1]: {}",
            insight.confidence
        )));
    }

    let insight_id = insight
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = Utc::now().to_rfc3339();
    let embedding_bytes = embedding.map(encode_embedding);

    let json = |list: &[String]| serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string());

    let tx = conn
        .transaction()
        .map_err(|e| storage_err("insert_insight_begin", &e))?;

    tx.execute(
        "INSERT INTO insights
         (id, text, normalized_text, frame, domains, entities, problems, resolutions, contexts,
          confidence, source, embedding, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            insight_id,
            insight.text,
            insight.normalized_text,
            insight.frame.as_str(),
            json(&insight.domains),
            json(&insight.entities),
            json(&insight.problems),
            json(&insight.resolutions),
            json(&insight.contexts),
            f64::from(insight.confidence),
            insight.source,
            embedding_bytes,
            now,
            now,
        ],
    )
    .map_err(|e| storage_err("insert_insight", &e))?;

    subjects::upsert_tag_subjects(
        &tx,
        "INSERT OR IGNORE INTO insight_subjects (insight_id, subject_id) VALUES (?1, ?2)",
        &insight_id,
        &[
            (SubjectKind::Domain, &insight.domains),
            (SubjectKind::Entity, &insight.entities),
            (SubjectKind::Problem, &insight.problems),
            (SubjectKind::Resolution, &insight.resolutions),
            (SubjectKind::Context, &insight.contexts),
        ],
        &now,
    )?;

    subjects::auto_relate(&tx, |kind| insight.tags_for(kind).to_vec(), &now)?;

    if let Some(git) = git
        && !git.is_empty()
    {
        subjects::upsert_git_subjects(&tx, &insight_id, git, &insight.resolutions, &now)?;
    }

    relate_shared_subjects(&tx, &insight_id, &now)?;

    tx.commit()
        .map_err(|e| storage_err("insert_insight_commit", &e))?;

    metrics::counter!("insights_stored_total").increment(1);
    Ok(insight_id)
}

/// Refreshes `shared_subject` edges between the new insight and every
/// insight sharing at least one subject, with `weight = shared_count`
/// and canonical `from_id < to_id` ordering.
fn relate_shared_subjects(conn: &Connection, insight_id: &str, now: &str) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "SELECT b.insight_id, COUNT(*) FROM insight_subjects a
             JOIN insight_subjects b
               ON a.subject_id = b.subject_id AND b.insight_id != a.insight_id
             WHERE a.insight_id = ?1
             GROUP BY b.insight_id",
        )
        .map_err(|e| storage_err("relate_shared_subjects", &e))?;
    let shared: Vec<(String, i64)> = stmt
        .query_map(params![insight_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| storage_err("relate_shared_subjects", &e))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| storage_err("relate_shared_subjects", &e))?;

    for (other_id, count) in shared {
        let (from_id, to_id) = if insight_id < other_id.as_str() {
            (insight_id, other_id.as_str())
        } else {
            (other_id.as_str(), insight_id)
        };
        conn.execute(
            "INSERT INTO insight_relations (from_id, to_id, relation_type, weight, created_at)
             VALUES (?1, ?2, 'shared_subject', ?3, ?4)
             ON CONFLICT(from_id, to_id, relation_type)
             DO UPDATE SET weight = excluded.weight",
            params![from_id, to_id, count as f64, now],
        )
        .map_err(|e| storage_err("relate_shared_subjects", &e))?;
    }
    Ok(())
}

fn update_sync(
    conn: &mut Connection,
    insight_id: &str,
    update: &InsightUpdate,
) -> Result<Option<Insight>> {
    let existing = conn
        .query_row(
            "SELECT * FROM insights WHERE id = ?1",
            params![insight_id],
            row_to_insight,
        )
        .optional()
        .map_err(|e| storage_err("update_insight", &e))?;
    let Some(existing) = existing else {
        return Ok(None);
    };
    if update.is_empty() {
        return Ok(Some(existing));
    }

    let json = |list: &[String]| serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string());
    let mut set_clauses: Vec<&str> = Vec::new();
    let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(text) = &update.text {
        set_clauses.push("text = ?");
        bound.push(Box::new(text.clone()));
    }
    if let Some(normalized_text) = &update.normalized_text {
        set_clauses.push("normalized_text = ?");
        bound.push(Box::new(normalized_text.clone()));
    }
    if let Some(frame) = update.frame {
        set_clauses.push("frame = ?");
        bound.push(Box::new(frame.as_str().to_string()));
    }
    if let Some(domains) = &update.domains {
        set_clauses.push("domains = ?");
        bound.push(Box::new(json(domains)));
    }
    if let Some(entities) = &update.entities {
        set_clauses.push("entities = ?");
        bound.push(Box::new(json(entities)));
    }
    if let Some(problems) = &update.problems {
        set_clauses.push("problems = ?");
        bound.push(Box::new(json(problems)));
    }
    if let Some(resolutions) = &update.resolutions {
        set_clauses.push("resolutions = ?");
        bound.push(Box::new(json(resolutions)));
    }
    if let Some(contexts) = &update.contexts {
        set_clauses.push("contexts = ?");
        bound.push(Box::new(json(contexts)));
    }
    if let Some(confidence) = update.confidence {
        set_clauses.push("confidence = ?");
        bound.push(Box::new(f64::from(confidence)));
    }
    if let Some(source) = &update.source {
        set_clauses.push("source = ?");
        bound.push(Box::new(source.clone()));
    }

    set_clauses.push("updated_at = ?");
    bound.push(Box::new(Utc::now().to_rfc3339()));
    bound.push(Box::new(insight_id.to_string()));

    let sql = format!(
        "UPDATE insights SET {} WHERE id = ?",
        set_clauses.join(", ")
    );
    let bound_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(AsRef::as_ref).collect();
    conn.execute(&sql, bound_refs.as_slice())
        .map_err(|e| storage_err("update_insight", &e))?;

    conn.query_row(
        "SELECT * FROM insights WHERE id = ?1",
        params![insight_id],
        row_to_insight,
    )
    .optional()
    .map_err(|e| storage_err("update_insight", &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_by_cosine_orders_and_truncates() {
        let a = Insight::new("a");
        let b = Insight::new("b");
        let rows = vec![
            (a, encode_embedding(&[0.0, 1.0, 0.0])),
            (b, encode_embedding(&[1.0, 0.0, 0.0])),
        ];
        let results = rank_by_cosine(&[0.9, 0.1, 0.0], rows, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].insight.text, "b");
        assert!(results[0].score > results[1].score);

        let a = Insight::new("a");
        let rows = vec![(a, encode_embedding(&[0.0, 1.0, 0.0]))];
        assert_eq!(rank_by_cosine(&[1.0, 0.0, 0.0], rows, 0).len(), 0);
    }

    #[test]
    fn test_rank_by_cosine_skips_zero_norm_and_mismatched() {
        let rows = vec![
            (Insight::new("zero"), encode_embedding(&[0.0, 0.0, 0.0])),
            (Insight::new("short"), encode_embedding(&[1.0])),
            (Insight::new("ok"), encode_embedding(&[1.0, 0.0, 0.0])),
        ];
        let results = rank_by_cosine(&[1.0, 0.0, 0.0], rows, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].insight.text, "ok");
    }

    #[test]
    fn test_rank_by_cosine_ties_keep_insertion_order() {
        let rows = vec![
            (Insight::new("first"), encode_embedding(&[1.0, 0.0])),
            (Insight::new("second"), encode_embedding(&[1.0, 0.0])),
        ];
        let results = rank_by_cosine(&[1.0, 0.0], rows, 2);
        assert_eq!(results[0].insight.text, "first");
        assert_eq!(results[1].insight.text, "second");
    }
}
