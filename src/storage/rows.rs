//! Row-to-model mapping and the embedding blob codec.
//!
//! Kept separate from query code so every store maps rows the same way.
//! Unknown frame or malformed JSON in a stored row fails the query loudly
//! instead of defaulting.

use crate::models::{
    Frame, Insight, KbChunk, KbSourceType, KnowledgeBase, TaskEventRecord, TaskLockRecord,
    TaskRecord, TaskState,
};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

/// Encodes an embedding as a little-endian float32 byte blob.
#[must_use]
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decodes a little-endian float32 byte blob back into a vector.
///
/// # Errors
///
/// Returns [`crate::Error::Storage`] if the blob length is not a multiple
/// of four bytes.
pub fn decode_embedding(bytes: &[u8]) -> crate::Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(crate::Error::Storage {
            operation: "decode_embedding".to_string(),
            cause: format!("blob length {} is not a multiple of 4", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Wraps a domain parse failure into a rusqlite conversion error so it
/// propagates out of `query_map` instead of being silently dropped.
fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_string_list(idx: usize, raw: &str) -> rusqlite::Result<Vec<String>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| conversion_err(idx, e))
}

fn parse_frame(idx: usize, raw: &str) -> rusqlite::Result<Frame> {
    Frame::parse(raw).map_err(|e| conversion_err(idx, e))
}

/// Maps an `insights` row to an [`Insight`].
pub(crate) fn row_to_insight(row: &Row<'_>) -> rusqlite::Result<Insight> {
    let frame: String = row.get("frame")?;
    let domains: String = row.get("domains")?;
    let entities: String = row.get("entities")?;
    let problems: String = row.get("problems")?;
    let resolutions: String = row.get("resolutions")?;
    let contexts: String = row.get("contexts")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Insight {
        id: Some(row.get("id")?),
        text: row.get("text")?,
        normalized_text: row.get("normalized_text")?,
        frame: parse_frame(3, &frame)?,
        domains: parse_string_list(4, &domains)?,
        entities: parse_string_list(5, &entities)?,
        problems: parse_string_list(6, &problems)?,
        resolutions: parse_string_list(7, &resolutions)?,
        contexts: parse_string_list(8, &contexts)?,
        confidence: row.get("confidence")?,
        source: row.get("source")?,
        created_at: Some(parse_timestamp(12, &created_at)?),
        updated_at: Some(parse_timestamp(13, &updated_at)?),
    })
}

/// Maps a `kb_chunks` row to a [`KbChunk`].
pub(crate) fn row_to_kb_chunk(row: &Row<'_>) -> rusqlite::Result<KbChunk> {
    let frame: String = row.get("frame")?;
    let domains: String = row.get("domains")?;
    let entities: String = row.get("entities")?;
    let problems: String = row.get("problems")?;
    let resolutions: String = row.get("resolutions")?;
    let contexts: String = row.get("contexts")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(KbChunk {
        id: Some(row.get("id")?),
        kb_id: row.get("kb_id")?,
        text: row.get("text")?,
        normalized_text: row.get("normalized_text")?,
        frame: parse_frame(4, &frame)?,
        domains: parse_string_list(5, &domains)?,
        entities: parse_string_list(6, &entities)?,
        problems: parse_string_list(7, &problems)?,
        resolutions: parse_string_list(8, &resolutions)?,
        contexts: parse_string_list(9, &contexts)?,
        confidence: row.get("confidence")?,
        source_url: row.get("source_url")?,
        created_at: Some(parse_timestamp(13, &created_at)?),
        updated_at: Some(parse_timestamp(14, &updated_at)?),
    })
}

/// Maps a `knowledge_bases` row to a [`KnowledgeBase`].
pub(crate) fn row_to_knowledge_base(row: &Row<'_>) -> rusqlite::Result<KnowledgeBase> {
    let source_type: String = row.get("source_type")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(KnowledgeBase {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        source_type: KbSourceType::parse(&source_type).map_err(|e| conversion_err(3, e))?,
        created_at: parse_timestamp(4, &created_at)?,
        updated_at: parse_timestamp(5, &updated_at)?,
    })
}

/// Maps a `tasks` row to a [`TaskRecord`].
pub(crate) fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(TaskRecord {
        task_id: row.get("task_id")?,
        title: row.get("title")?,
        status: TaskState::parse(&status).map_err(|e| conversion_err(2, e))?,
        owner: row.get("owner")?,
        retry_count: row.get("retry_count")?,
        version: row.get("version")?,
        created_at: parse_timestamp(6, &created_at)?,
        updated_at: parse_timestamp(7, &updated_at)?,
    })
}

/// Maps a `task_locks` row to a [`TaskLockRecord`].
pub(crate) fn row_to_lock(row: &Row<'_>) -> rusqlite::Result<TaskLockRecord> {
    let created_at: String = row.get("created_at")?;

    Ok(TaskLockRecord {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        resource: row.get("resource")?,
        active: row.get("active")?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}

/// Maps a `task_events` row to a [`TaskEventRecord`].
pub(crate) fn row_to_event(row: &Row<'_>) -> rusqlite::Result<TaskEventRecord> {
    let payload: String = row.get("payload")?;
    let created_at: String = row.get("created_at")?;

    Ok(TaskEventRecord {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        event_type: row.get("event_type")?,
        actor: row.get("actor")?,
        payload: if payload.is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&payload).map_err(|e| conversion_err(4, e))?
        },
        created_at: parse_timestamp(5, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_embedding_codec_round_trip() {
        let embedding = vec![1.0_f32, 0.0, -0.5, 0.25];
        let bytes = encode_embedding(&embedding);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_embedding(&bytes).unwrap(), embedding);
    }

    #[test]
    fn test_embedding_codec_is_little_endian() {
        let bytes = encode_embedding(&[1.0]);
        assert_eq!(bytes, 1.0_f32.to_le_bytes());
    }

    #[test]
    fn test_decode_rejects_ragged_blob() {
        let err = decode_embedding(&[0, 0, 0]);
        assert!(matches!(err, Err(crate::Error::Storage { .. })));
    }

    #[test]
    fn test_empty_embedding() {
        assert!(encode_embedding(&[]).is_empty());
        assert!(decode_embedding(&[]).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_codec_round_trips(values in proptest::collection::vec(-1.0_f32..1.0, 0..64)) {
            let decoded = decode_embedding(&encode_embedding(&values)).unwrap();
            prop_assert_eq!(decoded, values);
        }
    }
}
