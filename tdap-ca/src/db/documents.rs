//! Document persistence and discussion-tree queries

use super::{parse_time, parse_uuid};
use crate::models::{DiscussionPath, Document, ProcessingStatus};
use crate::{PipelineError, PipelineResult};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<Document> {
    let parent_id: Option<String> = row.get("parent_id");
    let duplicate_of: Option<String> = row.get("duplicate_of");
    let current_summary_id: Option<String> = row.get("current_summary_id");
    let current_evaluation_id: Option<String> = row.get("current_evaluation_id");
    let status_json: String = row.get("processing_status");

    Ok(Document {
        id: parse_uuid(&row.get::<String, _>("guid"))?,
        topic_id: parse_uuid(&row.get::<String, _>("topic_id"))?,
        parent_id: parent_id.as_deref().map(parse_uuid).transpose()?,
        author_id: row.get("author_id"),
        title: row.get("title"),
        discipline: row.get("discipline"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        duplicate_of: duplicate_of.as_deref().map(parse_uuid).transpose()?,
        extracted_text: row.get("extracted_text"),
        processing_status: ProcessingStatus::from_json(&status_json),
        current_summary_id: current_summary_id.as_deref().map(parse_uuid).transpose()?,
        current_evaluation_id: current_evaluation_id.as_deref().map(parse_uuid).transpose()?,
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

/// Insert a new document
pub async fn insert(pool: &SqlitePool, doc: &Document) -> PipelineResult<()> {
    sqlx::query(
        "INSERT INTO documents (guid, topic_id, parent_id, author_id, title, discipline,
             content, content_hash, duplicate_of, extracted_text, processing_status,
             current_summary_id, current_evaluation_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(doc.id.to_string())
    .bind(doc.topic_id.to_string())
    .bind(doc.parent_id.map(|id| id.to_string()))
    .bind(&doc.author_id)
    .bind(&doc.title)
    .bind(&doc.discipline)
    .bind(&doc.content)
    .bind(&doc.content_hash)
    .bind(doc.duplicate_of.map(|id| id.to_string()))
    .bind(&doc.extracted_text)
    .bind(doc.processing_status.to_json())
    .bind(doc.current_summary_id.map(|id| id.to_string()))
    .bind(doc.current_evaluation_id.map(|id| id.to_string()))
    .bind(doc.created_at.to_rfc3339())
    .bind(doc.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a document by id
pub async fn get(pool: &SqlitePool, id: Uuid) -> PipelineResult<Option<Document>> {
    let row = sqlx::query("SELECT * FROM documents WHERE guid = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_document).transpose()
}

/// Load a document, erroring when absent
pub async fn require(pool: &SqlitePool, id: Uuid) -> PipelineResult<Document> {
    get(pool, id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("document {}", id)))
}

/// All documents of a topic, oldest first
pub async fn list_by_topic(pool: &SqlitePool, topic_id: Uuid) -> PipelineResult<Vec<Document>> {
    let rows = sqlx::query("SELECT * FROM documents WHERE topic_id = ? ORDER BY created_at ASC, rowid ASC")
        .bind(topic_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_document).collect()
}

/// Find an earlier document in the topic with the same content hash
pub async fn find_duplicate(
    pool: &SqlitePool,
    topic_id: Uuid,
    content_hash: &str,
    exclude_id: Uuid,
) -> PipelineResult<Option<Uuid>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT guid FROM documents
         WHERE topic_id = ? AND content_hash = ? AND guid != ?
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(topic_id.to_string())
    .bind(content_hash)
    .bind(exclude_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|(guid,)| parse_uuid(&guid)).transpose()
}

/// Persist extraction results in one statement
pub async fn update_extraction(
    pool: &SqlitePool,
    id: Uuid,
    extracted_text: &str,
    content_hash: &str,
    duplicate_of: Option<Uuid>,
) -> PipelineResult<()> {
    sqlx::query(
        "UPDATE documents
         SET extracted_text = ?, content_hash = ?, duplicate_of = ?, updated_at = ?
         WHERE guid = ?",
    )
    .bind(extracted_text)
    .bind(content_hash)
    .bind(duplicate_of.map(|id| id.to_string()))
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite the stage status map
pub async fn update_status(
    pool: &SqlitePool,
    id: Uuid,
    status: &ProcessingStatus,
) -> PipelineResult<()> {
    let result = sqlx::query(
        "UPDATE documents SET processing_status = ?, updated_at = ? WHERE guid = ?",
    )
    .bind(status.to_json())
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PipelineError::NotFound(format!("document {}", id)));
    }
    Ok(())
}

/// Ancestor chain of a document in the discussion tree.
///
/// Path is slash-joined ids from the thread root down to the document; depth
/// counts edges. The walk is bounded to protect against reference cycles.
pub async fn branch_path(pool: &SqlitePool, doc: &Document) -> PipelineResult<DiscussionPath> {
    const MAX_DEPTH: usize = 64;

    let mut chain = vec![doc.id];
    let mut cursor = doc.parent_id;

    while let Some(parent_id) = cursor {
        if chain.len() >= MAX_DEPTH {
            tracing::warn!(
                document_id = %doc.id,
                "Discussion tree deeper than {} levels, truncating branch path",
                MAX_DEPTH
            );
            break;
        }
        if chain.contains(&parent_id) {
            tracing::warn!(document_id = %doc.id, "Cycle in discussion tree, truncating branch path");
            break;
        }
        chain.push(parent_id);

        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT parent_id FROM documents WHERE guid = ?")
                .bind(parent_id.to_string())
                .fetch_optional(pool)
                .await?;

        cursor = match row {
            Some((Some(next),)) => Some(parse_uuid(&next)?),
            _ => None,
        };
    }

    chain.reverse();
    let depth = (chain.len() - 1) as i64;
    let path = chain
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("/");

    Ok(DiscussionPath { path, depth })
}
