//! Summary persistence
//!
//! Summary rows are append-only. Which row is live is decided by the
//! document's `current_summary_id` pointer, moved in the same transaction as
//! the insert so the two can never disagree.

use super::{parse_json, parse_time, parse_uuid};
use crate::models::Summary;
use crate::PipelineResult;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<Summary> {
    Ok(Summary {
        id: parse_uuid(&row.get::<String, _>("guid"))?,
        document_id: parse_uuid(&row.get::<String, _>("document_id"))?,
        title: row.get("title"),
        overview: row.get("overview"),
        structure: parse_json(&row.get::<String, _>("structure")),
        claims: parse_json(&row.get::<String, _>("claims")),
        keywords: parse_json(&row.get::<String, _>("keywords")),
        model: row.get("model"),
        prompt_tokens: row.get("prompt_tokens"),
        completion_tokens: row.get("completion_tokens"),
        cost_cents: row.get("cost_cents"),
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
    })
}

/// Insert a summary and move the document's current pointer atomically
pub async fn insert_as_current(pool: &SqlitePool, summary: &Summary) -> PipelineResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO summaries (guid, document_id, title, overview, structure, claims,
             keywords, model, prompt_tokens, completion_tokens, cost_cents, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(summary.id.to_string())
    .bind(summary.document_id.to_string())
    .bind(&summary.title)
    .bind(&summary.overview)
    .bind(serde_json::to_string(&summary.structure).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&summary.claims).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&summary.keywords).unwrap_or_else(|_| "[]".into()))
    .bind(&summary.model)
    .bind(summary.prompt_tokens)
    .bind(summary.completion_tokens)
    .bind(summary.cost_cents)
    .bind(summary.created_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE documents SET current_summary_id = ?, updated_at = ? WHERE guid = ?")
        .bind(summary.id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(summary.document_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// The document's current summary, via its pointer
pub async fn current(pool: &SqlitePool, document_id: Uuid) -> PipelineResult<Option<Summary>> {
    let row = sqlx::query(
        "SELECT s.* FROM summaries s
         JOIN documents d ON d.current_summary_id = s.guid
         WHERE d.guid = ?",
    )
    .bind(document_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_summary).transpose()
}

/// Every summary row ever written for a document, newest first
pub async fn history(pool: &SqlitePool, document_id: Uuid) -> PipelineResult<Vec<Summary>> {
    let rows = sqlx::query(
        "SELECT * FROM summaries WHERE document_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(document_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_summary).collect()
}
