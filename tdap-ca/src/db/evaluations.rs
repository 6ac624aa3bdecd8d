//! Evaluation persistence
//!
//! Same append-plus-pointer discipline as summaries: rows accumulate, the
//! document's `current_evaluation_id` names the live one.

use super::{parse_json, parse_time, parse_uuid};
use crate::models::Evaluation;
use crate::PipelineResult;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn row_to_evaluation(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<Evaluation> {
    Ok(Evaluation {
        id: parse_uuid(&row.get::<String, _>("guid"))?,
        document_id: parse_uuid(&row.get::<String, _>("document_id"))?,
        discipline: row.get("discipline"),
        scores: parse_json(&row.get::<String, _>("scores")),
        overall_score: row.get("overall_score"),
        verdict: row.get("verdict"),
        prompt_tokens: row.get("prompt_tokens"),
        completion_tokens: row.get("completion_tokens"),
        cost_cents: row.get("cost_cents"),
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
    })
}

/// Insert an evaluation and move the document's current pointer atomically
pub async fn insert_as_current(pool: &SqlitePool, eval: &Evaluation) -> PipelineResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO evaluations (guid, document_id, discipline, scores, overall_score,
             verdict, prompt_tokens, completion_tokens, cost_cents, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(eval.id.to_string())
    .bind(eval.document_id.to_string())
    .bind(&eval.discipline)
    .bind(serde_json::to_string(&eval.scores).unwrap_or_else(|_| "{}".into()))
    .bind(eval.overall_score)
    .bind(&eval.verdict)
    .bind(eval.prompt_tokens)
    .bind(eval.completion_tokens)
    .bind(eval.cost_cents)
    .bind(eval.created_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE documents SET current_evaluation_id = ?, updated_at = ? WHERE guid = ?")
        .bind(eval.id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(eval.document_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// The document's current evaluation, via its pointer
pub async fn current(pool: &SqlitePool, document_id: Uuid) -> PipelineResult<Option<Evaluation>> {
    let row = sqlx::query(
        "SELECT e.* FROM evaluations e
         JOIN documents d ON d.current_evaluation_id = e.guid
         WHERE d.guid = ?",
    )
    .bind(document_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_evaluation).transpose()
}
