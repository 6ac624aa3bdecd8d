//! Disagreement persistence
//!
//! Inserts are deduplicated by (topic_id, dedup_hash); records are only ever
//! soft-invalidated, never deleted.

use super::{parse_json, parse_time, parse_uuid};
use crate::models::{Disagreement, DisagreementStatus, Severity};
use crate::{PipelineError, PipelineResult};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

fn row_to_disagreement(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<Disagreement> {
    let severity: String = row.get("severity");
    let status: String = row.get("status");

    Ok(Disagreement {
        id: parse_uuid(&row.get::<String, _>("guid"))?,
        topic_id: parse_uuid(&row.get::<String, _>("topic_id"))?,
        doc1_id: parse_uuid(&row.get::<String, _>("doc1_id"))?,
        doc2_id: parse_uuid(&row.get::<String, _>("doc2_id"))?,
        title: row.get("title"),
        description: row.get("description"),
        claim1: row.get("claim1"),
        claim2: row.get("claim2"),
        severity: Severity::parse(&severity)
            .ok_or_else(|| PipelineError::Internal(format!("invalid severity: {}", severity)))?,
        confidence: row.get("confidence"),
        branch_paths: parse_json(&row.get::<String, _>("branch_paths")),
        dedup_hash: row.get("dedup_hash"),
        status: DisagreementStatus::parse(&status)
            .ok_or_else(|| PipelineError::Internal(format!("invalid status: {}", status)))?,
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

/// Insert unless the (topic, dedup_hash) identity already exists.
///
/// Returns true when the row was inserted.
pub async fn insert_if_new(pool: &SqlitePool, d: &Disagreement) -> PipelineResult<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO disagreements (guid, topic_id, doc1_id, doc2_id, title,
             description, claim1, claim2, severity, confidence, branch_paths, dedup_hash,
             status, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(d.id.to_string())
    .bind(d.topic_id.to_string())
    .bind(d.doc1_id.to_string())
    .bind(d.doc2_id.to_string())
    .bind(&d.title)
    .bind(&d.description)
    .bind(&d.claim1)
    .bind(&d.claim2)
    .bind(d.severity.as_str())
    .bind(d.confidence)
    .bind(serde_json::to_string(&d.branch_paths).unwrap_or_else(|_| "[]".into()))
    .bind(&d.dedup_hash)
    .bind(d.status.as_str())
    .bind(d.created_at.to_rfc3339())
    .bind(d.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Every disagreement of a topic, any status
pub async fn list_by_topic(pool: &SqlitePool, topic_id: Uuid) -> PipelineResult<Vec<Disagreement>> {
    let rows = sqlx::query("SELECT * FROM disagreements WHERE topic_id = ? ORDER BY created_at ASC")
        .bind(topic_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_disagreement).collect()
}

/// Active disagreements ranked by severity (high first), ties by recency
pub async fn top_active_by_severity(
    pool: &SqlitePool,
    topic_id: Uuid,
    limit: i64,
) -> PipelineResult<Vec<Disagreement>> {
    let rows = sqlx::query(
        "SELECT * FROM disagreements
         WHERE topic_id = ? AND status = 'active'
         ORDER BY CASE severity WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END ASC,
                  created_at DESC
         LIMIT ?",
    )
    .bind(topic_id.to_string())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_disagreement).collect()
}

/// Dedup hashes already present for a topic
pub async fn hashes_for_topic(pool: &SqlitePool, topic_id: Uuid) -> PipelineResult<HashSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT dedup_hash FROM disagreements WHERE topic_id = ?")
        .bind(topic_id.to_string())
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|(h,)| h).collect())
}

/// Flip a disagreement's status
pub async fn set_status(
    pool: &SqlitePool,
    id: Uuid,
    status: DisagreementStatus,
) -> PipelineResult<()> {
    sqlx::query("UPDATE disagreements SET status = ?, updated_at = ? WHERE guid = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}
