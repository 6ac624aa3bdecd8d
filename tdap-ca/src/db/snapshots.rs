//! Consensus snapshot persistence
//!
//! Append-only with FIFO retention: before inserting, the oldest rows beyond
//! the retention budget are purged.

use super::{parse_json, parse_time, parse_uuid};
use crate::models::{ConsensusSnapshot, Trend};
use crate::{PipelineError, PipelineResult};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<ConsensusSnapshot> {
    let trend: String = row.get("trend");

    Ok(ConsensusSnapshot {
        id: parse_uuid(&row.get::<String, _>("guid"))?,
        topic_id: parse_uuid(&row.get::<String, _>("topic_id"))?,
        snapshot_at: parse_time(&row.get::<String, _>("snapshot_at"))?,
        consensus_score: row.get("consensus_score"),
        divergence_score: row.get("divergence_score"),
        trend: Trend::parse(&trend)
            .ok_or_else(|| PipelineError::Internal(format!("invalid trend: {}", trend)))?,
        key_points: parse_json(&row.get::<String, _>("key_points")),
        disagreement_points: parse_json(&row.get::<String, _>("disagreement_points")),
        sample_size: row.get("sample_size"),
    })
}

/// Append a snapshot, pruning the topic to the retention budget first
pub async fn insert_with_retention(
    pool: &SqlitePool,
    snapshot: &ConsensusSnapshot,
    retention: i64,
) -> PipelineResult<()> {
    let mut tx = pool.begin().await?;

    // Make room so the insert lands within budget: keep retention-1 rows.
    sqlx::query(
        "DELETE FROM consensus_snapshots WHERE guid IN (
             SELECT guid FROM consensus_snapshots
             WHERE topic_id = ?
             ORDER BY snapshot_at DESC, rowid DESC
             LIMIT -1 OFFSET ?
         )",
    )
    .bind(snapshot.topic_id.to_string())
    .bind(retention - 1)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO consensus_snapshots (guid, topic_id, snapshot_at, consensus_score,
             divergence_score, trend, key_points, disagreement_points, sample_size)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(snapshot.id.to_string())
    .bind(snapshot.topic_id.to_string())
    .bind(snapshot.snapshot_at.to_rfc3339())
    .bind(snapshot.consensus_score)
    .bind(snapshot.divergence_score)
    .bind(snapshot.trend.as_str())
    .bind(serde_json::to_string(&snapshot.key_points).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&snapshot.disagreement_points).unwrap_or_else(|_| "[]".into()))
    .bind(snapshot.sample_size)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Most recent snapshots, newest first
pub async fn recent(
    pool: &SqlitePool,
    topic_id: Uuid,
    limit: i64,
) -> PipelineResult<Vec<ConsensusSnapshot>> {
    let rows = sqlx::query(
        "SELECT * FROM consensus_snapshots
         WHERE topic_id = ?
         ORDER BY snapshot_at DESC, rowid DESC
         LIMIT ?",
    )
    .bind(topic_id.to_string())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_snapshot).collect()
}

/// Snapshot count for a topic
pub async fn count(pool: &SqlitePool, topic_id: Uuid) -> PipelineResult<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM consensus_snapshots WHERE topic_id = ?")
        .bind(topic_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}
