//! Per-user-pair consensus persistence
//!
//! One row per normalized (topic, user1, user2) triple, upserted whenever
//! the pair is recomputed.

use super::{parse_json, parse_time, parse_uuid};
use crate::models::UserConsensus;
use crate::PipelineResult;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn row_to_user_consensus(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<UserConsensus> {
    let doc_ids: Vec<String> = parse_json(&row.get::<String, _>("doc_ids"));

    Ok(UserConsensus {
        id: parse_uuid(&row.get::<String, _>("guid"))?,
        topic_id: parse_uuid(&row.get::<String, _>("topic_id"))?,
        user1_id: row.get("user1_id"),
        user2_id: row.get("user2_id"),
        consensus_score: row.get("consensus_score"),
        doc_ids: doc_ids
            .iter()
            .map(|s| parse_uuid(s))
            .collect::<PipelineResult<Vec<_>>>()?,
        discussion_paths: parse_json(&row.get::<String, _>("discussion_paths")),
        rounds: row.get("rounds"),
        consensus_points: parse_json(&row.get::<String, _>("consensus_points")),
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

/// Insert or update the pair's row
pub async fn upsert(pool: &SqlitePool, uc: &UserConsensus) -> PipelineResult<()> {
    let doc_ids: Vec<String> = uc.doc_ids.iter().map(|id| id.to_string()).collect();

    sqlx::query(
        "INSERT INTO user_consensus (guid, topic_id, user1_id, user2_id, consensus_score,
             doc_ids, discussion_paths, rounds, consensus_points, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(topic_id, user1_id, user2_id) DO UPDATE SET
             consensus_score = excluded.consensus_score,
             doc_ids = excluded.doc_ids,
             discussion_paths = excluded.discussion_paths,
             rounds = excluded.rounds,
             consensus_points = excluded.consensus_points,
             updated_at = excluded.updated_at",
    )
    .bind(uc.id.to_string())
    .bind(uc.topic_id.to_string())
    .bind(&uc.user1_id)
    .bind(&uc.user2_id)
    .bind(uc.consensus_score)
    .bind(serde_json::to_string(&doc_ids).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&uc.discussion_paths).unwrap_or_else(|_| "[]".into()))
    .bind(uc.rounds)
    .bind(serde_json::to_string(&uc.consensus_points).unwrap_or_else(|_| "[]".into()))
    .bind(uc.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// All pair records for a topic
pub async fn list_by_topic(pool: &SqlitePool, topic_id: Uuid) -> PipelineResult<Vec<UserConsensus>> {
    let rows = sqlx::query(
        "SELECT * FROM user_consensus WHERE topic_id = ? ORDER BY user1_id ASC, user2_id ASC",
    )
    .bind(topic_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_user_consensus).collect()
}
