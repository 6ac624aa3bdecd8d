//! Consensus snapshot builder
//!
//! Measures how much a topic's quality-gated documents agree: mean pairwise
//! Jaccard similarity over claim token sets, key points shared verbatim
//! across documents, the most severe open disagreements, and a trend against
//! recent history. Snapshots are append-only with FIFO retention.

use crate::db;
use crate::models::{ConsensusSnapshot, Trend};
use crate::services::claims;
use crate::services::quality_gate::QualityGate;
use crate::PipelineResult;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tdap_common::events::{EventBus, PipelineEvent};
use tracing::{debug, info};
use uuid::Uuid;

/// Trend classification margin: smaller movements count as stable
const TREND_MARGIN: f64 = 0.05;

/// Snapshots consulted for the trend baseline
const TREND_WINDOW: i64 = 5;

/// Neutral score when fewer than two claims exist; insufficient data is not
/// zero agreement
const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Clone)]
pub struct ConsensusTracker {
    db: SqlitePool,
    gate: QualityGate,
    events: EventBus,
    retention: i64,
}

impl ConsensusTracker {
    pub fn new(db: SqlitePool, gate: QualityGate, events: EventBus, retention: i64) -> Self {
        Self {
            db,
            gate,
            events,
            retention,
        }
    }

    /// Build and persist a consensus snapshot from the topic's documents
    pub async fn track_consensus(&self, topic_id: Uuid) -> PipelineResult<ConsensusSnapshot> {
        let qualified = self.gate.passing_documents(topic_id).await?;

        let claims_by_doc: Vec<(Uuid, Vec<String>)> = qualified
            .iter()
            .filter_map(|q| {
                q.summary
                    .as_ref()
                    .map(|s| (q.document.id, s.claims.clone()))
            })
            .collect();

        let all_claims: Vec<&str> = claims_by_doc
            .iter()
            .flat_map(|(_, claims)| claims.iter().map(String::as_str))
            .collect();

        let consensus_score =
            claims::mean_pairwise_similarity(&all_claims).unwrap_or(NEUTRAL_SCORE);
        let key_points = shared_key_points(&claims_by_doc, 5);

        debug!(
            topic_id = %topic_id,
            documents = claims_by_doc.len(),
            claims = all_claims.len(),
            score = consensus_score,
            "Computed claim-level consensus"
        );

        self.persist_snapshot(topic_id, consensus_score, key_points, all_claims.len() as i64)
            .await
    }

    /// Assemble the remaining snapshot fields (disagreement points, trend),
    /// then append with retention. Shared by the claim-level builder above
    /// and the weighted topic aggregator.
    pub(crate) async fn persist_snapshot(
        &self,
        topic_id: Uuid,
        consensus_score: f64,
        key_points: Vec<String>,
        sample_size: i64,
    ) -> PipelineResult<ConsensusSnapshot> {
        let disagreement_points: Vec<String> =
            db::disagreements::top_active_by_severity(&self.db, topic_id, 10)
                .await?
                .into_iter()
                .map(|d| d.title)
                .collect();

        let history: Vec<f64> = db::snapshots::recent(&self.db, topic_id, TREND_WINDOW)
            .await?
            .iter()
            .map(|s| s.consensus_score)
            .collect();
        let trend = classify_trend(consensus_score, &history);

        let snapshot = ConsensusSnapshot {
            id: Uuid::new_v4(),
            topic_id,
            snapshot_at: Utc::now(),
            consensus_score,
            divergence_score: 1.0 - consensus_score,
            trend,
            key_points,
            disagreement_points,
            sample_size,
        };

        db::snapshots::insert_with_retention(&self.db, &snapshot, self.retention).await?;

        info!(
            topic_id = %topic_id,
            score = consensus_score,
            trend = %trend,
            "Consensus snapshot recorded"
        );
        self.events.emit_lossy(PipelineEvent::SnapshotRecorded {
            topic_id,
            consensus_score,
            trend: trend.as_str().to_string(),
            timestamp: snapshot.snapshot_at,
        });

        Ok(snapshot)
    }
}

/// Claims appearing verbatim in at least two documents, most widely shared
/// first, capped at `limit`
fn shared_key_points(claims_by_doc: &[(Uuid, Vec<String>)], limit: usize) -> Vec<String> {
    let mut doc_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, claims) in claims_by_doc {
        // A document asserting the same claim twice still counts once
        let unique: std::collections::BTreeSet<&str> =
            claims.iter().map(String::as_str).collect();
        for claim in unique {
            *doc_counts.entry(claim).or_insert(0) += 1;
        }
    }

    let mut shared: Vec<(&str, usize)> = doc_counts
        .into_iter()
        .filter(|&(_, count)| count >= 2)
        .collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    shared
        .into_iter()
        .take(limit)
        .map(|(claim, _)| claim.to_string())
        .collect()
}

/// Compare the current score against the mean of recent snapshots
fn classify_trend(current: f64, history: &[f64]) -> Trend {
    if history.is_empty() {
        return Trend::Stable;
    }
    let baseline = history.iter().sum::<f64>() / history.len() as f64;
    let diff = current - baseline;
    if diff > TREND_MARGIN {
        Trend::Converging
    } else if diff < -TREND_MARGIN {
        Trend::Diverging
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_without_history_is_stable() {
        assert_eq!(classify_trend(0.9, &[]), Trend::Stable);
    }

    #[test]
    fn trend_classification_margins() {
        let history = [0.5, 0.5, 0.5];
        assert_eq!(classify_trend(0.56, &history), Trend::Converging);
        assert_eq!(classify_trend(0.44, &history), Trend::Diverging);
        assert_eq!(classify_trend(0.54, &history), Trend::Stable);
        assert_eq!(classify_trend(0.46, &history), Trend::Stable);
    }

    #[test]
    fn key_points_require_two_documents() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let claims = vec![
            (a, vec!["shared claim".to_string(), "unique to a".to_string()]),
            (b, vec!["shared claim".to_string(), "other shared".to_string()]),
            (c, vec!["other shared".to_string(), "shared claim".to_string()]),
        ];

        let points = shared_key_points(&claims, 5);
        assert_eq!(points[0], "shared claim"); // in 3 documents
        assert_eq!(points[1], "other shared"); // in 2 documents
        assert!(!points.contains(&"unique to a".to_string()));
    }

    #[test]
    fn repeated_claim_in_one_document_counts_once() {
        let a = Uuid::new_v4();
        let claims = vec![(
            a,
            vec!["repeated".to_string(), "repeated".to_string()],
        )];
        assert!(shared_key_points(&claims, 5).is_empty());
    }
}
