//! Topic-level consensus aggregation
//!
//! Per-user-pair consensus records are the weighting unit: a long, deep,
//! multi-round exchange between two users is stronger evidence than a single
//! document swap. The weighted mean becomes the topic score. With no pair
//! records, aggregation falls back silently to the unweighted claim-level
//! builder over raw documents; that fallback is documented behavior, not an
//! error path.

use crate::db;
use crate::models::{ConsensusSnapshot, UserConsensus};
use crate::services::claims;
use crate::services::consensus_tracker::ConsensusTracker;
use crate::services::quality_gate::{QualifiedDocument, QualityGate};
use crate::PipelineResult;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tdap_common::events::{EventBus, PipelineEvent};
use tracing::{debug, info};
use uuid::Uuid;

/// Weighted topic-level consensus computed from user pairs
#[derive(Debug, Clone)]
pub struct TopicConsensus {
    pub consensus_score: f64,
    /// Consensus points asserted by at least two distinct user pairs
    pub key_points: Vec<String>,
    pub user_pairs: usize,
}

#[derive(Clone)]
pub struct TopicConsensusAggregator {
    db: SqlitePool,
    gate: QualityGate,
    tracker: ConsensusTracker,
    events: EventBus,
}

impl TopicConsensusAggregator {
    pub fn new(
        db: SqlitePool,
        gate: QualityGate,
        tracker: ConsensusTracker,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            gate,
            tracker,
            events,
        }
    }

    /// Recompute and upsert the UserConsensus record of every author pair
    /// with quality-gated documents in the topic.
    pub async fn refresh_user_consensus(&self, topic_id: Uuid) -> PipelineResult<Vec<UserConsensus>> {
        let qualified = self.gate.passing_documents(topic_id).await?;

        // Author of every topic document, gated or not: reply structure
        // exists independently of document quality.
        let all_docs = db::documents::list_by_topic(&self.db, topic_id).await?;
        let author_of: HashMap<Uuid, String> = all_docs
            .iter()
            .map(|d| (d.id, d.author_id.clone()))
            .collect();

        let mut by_author: BTreeMap<&str, Vec<&QualifiedDocument>> = BTreeMap::new();
        for q in &qualified {
            by_author
                .entry(q.document.author_id.as_str())
                .or_default()
                .push(q);
        }

        let authors: Vec<&str> = by_author.keys().copied().collect();
        let mut records = Vec::new();

        for i in 0..authors.len() {
            for j in (i + 1)..authors.len() {
                let (user1, user2) = (authors[i], authors[j]);
                let docs1 = &by_author[user1];
                let docs2 = &by_author[user2];

                let claims1: Vec<&str> = docs1
                    .iter()
                    .filter_map(|q| q.summary.as_ref())
                    .flat_map(|s| s.claims.iter().map(String::as_str))
                    .collect();
                let claims2: Vec<&str> = docs2
                    .iter()
                    .filter_map(|q| q.summary.as_ref())
                    .flat_map(|s| s.claims.iter().map(String::as_str))
                    .collect();

                let consensus_score =
                    claims::cross_similarity(&claims1, &claims2).unwrap_or(0.5);

                let set1: BTreeSet<&str> = claims1.iter().copied().collect();
                let set2: BTreeSet<&str> = claims2.iter().copied().collect();
                let consensus_points: Vec<String> =
                    set1.intersection(&set2).map(|s| s.to_string()).collect();

                let mut doc_ids = Vec::new();
                let mut discussion_paths = Vec::new();
                for q in docs1.iter().chain(docs2.iter()) {
                    doc_ids.push(q.document.id);
                    discussion_paths
                        .push(db::documents::branch_path(&self.db, &q.document).await?);
                }

                // One round per direct reply edge between the two users
                let rounds = all_docs
                    .iter()
                    .filter(|d| {
                        let Some(parent_id) = d.parent_id else {
                            return false;
                        };
                        let Some(parent_author) = author_of.get(&parent_id) else {
                            return false;
                        };
                        (d.author_id == user1 && parent_author == user2)
                            || (d.author_id == user2 && parent_author == user1)
                    })
                    .count() as i64;

                let record = UserConsensus {
                    id: Uuid::new_v4(),
                    topic_id,
                    user1_id: user1.to_string(),
                    user2_id: user2.to_string(),
                    consensus_score,
                    doc_ids,
                    discussion_paths,
                    rounds,
                    consensus_points,
                    updated_at: Utc::now(),
                };

                db::user_consensus::upsert(&self.db, &record).await?;
                records.push(record);
            }
        }

        debug!(
            topic_id = %topic_id,
            pairs = records.len(),
            "Refreshed user-pair consensus records"
        );

        Ok(records)
    }

    /// Weighted combination of the topic's user-pair records.
    ///
    /// Returns None when no records exist; the caller falls back to the
    /// claim-level algorithm.
    pub async fn calculate_topic_consensus(
        &self,
        topic_id: Uuid,
    ) -> PipelineResult<Option<TopicConsensus>> {
        let records = db::user_consensus::list_by_topic(&self.db, topic_id).await?;
        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(aggregate_pairs(&records)))
    }

    /// Persist a topic snapshot from the weighted aggregation, or from the
    /// raw claim-level algorithm when no pair records exist.
    pub async fn update_topic_consensus_snapshot(
        &self,
        topic_id: Uuid,
    ) -> PipelineResult<ConsensusSnapshot> {
        match self.calculate_topic_consensus(topic_id).await? {
            Some(topic) => {
                info!(
                    topic_id = %topic_id,
                    score = topic.consensus_score,
                    user_pairs = topic.user_pairs,
                    "Topic consensus aggregated from user pairs"
                );
                self.events.emit_lossy(PipelineEvent::TopicConsensusUpdated {
                    topic_id,
                    consensus_score: topic.consensus_score,
                    user_pairs: topic.user_pairs,
                    timestamp: Utc::now(),
                });

                self.tracker
                    .persist_snapshot(
                        topic_id,
                        topic.consensus_score,
                        topic.key_points,
                        topic.user_pairs as i64,
                    )
                    .await
            }
            None => {
                debug!(topic_id = %topic_id, "No user-pair records, falling back to claim-level consensus");
                self.tracker.track_consensus(topic_id).await
            }
        }
    }
}

/// Weighted mean of pair scores plus cross-pair point aggregation
fn aggregate_pairs(records: &[UserConsensus]) -> TopicConsensus {
    let total_weight: f64 = records.iter().map(|r| r.weight()).sum();

    let consensus_score = if total_weight > 0.0 {
        records
            .iter()
            .map(|r| r.consensus_score * r.weight())
            .sum::<f64>()
            / total_weight
    } else {
        records.iter().map(|r| r.consensus_score).sum::<f64>() / records.len() as f64
    };

    // Identical point text merges; support counts distinct pairs. Requiring
    // support of at least two keeps one biased pair from dominating the
    // topic narrative.
    let mut support: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        let unique: BTreeSet<&str> = record
            .consensus_points
            .iter()
            .map(String::as_str)
            .collect();
        for point in unique {
            *support.entry(point).or_insert(0) += 1;
        }
    }

    let mut shared: Vec<(&str, usize)> = support
        .into_iter()
        .filter(|&(_, pairs)| pairs >= 2)
        .collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    TopicConsensus {
        consensus_score,
        key_points: shared.into_iter().take(5).map(|(p, _)| p.to_string()).collect(),
        user_pairs: records.len(),
    }
}
