//! Topic consensus aggregation integration tests

mod helpers;

use chrono::Utc;
use helpers::*;
use tdap_ca::config::QualityGateConfig;
use tdap_ca::db;
use tdap_ca::models::UserConsensus;
use tdap_ca::services::{ConsensusTracker, QualityGate, TopicConsensusAggregator};
use tdap_common::events::EventBus;
use uuid::Uuid;

fn aggregator(db: &sqlx::SqlitePool) -> TopicConsensusAggregator {
    let gate = QualityGate::new(db.clone(), QualityGateConfig::default());
    let tracker = ConsensusTracker::new(db.clone(), gate.clone(), EventBus::new(64), 50);
    TopicConsensusAggregator::new(db.clone(), gate, tracker, EventBus::new(64))
}

fn pair_record(
    topic_id: Uuid,
    users: (&str, &str),
    score: f64,
    doc_count: usize,
    points: &[&str],
) -> UserConsensus {
    UserConsensus {
        id: Uuid::new_v4(),
        topic_id,
        user1_id: users.0.to_string(),
        user2_id: users.1.to_string(),
        consensus_score: score,
        doc_ids: (0..doc_count).map(|_| Uuid::new_v4()).collect(),
        discussion_paths: Vec::new(),
        rounds: 0,
        consensus_points: points.iter().map(|p| p.to_string()).collect(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn weighted_topic_score_matches_hand_computed_value() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let agg = aggregator(&db);

    // Scores {0.8, 0.6, 0.4} with doc-count weights {2, 1, 1}
    for record in [
        pair_record(topic_id, ("a", "b"), 0.8, 2, &[]),
        pair_record(topic_id, ("a", "c"), 0.6, 1, &[]),
        pair_record(topic_id, ("b", "c"), 0.4, 1, &[]),
    ] {
        db::user_consensus::upsert(&db, &record).await.unwrap();
    }

    let topic = agg.calculate_topic_consensus(topic_id).await.unwrap().unwrap();
    assert!((topic.consensus_score - 0.65).abs() < 1e-9);
    assert_eq!(topic.user_pairs, 3);
}

#[tokio::test]
async fn key_points_need_support_from_two_pairs() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let agg = aggregator(&db);

    for record in [
        pair_record(topic_id, ("a", "b"), 0.5, 1, &["widely held view", "fringe view"]),
        pair_record(topic_id, ("a", "c"), 0.5, 1, &["widely held view"]),
    ] {
        db::user_consensus::upsert(&db, &record).await.unwrap();
    }

    let topic = agg.calculate_topic_consensus(topic_id).await.unwrap().unwrap();
    assert_eq!(topic.key_points, vec!["widely held view".to_string()]);
}

#[tokio::test]
async fn refresh_builds_pair_records_from_documents() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let agg = aggregator(&db);

    let root = seed_evaluated_document(
        &db, topic_id, None, "alice", "general", "Root",
        &["shared position", "alice only point"], 0.8,
    )
    .await;
    seed_evaluated_document(
        &db, topic_id, Some(root.id), "bob", "general", "Reply",
        &["shared position", "bob only point"], 0.8,
    )
    .await;

    let records = agg.refresh_user_consensus(topic_id).await.unwrap();
    assert_eq!(records.len(), 1);

    let pair = &records[0];
    assert_eq!((pair.user1_id.as_str(), pair.user2_id.as_str()), ("alice", "bob"));
    assert_eq!(pair.doc_ids.len(), 2);
    // Bob's reply to Alice is one round of direct exchange
    assert_eq!(pair.rounds, 1);
    assert_eq!(pair.consensus_points, vec!["shared position".to_string()]);
    // Root at depth 0, reply at depth 1
    let mut depths: Vec<i64> = pair.discussion_paths.iter().map(|p| p.depth).collect();
    depths.sort_unstable();
    assert_eq!(depths, vec![0, 1]);
    assert!(pair.consensus_score > 0.0);

    // Re-running upserts in place rather than accumulating rows
    agg.refresh_user_consensus(topic_id).await.unwrap();
    assert_eq!(db::user_consensus::list_by_topic(&db, topic_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn weighted_snapshot_uses_pair_records() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let agg = aggregator(&db);

    for record in [
        pair_record(topic_id, ("a", "b"), 0.9, 1, &[]),
        pair_record(topic_id, ("a", "c"), 0.9, 1, &[]),
    ] {
        db::user_consensus::upsert(&db, &record).await.unwrap();
    }

    let snap = agg.update_topic_consensus_snapshot(topic_id).await.unwrap();
    assert!((snap.consensus_score - 0.9).abs() < 1e-9);
    // Sample size counts user pairs on the weighted path
    assert_eq!(snap.sample_size, 2);
    assert_eq!(db::snapshots::count(&db, topic_id).await.unwrap(), 1);
}

#[tokio::test]
async fn zero_pair_records_fall_back_to_claim_level_algorithm() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let agg = aggregator(&db);

    // A single-author topic produces no user pairs
    seed_evaluated_document(
        &db, topic_id, None, "solo", "general", "Monologue",
        &["the only claim", "the only claim"], 0.8,
    )
    .await;

    assert!(agg.calculate_topic_consensus(topic_id).await.unwrap().is_none());

    // The fallback is silent: a snapshot still lands, built from raw claims
    let snap = agg.update_topic_consensus_snapshot(topic_id).await.unwrap();
    assert!((snap.consensus_score - 1.0).abs() < 1e-9);
    assert_eq!(snap.sample_size, 2);
    assert_eq!(db::snapshots::count(&db, topic_id).await.unwrap(), 1);
}
