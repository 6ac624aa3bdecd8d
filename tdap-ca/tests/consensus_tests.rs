//! Consensus snapshot builder integration tests

mod helpers;

use chrono::{Duration as ChronoDuration, Utc};
use helpers::*;
use tdap_ca::config::QualityGateConfig;
use tdap_ca::db;
use tdap_ca::models::{
    ConsensusSnapshot, Disagreement, DisagreementStatus, Severity, Trend,
};
use tdap_ca::services::{ConsensusTracker, QualityGate};
use tdap_common::events::EventBus;
use uuid::Uuid;

fn tracker(db: &sqlx::SqlitePool, retention: i64) -> ConsensusTracker {
    let gate = QualityGate::new(db.clone(), QualityGateConfig::default());
    ConsensusTracker::new(db.clone(), gate, EventBus::new(64), retention)
}

fn snapshot(topic_id: Uuid, score: f64, offset_secs: i64) -> ConsensusSnapshot {
    ConsensusSnapshot {
        id: Uuid::new_v4(),
        topic_id,
        snapshot_at: Utc::now() + ChronoDuration::seconds(offset_secs),
        consensus_score: score,
        divergence_score: 1.0 - score,
        trend: Trend::Stable,
        key_points: Vec::new(),
        disagreement_points: Vec::new(),
        sample_size: 0,
    }
}

#[tokio::test]
async fn empty_topic_yields_neutral_snapshot() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let tracker = tracker(&db, 50);

    // No quality-gated documents at all
    let snap = tracker.track_consensus(topic_id).await.unwrap();

    assert!((snap.consensus_score - 0.5).abs() < 1e-9);
    assert!((snap.divergence_score - 0.5).abs() < 1e-9);
    assert_eq!(snap.trend, Trend::Stable);
    assert!(snap.key_points.is_empty());
    assert!(snap.disagreement_points.is_empty());
    assert_eq!(snap.sample_size, 0);
}

#[tokio::test]
async fn consensus_and_divergence_are_complementary() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let tracker = tracker(&db, 50);

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "One",
        &["the sample size is adequate", "results are significant"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two",
        &["the sample size is adequate", "methods were flawed"], 0.8).await;

    let snap = tracker.track_consensus(topic_id).await.unwrap();
    assert!(((snap.consensus_score + snap.divergence_score) - 1.0).abs() < 1e-9);
    assert!(snap.consensus_score > 0.0 && snap.consensus_score < 1.0);
}

#[tokio::test]
async fn disjoint_claims_drive_score_toward_zero() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let tracker = tracker(&db, 50);

    // Two claims with no keyword overlap: pairwise similarity ~0
    seed_evaluated_document(&db, topic_id, None, "u1", "general", "One",
        &["quantum decoherence dominates"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two",
        &["ballot design influences turnout"], 0.8).await;

    let snap = tracker.track_consensus(topic_id).await.unwrap();
    assert!(snap.consensus_score < 0.05);
    assert!(snap.divergence_score > 0.95);
}

#[tokio::test]
async fn key_points_are_claims_shared_by_two_documents() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let tracker = tracker(&db, 50);

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "One",
        &["funding should increase", "alone in one"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two",
        &["funding should increase", "alone in two"], 0.8).await;

    let snap = tracker.track_consensus(topic_id).await.unwrap();
    assert_eq!(snap.key_points, vec!["funding should increase".to_string()]);
}

#[tokio::test]
async fn disagreement_points_rank_by_severity_and_skip_invalid() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();
    let tracker = tracker(&db, 50);

    let doc_a = Uuid::new_v4();
    let doc_b = Uuid::new_v4();
    for (title, severity, status) in [
        ("Low stakes quibble", Severity::Low, DisagreementStatus::Active),
        ("Core methodology clash", Severity::High, DisagreementStatus::Active),
        ("Moderate dispute", Severity::Medium, DisagreementStatus::Active),
        ("Stale invalidated clash", Severity::High, DisagreementStatus::Invalid),
    ] {
        let now = Utc::now();
        let d = Disagreement {
            id: Uuid::new_v4(),
            topic_id,
            doc1_id: doc_a,
            doc2_id: doc_b,
            title: title.to_string(),
            description: String::new(),
            claim1: "a".to_string(),
            claim2: "b".to_string(),
            severity,
            confidence: 0.9,
            branch_paths: Vec::new(),
            dedup_hash: Disagreement::dedup_hash(doc_a, doc_b, title),
            status,
            created_at: now,
            updated_at: now,
        };
        assert!(db::disagreements::insert_if_new(&db, &d).await.unwrap());
    }

    let snap = tracker.track_consensus(topic_id).await.unwrap();
    assert_eq!(
        snap.disagreement_points,
        vec![
            "Core methodology clash".to_string(),
            "Moderate dispute".to_string(),
            "Low stakes quibble".to_string(),
        ]
    );
}

#[tokio::test]
async fn trend_follows_recent_history() {
    let (_dir, db) = test_db().await;
    let tracker = tracker(&db, 50);

    // Converging: history well below the current (high-similarity) score
    let topic_up = Uuid::new_v4();
    for i in 0..5 {
        db::snapshots::insert_with_retention(&db, &snapshot(topic_up, 0.2, i - 100), 50)
            .await
            .unwrap();
    }
    seed_evaluated_document(&db, topic_up, None, "u1", "general", "One", &["identical claim"], 0.8).await;
    seed_evaluated_document(&db, topic_up, None, "u2", "general", "Two", &["identical claim"], 0.8).await;
    let snap = tracker.track_consensus(topic_up).await.unwrap();
    assert!((snap.consensus_score - 1.0).abs() < 1e-9);
    assert_eq!(snap.trend, Trend::Converging);

    // Diverging: history well above the neutral score of an empty topic
    let topic_down = Uuid::new_v4();
    for i in 0..5 {
        db::snapshots::insert_with_retention(&db, &snapshot(topic_down, 0.9, i - 100), 50)
            .await
            .unwrap();
    }
    let snap = tracker.track_consensus(topic_down).await.unwrap();
    assert!((snap.consensus_score - 0.5).abs() < 1e-9);
    assert_eq!(snap.trend, Trend::Diverging);
}

#[tokio::test]
async fn retention_keeps_fifty_snapshots_evicting_oldest_first() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    // 51 inserts with strictly increasing timestamps and traceable scores
    for i in 0..51 {
        let snap = snapshot(topic_id, i as f64 / 100.0, i);
        db::snapshots::insert_with_retention(&db, &snap, 50).await.unwrap();
    }

    assert_eq!(db::snapshots::count(&db, topic_id).await.unwrap(), 50);

    let remaining = db::snapshots::recent(&db, topic_id, 100).await.unwrap();
    assert_eq!(remaining.len(), 50);

    // The very first snapshot (score 0.00) was evicted; 0.01..=0.50 remain
    let oldest = remaining.last().unwrap();
    assert!((oldest.consensus_score - 0.01).abs() < 1e-9);
    let newest = remaining.first().unwrap();
    assert!((newest.consensus_score - 0.50).abs() < 1e-9);
}
