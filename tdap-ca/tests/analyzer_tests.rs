//! Disagreement analyzer integration tests

mod helpers;

use helpers::*;
use std::sync::Arc;
use std::time::Duration;
use tdap_ca::config::{AiServiceConfig, QualityGateConfig};
use tdap_ca::db;
use tdap_ca::dispatch::{InProcessDispatcher, JobDispatcher};
use tdap_ca::models::DisagreementStatus;
use tdap_ca::services::ai_client::{AiClientError, AiTask};
use tdap_ca::services::{DisagreementAnalyzer, QualityGate};
use tdap_common::events::EventBus;
use tokio::sync::mpsc::UnboundedReceiver;
use tdap_ca::dispatch::StageJob;
use uuid::Uuid;

fn analyzer(
    db: &sqlx::SqlitePool,
    ai: Arc<MockAi>,
    debounce: Duration,
) -> (DisagreementAnalyzer, UnboundedReceiver<StageJob>) {
    let (dispatcher, rx) = InProcessDispatcher::new();
    let dispatcher: Arc<dyn JobDispatcher> = Arc::new(dispatcher);
    let gate = QualityGate::new(db.clone(), QualityGateConfig::default());

    (
        DisagreementAnalyzer::new(
            db.clone(),
            ai,
            gate,
            dispatcher,
            EventBus::new(64),
            AiServiceConfig::default(),
            debounce,
            10,
        ),
        rx,
    )
}

/// Handler that reports a conflict for every pair
fn always_conflicting() -> Arc<MockAi> {
    MockAi::new(|req| match req.task {
        AiTask::DetectDisagreement => Ok(completion(&pair_payload(
            "Claims conflict",
            "first position",
            "second position",
            "medium",
            0.7,
        ))),
        _ => Ok(completion(&pair_none_payload())),
    })
}

#[tokio::test]
async fn incremental_analysis_only_pairs_the_new_document() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    let a = seed_evaluated_document(&db, topic_id, None, "u1", "general", "Alpha", &["alpha claim"], 0.8).await;
    let b = seed_evaluated_document(&db, topic_id, None, "u2", "general", "Beta", &["beta claim"], 0.8).await;
    let c = seed_evaluated_document(&db, topic_id, None, "u3", "general", "Gamma", &["gamma claim"], 0.8).await;

    let ai = always_conflicting();
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::from_secs(300));

    let outcome = analyzer
        .analyze_incremental(topic_id, Some(c.id))
        .await
        .unwrap();

    // Two pairs: {c,a} and {c,b}; every result involves the new document
    assert_eq!(outcome.pairs_examined, 2);
    assert_eq!(outcome.disagreements.len(), 2);
    for d in &outcome.disagreements {
        assert!(d.doc1_id == c.id || d.doc2_id == c.id);
        assert!(!d.branch_paths.is_empty());
    }

    // A later full analysis adds only the pair the incremental run skipped
    let (full_analyzer, _rx2) = analyzer_for_full(&db, ai.clone());
    let full = full_analyzer
        .analyze_incremental(topic_id, None)
        .await
        .unwrap();
    assert_eq!(full.pairs_examined, 3);
    assert_eq!(full.disagreements.len(), 1);
    let fresh = &full.disagreements[0];
    assert!(
        (fresh.doc1_id == a.id && fresh.doc2_id == b.id)
            || (fresh.doc1_id == b.id && fresh.doc2_id == a.id)
    );

    // All three pairs persisted exactly once
    assert_eq!(db::disagreements::list_by_topic(&db, topic_id).await.unwrap().len(), 3);
}

fn analyzer_for_full(
    db: &sqlx::SqlitePool,
    ai: Arc<MockAi>,
) -> (DisagreementAnalyzer, UnboundedReceiver<StageJob>) {
    analyzer(db, ai, Duration::from_secs(300))
}

#[tokio::test]
async fn repeat_call_within_debounce_window_is_served_from_cache() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "One", &["claim a"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two", &["claim b"], 0.8).await;

    let ai = always_conflicting();
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::from_secs(300));

    let first = analyzer.analyze_incremental(topic_id, None).await.unwrap();
    let second = analyzer.analyze_incremental(topic_id, None).await.unwrap();

    // One pair, analyzed once; the second call did no AI work
    assert_eq!(ai.calls(AiTask::DetectDisagreement), 1);
    assert_eq!(first.pairs_examined, second.pairs_examined);
    assert_eq!(first.disagreements.len(), second.disagreements.len());
}

#[tokio::test]
async fn concurrent_same_key_calls_share_one_analysis() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "One", &["claim a"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two", &["claim b"], 0.8).await;

    let ai = always_conflicting();
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::from_secs(300));

    let (r1, r2) = tokio::join!(
        analyzer.analyze_incremental(topic_id, None),
        analyzer.analyze_incremental(topic_id, None),
    );

    assert!(r1.is_ok());
    assert!(r2.is_ok());
    // The concurrent caller joined or hit the cache; never a second AI pass
    assert_eq!(ai.calls(AiTask::DetectDisagreement), 1);
}

#[tokio::test]
async fn scoped_and_whole_topic_runs_cache_separately() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    let a = seed_evaluated_document(&db, topic_id, None, "u1", "general", "One", &["claim a"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two", &["claim b"], 0.8).await;

    let ai = MockAi::new(|req| match req.task {
        AiTask::DetectDisagreement => Ok(completion(&pair_none_payload())),
        _ => Ok(completion(&pair_none_payload())),
    });
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::from_secs(300));

    analyzer.analyze_incremental(topic_id, None).await.unwrap();
    // Different job, different cache key: this runs its own AI pass
    analyzer
        .analyze_incremental(topic_id, Some(a.id))
        .await
        .unwrap();

    assert_eq!(ai.calls(AiTask::DetectDisagreement), 2);
}

#[tokio::test]
async fn pairs_without_claims_are_skipped() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "Claimless", &[], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Claimful", &["claim"], 0.8).await;

    let ai = always_conflicting();
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::from_secs(300));

    let outcome = analyzer.analyze_incremental(topic_id, None).await.unwrap();
    assert_eq!(outcome.pairs_examined, 0);
    assert_eq!(ai.calls(AiTask::DetectDisagreement), 0);
}

#[tokio::test]
async fn one_pair_failure_does_not_abort_the_batch() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "Alpha", &["alpha token claim"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Beta", &["beta token claim"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u3", "general", "Gamma", &["gamma token claim"], 0.8).await;

    // The alpha-beta pair fails; the other two pairs conflict normally
    let ai = MockAi::new(|req| match req.task {
        AiTask::DetectDisagreement => {
            if req.prompt.contains("alpha token") && req.prompt.contains("beta token") {
                Err(AiClientError::Network("connection reset".to_string()))
            } else {
                Ok(completion(&pair_payload(
                    "Claims conflict",
                    "x",
                    "y",
                    "low",
                    0.6,
                )))
            }
        }
        _ => Ok(completion(&pair_none_payload())),
    });
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::from_secs(300));

    let outcome = analyzer.analyze_incremental(topic_id, None).await.unwrap();
    assert_eq!(outcome.pairs_examined, 3);
    assert_eq!(outcome.disagreements.len(), 2);
}

#[tokio::test]
async fn rerun_deduplicates_by_pair_and_title() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "One", &["claim a"], 0.8).await;
    seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two", &["claim b"], 0.8).await;

    let ai = always_conflicting();
    // Zero debounce: the second run is a real re-analysis, not a cache hit
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::ZERO);

    let first = analyzer.analyze_incremental(topic_id, None).await.unwrap();
    assert_eq!(first.disagreements.len(), 1);

    let second = analyzer.analyze_incremental(topic_id, None).await.unwrap();
    assert_eq!(second.disagreements.len(), 0);
    assert_eq!(ai.calls(AiTask::DetectDisagreement), 2);

    // Only one row persisted for the pair+title identity
    assert_eq!(db::disagreements::list_by_topic(&db, topic_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn disagreement_is_invalidated_not_deleted_when_gate_fails() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "One", &["claim a"], 0.8).await;
    let weak = seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two", &["claim b"], 0.8).await;

    let ai = always_conflicting();
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::from_secs(300));

    let outcome = analyzer.analyze_incremental(topic_id, None).await.unwrap();
    assert_eq!(outcome.disagreements.len(), 1);

    // Nothing to invalidate while both documents pass
    assert_eq!(analyzer.validate_disagreements(topic_id).await.unwrap(), 0);

    // The second document's evaluation drops below the 0.6 default threshold
    reevaluate_document(&db, weak.id, "general", 0.2).await;
    assert_eq!(analyzer.validate_disagreements(topic_id).await.unwrap(), 1);

    let stored = db::disagreements::list_by_topic(&db, topic_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, DisagreementStatus::Invalid);

    // A second pass is a no-op; the record stays queryable
    assert_eq!(analyzer.validate_disagreements(topic_id).await.unwrap(), 0);
}

#[tokio::test]
async fn unqualified_new_document_yields_empty_analysis() {
    let (_dir, db) = test_db().await;
    let topic_id = Uuid::new_v4();

    seed_evaluated_document(&db, topic_id, None, "u1", "general", "One", &["claim a"], 0.8).await;
    // Below threshold: never enters the candidate set
    let rejected =
        seed_evaluated_document(&db, topic_id, None, "u2", "general", "Two", &["claim b"], 0.3).await;

    let ai = always_conflicting();
    let (analyzer, _rx) = analyzer(&db, ai.clone(), Duration::from_secs(300));

    let outcome = analyzer
        .analyze_incremental(topic_id, Some(rejected.id))
        .await
        .unwrap();
    assert_eq!(outcome.pairs_examined, 0);
    assert!(outcome.disagreements.is_empty());
    assert_eq!(ai.calls(AiTask::DetectDisagreement), 0);
}
