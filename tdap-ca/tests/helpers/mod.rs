//! Shared helpers for integration tests
//!
//! Provides a temporary database, a scripted mock AI service, seeded
//! documents, and a harness that drains the in-process job channel
//! deterministically.

#![allow(dead_code)]

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tdap_ca::config::ServiceConfig;
use tdap_ca::db;
use tdap_ca::dispatch::{InProcessDispatcher, JobDispatcher, JobRunner, StageJob};
use tdap_ca::models::{
    Document, Evaluation, ProcessingStage, StageState, Summary,
};
use tdap_ca::services::ai_client::{
    AiClientError, AiCompletion, AiOutcome, AiRequest, AiTask, AiTextService, AiUsage,
};
use tdap_ca::{PipelineError, PipelineResult};
use tdap_common::events::EventBus;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// Open a fresh database in a temp directory
pub async fn test_db() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let pool = tdap_common::db::init_database(&dir.path().join("tdap-test.db"))
        .await
        .expect("init test database");
    (dir, pool)
}

// ============================================================================
// Mock AI service
// ============================================================================

type Handler = dyn Fn(&AiRequest) -> Result<AiOutcome, AiClientError> + Send + Sync;

/// Scripted AI service: a handler closure decides every response, and calls
/// are counted per task.
pub struct MockAi {
    handler: Box<Handler>,
    counts: Mutex<HashMap<&'static str, usize>>,
}

impl MockAi {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&AiRequest) -> Result<AiOutcome, AiClientError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            counts: Mutex::new(HashMap::new()),
        })
    }

    /// Handler that summarizes with fixed claims and scores everything 0.8
    pub fn well_behaved() -> Arc<Self> {
        Self::new(|req| match req.task {
            AiTask::Summarize => Ok(completion(&summary_payload(
                "Summary",
                &["claim one", "claim two"],
            ))),
            AiTask::Evaluate => Ok(completion(&evaluation_payload(0.8, "solid"))),
            AiTask::DetectDisagreement => Ok(completion(&pair_none_payload())),
        })
    }

    pub fn calls(&self, task: AiTask) -> usize {
        *self
            .counts
            .lock()
            .unwrap()
            .get(task.as_str())
            .unwrap_or(&0)
    }

    pub fn total_calls(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }
}

#[async_trait::async_trait]
impl AiTextService for MockAi {
    async fn call(&self, request: AiRequest) -> Result<AiOutcome, AiClientError> {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(request.task.as_str())
            .or_insert(0) += 1;
        (self.handler)(&request)
    }
}

/// Wrap text as a successful completion with token usage
pub fn completion(text: &str) -> AiOutcome {
    AiOutcome::Completion(AiCompletion {
        text: text.to_string(),
        usage: AiUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            cost_cents: 0.1,
        },
    })
}

pub fn summary_payload(title: &str, claims: &[&str]) -> String {
    serde_json::json!({
        "title": title,
        "overview": format!("{} overview", title),
        "structure": ["introduction", "argument", "conclusion"],
        "claims": claims,
        "keywords": ["test"],
    })
    .to_string()
}

pub fn evaluation_payload(score: f64, verdict: &str) -> String {
    serde_json::json!({
        "scores": {"rigor": score, "evidence": score, "clarity": score},
        "verdict": verdict,
    })
    .to_string()
}

pub fn pair_none_payload() -> String {
    serde_json::json!({ "disagreement": null }).to_string()
}

pub fn pair_payload(
    title: &str,
    claim1: &str,
    claim2: &str,
    severity: &str,
    confidence: f64,
) -> String {
    serde_json::json!({
        "disagreement": {
            "title": title,
            "description": format!("{} described", title),
            "claim1": claim1,
            "claim2": claim2,
            "severity": severity,
            "confidence": confidence,
        }
    })
    .to_string()
}

// ============================================================================
// Seeding
// ============================================================================

/// Insert a fully processed document: extracted text, completed stages, a
/// current summary with the given claims, and a current evaluation with the
/// given overall score.
pub async fn seed_evaluated_document(
    db: &SqlitePool,
    topic_id: Uuid,
    parent_id: Option<Uuid>,
    author_id: &str,
    discipline: &str,
    title: &str,
    claims: &[&str],
    score: f64,
) -> Document {
    let mut doc = Document::new(
        topic_id,
        parent_id,
        author_id,
        title,
        discipline,
        format!("{} body text", title).into_bytes(),
    );
    doc.extracted_text = Some(format!("{} body text", title));
    for stage in ProcessingStage::all() {
        doc.processing_status.set(stage, StageState::Completed);
    }
    db::documents::insert(db, &doc).await.expect("insert document");

    let mut summary = Summary::new(doc.id);
    summary.title = title.to_string();
    summary.overview = format!("{} overview", title);
    summary.claims = claims.iter().map(|c| c.to_string()).collect();
    db::summaries::insert_as_current(db, &summary)
        .await
        .expect("insert summary");

    let mut evaluation = Evaluation::new(doc.id, discipline);
    evaluation.scores.insert("rigor".to_string(), score);
    evaluation.verdict = "seeded".to_string();
    evaluation.recompute_overall();
    db::evaluations::insert_as_current(db, &evaluation)
        .await
        .expect("insert evaluation");

    db::documents::require(db, doc.id).await.expect("reload document")
}

/// Replace a document's current evaluation with one at the given score
pub async fn reevaluate_document(db: &SqlitePool, document_id: Uuid, discipline: &str, score: f64) {
    let mut evaluation = Evaluation::new(document_id, discipline);
    evaluation.scores.insert("rigor".to_string(), score);
    evaluation.verdict = "re-evaluated".to_string();
    evaluation.recompute_overall();
    db::evaluations::insert_as_current(db, &evaluation)
        .await
        .expect("insert evaluation");
}

// ============================================================================
// Pipeline harness
// ============================================================================

/// A full pipeline wired to the in-process dispatcher, with the job channel
/// held open for deterministic draining.
pub struct TestHarness {
    pub _dir: TempDir,
    pub db: SqlitePool,
    pub events: EventBus,
    pub ai: Arc<MockAi>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub runner: Arc<JobRunner>,
    rx: UnboundedReceiver<StageJob>,
}

pub async fn harness(ai: Arc<MockAi>) -> TestHarness {
    harness_with(ai, ServiceConfig::default()).await
}

pub async fn harness_with(ai: Arc<MockAi>, config: ServiceConfig) -> TestHarness {
    let (dir, db) = test_db().await;
    let events = EventBus::new(64);

    let (dispatcher, rx) = InProcessDispatcher::new();
    let dispatcher: Arc<dyn JobDispatcher> = Arc::new(dispatcher);
    let runner = Arc::new(JobRunner::new(
        db.clone(),
        events.clone(),
        ai.clone(),
        Arc::clone(&dispatcher),
        &config,
    ));

    TestHarness {
        _dir: dir,
        db,
        events,
        ai,
        dispatcher,
        runner,
        rx,
    }
}

impl TestHarness {
    /// Run every queued job (and the jobs those jobs enqueue) to quiescence,
    /// sequentially and in order. Returns each job with its result.
    pub async fn drain(&mut self) -> Vec<(StageJob, PipelineResult<()>)> {
        let mut results = Vec::new();
        while let Ok(job) = self.rx.try_recv() {
            let result = self.runner.run(&job).await;
            results.push((job, result));
        }
        results
    }

    /// Drain, asserting every job succeeded
    pub async fn drain_ok(&mut self) -> Vec<StageJob> {
        let results = self.drain().await;
        let mut jobs = Vec::new();
        for (job, result) in results {
            if let Err(e) = &result {
                panic!("job {:?} failed: {}", job, e);
            }
            jobs.push(job);
        }
        jobs
    }
}

/// Convenience matcher for dependency errors
pub fn is_dependency_not_ready(result: &PipelineResult<()>) -> bool {
    matches!(result, Err(PipelineError::DependencyNotReady { .. }))
}
