//! Pairwise disagreement analyzer
//!
//! Compares quality-gated documents of a topic pair by pair, one AI call per
//! pair, in bounded batches. Concurrency contract: at most one in-flight
//! analysis per (topic, scope) key; concurrent same-key callers join the
//! in-flight result instead of duplicating AI cost. Successful results are
//! memoized for the debounce window.
//!
//! The guard's lock/cache storage is process-local. A multi-process
//! deployment gets at-most-one-in-flight per process only.

use crate::config::AiServiceConfig;
use crate::db;
use crate::dispatch::{JobDispatcher, StageJob};
use crate::models::{Disagreement, DisagreementStatus, Severity};
use crate::services::ai_client::{
    decode_ai_json, estimate_prompt_cost_cents, AiOutcome, AiRequest, AiTask, AiTextService,
};
use crate::services::quality_gate::{QualifiedDocument, QualityGate};
use crate::{PipelineError, PipelineResult};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tdap_common::events::{EventBus, PipelineEvent};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scope of one analysis run: a single new document against the topic, or
/// the whole topic. These are different jobs and cache separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisScope {
    Topic,
    NewDocument(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnalysisKey {
    pub topic_id: Uuid,
    pub scope: AnalysisScope,
}

impl std::fmt::Display for AnalysisKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scope {
            AnalysisScope::Topic => write!(f, "{}/all", self.topic_id),
            AnalysisScope::NewDocument(id) => write!(f, "{}/{}", self.topic_id, id),
        }
    }
}

/// Result of one analysis run
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    /// Disagreements newly persisted by this run
    pub disagreements: Vec<Disagreement>,
    pub pairs_examined: usize,
}

type SharedOutcome = Result<Arc<AnalysisOutcome>, String>;

enum GuardEntry {
    Running(tokio::sync::watch::Receiver<Option<SharedOutcome>>),
    Cached {
        stored_at: Instant,
        result: Arc<AnalysisOutcome>,
    },
}

enum Claim {
    /// Fresh cached result; no work to do
    Cached(Arc<AnalysisOutcome>),
    /// Another task is running this key; await its result
    Join(tokio::sync::watch::Receiver<Option<SharedOutcome>>),
    /// This caller leads the run and must call `LeadGuard::complete`
    Lead(LeadGuard),
}

/// Mutual exclusion plus debounce cache for analysis runs.
///
/// An explicit service object with its own storage; the map is never
/// module-global state. The map entry (not a held mutex) is what spans the
/// AI calls, so the short-lived lock below never crosses a suspension point.
pub struct AnalysisGuard {
    entries: Arc<Mutex<HashMap<AnalysisKey, GuardEntry>>>,
    debounce: Duration,
}

impl AnalysisGuard {
    pub fn new(debounce: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            debounce,
        }
    }

    fn claim(&self, key: AnalysisKey) -> Claim {
        let mut entries = self.entries.lock().expect("analysis guard poisoned");

        match entries.get(&key) {
            Some(GuardEntry::Cached { stored_at, result })
                if stored_at.elapsed() < self.debounce =>
            {
                return Claim::Cached(result.clone());
            }
            Some(GuardEntry::Running(rx)) => {
                return Claim::Join(rx.clone());
            }
            _ => {}
        }

        let (tx, rx) = tokio::sync::watch::channel(None);
        entries.insert(key, GuardEntry::Running(rx));
        Claim::Lead(LeadGuard {
            entries: Arc::clone(&self.entries),
            key,
            tx: Some(tx),
        })
    }
}

/// Held by the task actually running an analysis. Completion publishes the
/// result and updates the cache; dropping without completing (panic,
/// cancellation) releases the key so future analysis is never deadlocked.
struct LeadGuard {
    entries: Arc<Mutex<HashMap<AnalysisKey, GuardEntry>>>,
    key: AnalysisKey,
    tx: Option<tokio::sync::watch::Sender<Option<SharedOutcome>>>,
}

impl LeadGuard {
    fn complete(mut self, result: &SharedOutcome) {
        let tx = self.tx.take().expect("lead guard completed twice");
        {
            let mut entries = self.entries.lock().expect("analysis guard poisoned");
            match result {
                Ok(outcome) => {
                    entries.insert(
                        self.key,
                        GuardEntry::Cached {
                            stored_at: Instant::now(),
                            result: Arc::clone(outcome),
                        },
                    );
                }
                // Failures are not memoized; the next call retries
                Err(_) => {
                    entries.remove(&self.key);
                }
            }
        }
        let _ = tx.send(Some(result.clone()));
    }
}

impl Drop for LeadGuard {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            if let Ok(mut entries) = self.entries.lock() {
                entries.remove(&self.key);
            }
            // The sender drop closes the channel; joiners observe the abort
        }
    }
}

/// Zero-or-one disagreement the model may report for a pair
#[derive(Debug, Deserialize)]
struct PairPayload {
    disagreement: Option<PairBody>,
}

#[derive(Debug, Deserialize)]
struct PairBody {
    title: String,
    #[serde(default)]
    description: String,
    claim1: String,
    claim2: String,
    severity: String,
    confidence: f64,
}

pub struct DisagreementAnalyzer {
    db: SqlitePool,
    ai: Arc<dyn AiTextService>,
    gate: QualityGate,
    guard: AnalysisGuard,
    dispatcher: Arc<dyn JobDispatcher>,
    events: EventBus,
    ai_config: AiServiceConfig,
    batch_size: usize,
}

impl DisagreementAnalyzer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        ai: Arc<dyn AiTextService>,
        gate: QualityGate,
        dispatcher: Arc<dyn JobDispatcher>,
        events: EventBus,
        ai_config: AiServiceConfig,
        debounce: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            ai,
            gate,
            guard: AnalysisGuard::new(debounce),
            dispatcher,
            events,
            ai_config,
            batch_size,
        }
    }

    /// Analyze a topic's disagreements, scoped to one new document when given.
    ///
    /// Joins an in-flight same-key run instead of starting a duplicate;
    /// repeat calls within the debounce window return the cached result with
    /// no AI calls.
    pub async fn analyze_incremental(
        &self,
        topic_id: Uuid,
        new_document_id: Option<Uuid>,
    ) -> PipelineResult<Arc<AnalysisOutcome>> {
        let key = AnalysisKey {
            topic_id,
            scope: match new_document_id {
                Some(id) => AnalysisScope::NewDocument(id),
                None => AnalysisScope::Topic,
            },
        };

        match self.guard.claim(key) {
            Claim::Cached(result) => {
                debug!(key = %key, "Returning debounce-cached analysis result");
                Ok(result)
            }
            Claim::Join(rx) => {
                debug!(key = %key, "Joining in-flight analysis");
                join_in_flight(rx).await
            }
            Claim::Lead(lead) => {
                let result = self.run_analysis(topic_id, new_document_id).await;
                let shared: SharedOutcome = match &result {
                    Ok(outcome) => Ok(Arc::clone(outcome)),
                    Err(e) => Err(e.to_string()),
                };
                lead.complete(&shared);
                result
            }
        }
    }

    async fn run_analysis(
        &self,
        topic_id: Uuid,
        new_document_id: Option<Uuid>,
    ) -> PipelineResult<Arc<AnalysisOutcome>> {
        let qualified = self.gate.passing_documents(topic_id).await?;

        // Pairs need claims on both sides; documents without a summary or
        // with zero claims cannot disagree in a detectable way.
        let candidates: Vec<&QualifiedDocument> = qualified
            .iter()
            .filter(|q| q.summary.as_ref().is_some_and(|s| !s.claims.is_empty()))
            .collect();

        let pairs: Vec<(usize, usize)> = match new_document_id {
            Some(new_id) => {
                let Some(new_index) = candidates.iter().position(|q| q.document.id == new_id)
                else {
                    // The new document did not clear the gate; nothing to compare
                    debug!(topic_id = %topic_id, document_id = %new_id, "New document not qualified, skipping analysis");
                    return Ok(Arc::new(AnalysisOutcome::default()));
                };
                (0..candidates.len())
                    .filter(|&i| i != new_index)
                    .map(|i| (new_index, i))
                    .collect()
            }
            None => {
                let mut all = Vec::new();
                for i in 0..candidates.len() {
                    for j in (i + 1)..candidates.len() {
                        all.push((i, j));
                    }
                }
                all
            }
        };

        info!(
            topic_id = %topic_id,
            qualified = candidates.len(),
            pairs = pairs.len(),
            incremental = new_document_id.is_some(),
            "Starting disagreement analysis"
        );

        let mut known_hashes = db::disagreements::hashes_for_topic(&self.db, topic_id).await?;
        let mut outcome = AnalysisOutcome::default();

        // Batches bound the number of concurrent AI calls
        for chunk in pairs.chunks(self.batch_size.max(1)) {
            let futures = chunk
                .iter()
                .map(|&(i, j)| self.analyze_pair(candidates[i], candidates[j]));
            let results = futures::future::join_all(futures).await;

            for (&(i, j), result) in chunk.iter().zip(results) {
                outcome.pairs_examined += 1;
                let doc1 = &candidates[i].document;
                let doc2 = &candidates[j].document;

                let finding = match result {
                    Ok(Some(finding)) => finding,
                    Ok(None) => continue,
                    // One pair's failure never aborts the batch
                    Err(e) => {
                        warn!(
                            doc1_id = %doc1.id,
                            doc2_id = %doc2.id,
                            error = %e,
                            "Pair analysis failed, skipping pair"
                        );
                        continue;
                    }
                };

                let dedup_hash = Disagreement::dedup_hash(doc1.id, doc2.id, &finding.title);
                if known_hashes.contains(&dedup_hash) {
                    debug!(doc1_id = %doc1.id, doc2_id = %doc2.id, title = %finding.title, "Duplicate disagreement, skipping persist");
                    continue;
                }

                // Enrich with the union of both documents' branch paths
                let path1 = db::documents::branch_path(&self.db, doc1).await?;
                let path2 = db::documents::branch_path(&self.db, doc2).await?;
                let mut branch_paths = vec![path1.path];
                if path2.path != branch_paths[0] {
                    branch_paths.push(path2.path);
                }

                let now = Utc::now();
                let disagreement = Disagreement {
                    id: Uuid::new_v4(),
                    topic_id,
                    doc1_id: doc1.id,
                    doc2_id: doc2.id,
                    title: finding.title,
                    description: finding.description,
                    claim1: finding.claim1,
                    claim2: finding.claim2,
                    severity: finding.severity,
                    confidence: finding.confidence,
                    branch_paths,
                    dedup_hash: dedup_hash.clone(),
                    status: DisagreementStatus::Active,
                    created_at: now,
                    updated_at: now,
                };

                if db::disagreements::insert_if_new(&self.db, &disagreement).await? {
                    known_hashes.insert(dedup_hash);
                    self.events.emit_lossy(PipelineEvent::DisagreementRecorded {
                        topic_id,
                        doc1_id: doc1.id,
                        doc2_id: doc2.id,
                        severity: disagreement.severity.as_str().to_string(),
                    });
                    outcome.disagreements.push(disagreement);
                }
            }
        }

        info!(
            topic_id = %topic_id,
            pairs_examined = outcome.pairs_examined,
            disagreements_found = outcome.disagreements.len(),
            "Disagreement analysis complete"
        );
        self.events.emit_lossy(PipelineEvent::AnalysisCompleted {
            topic_id,
            pairs_examined: outcome.pairs_examined,
            disagreements_found: outcome.disagreements.len(),
            timestamp: Utc::now(),
        });

        // Consensus tracking follows every analysis run
        self.dispatcher
            .enqueue(StageJob::TrackConsensus { topic_id })
            .await?;

        Ok(Arc::new(outcome))
    }

    /// One AI call comparing two documents' claims
    async fn analyze_pair(
        &self,
        a: &QualifiedDocument,
        b: &QualifiedDocument,
    ) -> PipelineResult<Option<PairFinding>> {
        // Candidates are filtered for summaries with claims upstream
        let (Some(summary_a), Some(summary_b)) = (a.summary.as_ref(), b.summary.as_ref()) else {
            return Ok(None);
        };

        let prompt = pair_prompt(
            &a.document.title,
            &summary_a.claims,
            &b.document.title,
            &summary_b.claims,
        );
        let estimated =
            estimate_prompt_cost_cents(&prompt, self.ai_config.cost_per_1k_tokens_cents);

        let outcome = self
            .ai
            .call(AiRequest {
                prompt,
                estimated_max_cost_cents: estimated,
                user_id: None,
                task: AiTask::DetectDisagreement,
            })
            .await
            .map_err(|e| PipelineError::AiCall(e.to_string()))?;

        let completion = match outcome {
            AiOutcome::Completion(completion) => completion,
            AiOutcome::CostLimited { .. } => {
                return Err(PipelineError::CostLimitExceeded {
                    estimated_cents: estimated,
                    limit_cents: self.ai_config.cost_ceiling_cents,
                });
            }
        };

        let payload: PairPayload = decode_ai_json(&completion.text)
            .map_err(|e| PipelineError::AiParse {
                message: e.message,
                raw: e.raw,
            })?;

        let Some(body) = payload.disagreement else {
            return Ok(None);
        };

        let severity = Severity::parse(&body.severity.to_lowercase()).ok_or_else(|| {
            PipelineError::AiParse {
                message: format!("unknown severity: {}", body.severity),
                raw: body.severity.clone(),
            }
        })?;

        Ok(Some(PairFinding {
            title: body.title,
            description: body.description,
            claim1: body.claim1,
            claim2: body.claim2,
            severity,
            confidence: body.confidence.clamp(0.0, 1.0),
        }))
    }

    /// Re-check every disagreement's documents against the quality gate,
    /// soft-invalidating records whose constituents no longer pass.
    ///
    /// Returns the number of records invalidated.
    pub async fn validate_disagreements(&self, topic_id: Uuid) -> PipelineResult<usize> {
        let passing: std::collections::HashSet<Uuid> = self
            .gate
            .passing_documents(topic_id)
            .await?
            .into_iter()
            .map(|q| q.document.id)
            .collect();

        let mut invalidated = 0usize;
        for d in db::disagreements::list_by_topic(&self.db, topic_id).await? {
            if d.status != DisagreementStatus::Active {
                continue;
            }
            if !passing.contains(&d.doc1_id) || !passing.contains(&d.doc2_id) {
                db::disagreements::set_status(&self.db, d.id, DisagreementStatus::Invalid).await?;
                invalidated += 1;
                info!(
                    disagreement_id = %d.id,
                    topic_id = %topic_id,
                    "Disagreement invalidated: constituent document no longer passes the quality gate"
                );
            }
        }

        Ok(invalidated)
    }
}

#[derive(Debug)]
struct PairFinding {
    title: String,
    description: String,
    claim1: String,
    claim2: String,
    severity: Severity,
    confidence: f64,
}

async fn join_in_flight(
    mut rx: tokio::sync::watch::Receiver<Option<SharedOutcome>>,
) -> PipelineResult<Arc<AnalysisOutcome>> {
    loop {
        if let Some(shared) = rx.borrow().clone() {
            return match shared {
                Ok(outcome) => Ok(outcome),
                Err(message) => Err(PipelineError::AiCall(message)),
            };
        }
        if rx.changed().await.is_err() {
            // Channel closed: check for a value sent just before the close
            if let Some(shared) = rx.borrow().clone() {
                return match shared {
                    Ok(outcome) => Ok(outcome),
                    Err(message) => Err(PipelineError::AiCall(message)),
                };
            }
            return Err(PipelineError::AiCall(
                "in-flight analysis aborted before completing".to_string(),
            ));
        }
    }
}

fn pair_prompt(title1: &str, claims1: &[String], title2: &str, claims2: &[String]) -> String {
    format!(
        "Two documents in the same discussion topic are compared below.\n\
         Identify the single most significant direct disagreement between \
         their claims, if any.\n\
         Respond with JSON only, matching exactly:\n\
         {{\"disagreement\": null}} when the claims do not conflict, or\n\
         {{\"disagreement\": {{\"title\": string, \"description\": string, \
         \"claim1\": string, \"claim2\": string, \
         \"severity\": \"high\"|\"medium\"|\"low\", \"confidence\": number}}}}\n\
         \"claim1\" quotes document A, \"claim2\" quotes document B, and \
         confidence is in [0,1].\n\n\
         Document A ({}):\n- {}\n\n\
         Document B ({}):\n- {}",
        title1,
        claims1.join("\n- "),
        title2,
        claims2.join("\n- ")
    )
}
