//! Evaluation stage
//!
//! One AI call scores the document per discipline-appropriate criteria. The
//! resulting overall score feeds the quality gate; completion enqueues the
//! topic's disagreement analysis scoped to this document.

use crate::config::AiServiceConfig;
use crate::db;
use crate::dispatch::{JobDispatcher, StageJob};
use crate::models::{Document, Evaluation, ProcessingStage, StageState, Summary};
use crate::services::ai_client::{
    decode_ai_json, estimate_prompt_cost_cents, AiOutcome, AiRequest, AiTask, AiTextService,
};
use crate::services::status_tracker::StatusTracker;
use crate::{PipelineError, PipelineResult};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tdap_common::events::{EventBus, PipelineEvent};
use tracing::warn;
use uuid::Uuid;

/// Schema the model must return
#[derive(Debug, Deserialize)]
struct EvaluationPayload {
    scores: BTreeMap<String, f64>,
    verdict: String,
}

pub struct EvaluationStage {
    db: SqlitePool,
    tracker: StatusTracker,
    ai: Arc<dyn AiTextService>,
    dispatcher: Arc<dyn JobDispatcher>,
    events: EventBus,
    ai_config: AiServiceConfig,
    input_cap: usize,
}

impl EvaluationStage {
    pub fn new(
        db: SqlitePool,
        tracker: StatusTracker,
        ai: Arc<dyn AiTextService>,
        dispatcher: Arc<dyn JobDispatcher>,
        events: EventBus,
        ai_config: AiServiceConfig,
        input_cap: usize,
    ) -> Self {
        Self {
            db,
            tracker,
            ai,
            dispatcher,
            events,
            ai_config,
            input_cap,
        }
    }

    /// Run evaluation for one document
    pub async fn run(&self, document_id: Uuid) -> PipelineResult<()> {
        let doc = db::documents::require(&self.db, document_id).await?;

        if doc.processing_status.get(ProcessingStage::Evaluate) == StageState::Completed {
            return Ok(());
        }

        let report = self
            .tracker
            .check_dependencies(document_id, ProcessingStage::Evaluate)
            .await?;
        if !report.ready {
            return Err(PipelineError::DependencyNotReady {
                document_id,
                stage: ProcessingStage::Evaluate,
                missing: report.missing,
            });
        }

        self.tracker
            .update_status(document_id, ProcessingStage::Evaluate, StageState::Processing)
            .await?;
        self.events.emit_lossy(PipelineEvent::StageStarted {
            document_id,
            stage: ProcessingStage::Evaluate.as_str().to_string(),
            timestamp: Utc::now(),
        });

        match self.process(&doc).await {
            Ok(()) => {
                self.tracker
                    .update_status(document_id, ProcessingStage::Evaluate, StageState::Completed)
                    .await?;
                self.events.emit_lossy(PipelineEvent::StageCompleted {
                    document_id,
                    stage: ProcessingStage::Evaluate.as_str().to_string(),
                    timestamp: Utc::now(),
                });

                // Evaluation closes the per-document stages; analysis fans out
                // across the topic scoped to this document.
                self.dispatcher
                    .enqueue(StageJob::AnalyzeDisagreements {
                        topic_id: doc.topic_id,
                        new_document_id: Some(document_id),
                    })
                    .await?;
                Ok(())
            }
            Err(e) => {
                if let Err(status_err) = self
                    .tracker
                    .update_status(document_id, ProcessingStage::Evaluate, StageState::Failed)
                    .await
                {
                    warn!(document_id = %document_id, error = %status_err, "Failed to record failed evaluate status");
                }
                self.events.emit_lossy(PipelineEvent::StageFailed {
                    document_id,
                    stage: ProcessingStage::Evaluate.as_str().to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn process(&self, doc: &Document) -> PipelineResult<()> {
        let summary = db::summaries::current(&self.db, doc.id)
            .await?
            .ok_or_else(|| PipelineError::Internal("summary vanished after gate check".into()))?;

        let text = doc.extracted_text.as_deref().unwrap_or_default();
        let input = cap_input(text, self.input_cap);

        let prompt = evaluation_prompt(doc, &summary, input);
        let estimated =
            estimate_prompt_cost_cents(&prompt, self.ai_config.cost_per_1k_tokens_cents);

        let outcome = self
            .ai
            .call(AiRequest {
                prompt,
                estimated_max_cost_cents: estimated,
                user_id: Some(doc.author_id.clone()),
                task: AiTask::Evaluate,
            })
            .await
            .map_err(|e| PipelineError::AiCall(e.to_string()))?;

        let completion = match outcome {
            AiOutcome::Completion(completion) => completion,
            AiOutcome::CostLimited { placeholder } => {
                warn!(document_id = %doc.id, placeholder = %placeholder, "Evaluation rejected by cost policy");
                return Err(PipelineError::CostLimitExceeded {
                    estimated_cents: estimated,
                    limit_cents: self.ai_config.cost_ceiling_cents,
                });
            }
        };

        let payload: EvaluationPayload = decode_ai_json(&completion.text)
            .map_err(|e| PipelineError::AiParse {
                message: e.message,
                raw: e.raw,
            })?;

        let mut evaluation = Evaluation::new(doc.id, doc.discipline.clone());
        evaluation.scores = payload
            .scores
            .into_iter()
            .map(|(criterion, score)| (criterion, score.clamp(0.0, 1.0)))
            .collect();
        evaluation.verdict = payload.verdict;
        evaluation.prompt_tokens = completion.usage.prompt_tokens;
        evaluation.completion_tokens = completion.usage.completion_tokens;
        evaluation.cost_cents = completion.usage.cost_cents;
        evaluation.recompute_overall();

        db::evaluations::insert_as_current(&self.db, &evaluation).await?;
        Ok(())
    }
}

fn cap_input(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn evaluation_prompt(doc: &Document, summary: &Summary, text: &str) -> String {
    format!(
        "Evaluate the quality of the following {} document.\n\
         Respond with JSON only, matching exactly:\n\
         {{\"scores\": {{\"rigor\": number, \"evidence\": number, \"clarity\": number, \
         \"relevance\": number}}, \"verdict\": string}}\n\
         Scores are in [0,1]. Apply the rigor expectations of the {} field.\n\n\
         Summary overview: {}\n\
         Claims: {}\n\
         Document text:\n{}",
        doc.discipline,
        doc.discipline,
        summary.overview,
        summary.claims.join("; "),
        text
    )
}
