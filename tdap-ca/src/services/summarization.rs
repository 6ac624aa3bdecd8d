//! Summarization stage
//!
//! One AI call over a length-capped input produces the structured summary.
//! Input truncation is logged. The summary row and the document's current
//! pointer land in one transaction; status flips to completed only after.

use crate::config::AiServiceConfig;
use crate::db;
use crate::dispatch::{JobDispatcher, StageJob};
use crate::models::{Document, ProcessingStage, StageState, Summary};
use crate::services::ai_client::{
    decode_ai_json, estimate_prompt_cost_cents, AiOutcome, AiRequest, AiTask, AiTextService,
};
use crate::services::status_tracker::StatusTracker;
use crate::{PipelineError, PipelineResult};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tdap_common::events::{EventBus, PipelineEvent};
use tracing::{info, warn};
use uuid::Uuid;

/// Schema the model must return
#[derive(Debug, Deserialize)]
struct SummaryPayload {
    title: String,
    overview: String,
    #[serde(default)]
    structure: Vec<String>,
    #[serde(default)]
    claims: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

pub struct SummarizationStage {
    db: SqlitePool,
    tracker: StatusTracker,
    ai: Arc<dyn AiTextService>,
    dispatcher: Arc<dyn JobDispatcher>,
    events: EventBus,
    ai_config: AiServiceConfig,
    input_cap: usize,
}

impl SummarizationStage {
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

    /// Run summarization for one document
    pub async fn run(&self, document_id: Uuid) -> PipelineResult<()> {
        let doc = db::documents::require(&self.db, document_id).await?;

        if doc.processing_status.get(ProcessingStage::Summarize) == StageState::Completed {
            return Ok(());
        }

        // Re-check the dependency gate; the dispatcher reschedules on misses
        let report = self
            .tracker
            .check_dependencies(document_id, ProcessingStage::Summarize)
            .await?;
        if !report.ready {
            return Err(PipelineError::DependencyNotReady {
                document_id,
                stage: ProcessingStage::Summarize,
                missing: report.missing,
            });
        }

        self.tracker
            .update_status(document_id, ProcessingStage::Summarize, StageState::Processing)
            .await?;
        self.events.emit_lossy(PipelineEvent::StageStarted {
            document_id,
            stage: ProcessingStage::Summarize.as_str().to_string(),
            timestamp: Utc::now(),
        });

        match self.process(&doc).await {
            Ok(()) => {
                self.tracker
                    .update_status(document_id, ProcessingStage::Summarize, StageState::Completed)
                    .await?;
                self.events.emit_lossy(PipelineEvent::StageCompleted {
                    document_id,
                    stage: ProcessingStage::Summarize.as_str().to_string(),
                    timestamp: Utc::now(),
                });

                self.dispatcher
                    .enqueue(StageJob::Evaluate { document_id })
                    .await?;
                Ok(())
            }
            Err(e) => {
                if let Err(status_err) = self
                    .tracker
                    .update_status(document_id, ProcessingStage::Summarize, StageState::Failed)
                    .await
                {
                    warn!(document_id = %document_id, error = %status_err, "Failed to record failed summarize status");
                }
                self.events.emit_lossy(PipelineEvent::StageFailed {
                    document_id,
                    stage: ProcessingStage::Summarize.as_str().to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn process(&self, doc: &Document) -> PipelineResult<()> {
        // Identical content means identical summary: reuse the original's and
        // skip the AI call entirely.
        if let Some(original_id) = doc.duplicate_of {
            if let Some(original) = db::summaries::current(&self.db, original_id).await? {
                info!(
                    document_id = %doc.id,
                    original_document_id = %original_id,
                    "Reusing summary from duplicate original"
                );
                let copy = original.copied_for(doc.id);
                db::summaries::insert_as_current(&self.db, &copy).await?;
                return Ok(());
            }
        }

        let text = doc
            .extracted_text
            .as_deref()
            .ok_or_else(|| PipelineError::Internal("extracted text vanished after gate check".into()))?;

        let input = cap_input(text, self.input_cap);
        if input.len() < text.len() {
            warn!(
                document_id = %doc.id,
                original_chars = text.chars().count(),
                cap = self.input_cap,
                "Summarization input truncated to length cap"
            );
        }

        let prompt = summary_prompt(&doc.title, input);
        let estimated =
            estimate_prompt_cost_cents(&prompt, self.ai_config.cost_per_1k_tokens_cents);

        let outcome = self
            .ai
            .call(AiRequest {
                prompt,
                estimated_max_cost_cents: estimated,
                user_id: Some(doc.author_id.clone()),
                task: AiTask::Summarize,
            })
            .await
            .map_err(|e| PipelineError::AiCall(e.to_string()))?;

        let completion = match outcome {
            AiOutcome::Completion(completion) => completion,
            AiOutcome::CostLimited { placeholder } => {
                // The placeholder is a policy message, never a summary
                warn!(document_id = %doc.id, placeholder = %placeholder, "Summarization rejected by cost policy");
                return Err(PipelineError::CostLimitExceeded {
                    estimated_cents: estimated,
                    limit_cents: self.ai_config.cost_ceiling_cents,
                });
            }
        };

        let payload: SummaryPayload = decode_ai_json(&completion.text)
            .map_err(|e| PipelineError::AiParse {
                message: e.message,
                raw: e.raw,
            })?;

        let summary = Summary {
            id: Uuid::new_v4(),
            document_id: doc.id,
            title: payload.title,
            overview: payload.overview,
            structure: payload.structure,
            claims: payload.claims,
            keywords: payload.keywords,
            model: Some(self.ai_config.model.clone()),
            prompt_tokens: completion.usage.prompt_tokens,
            completion_tokens: completion.usage.completion_tokens,
            cost_cents: completion.usage.cost_cents,
            created_at: Utc::now(),
        };

        db::summaries::insert_as_current(&self.db, &summary).await?;
        Ok(())
    }
}

/// Truncate at a character boundary to at most `max_chars` characters
fn cap_input(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn summary_prompt(title: &str, text: &str) -> String {
    format!(
        "Summarize the following document for structured discussion analysis.\n\
         Respond with JSON only, matching exactly:\n\
         {{\"title\": string, \"overview\": string, \"structure\": [string], \
         \"claims\": [string], \"keywords\": [string]}}\n\
         \"claims\" must list the discrete factual or argumentative claims the \
         document asserts, one claim per entry, in the document's own terms.\n\n\
         Document title: {}\n\
         Document text:\n{}",
        title, text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_input_respects_char_boundaries() {
        let text = "héllo wörld";
        let capped = cap_input(text, 4);
        assert_eq!(capped, "héll");
        assert_eq!(cap_input(text, 100), text);
    }

    #[test]
    fn payload_decodes_with_defaults() {
        let payload: SummaryPayload =
            decode_ai_json(r#"{"title": "T", "overview": "O"}"#).unwrap();
        assert!(payload.claims.is_empty());
        assert!(payload.keywords.is_empty());
    }
}
