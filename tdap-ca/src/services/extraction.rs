//! Extraction stage
//!
//! Pure computation: uploaded bytes become normalized text, the content is
//! hashed for deduplication, and summarization is enqueued. No AI call.

use crate::db;
use crate::dispatch::{JobDispatcher, StageJob};
use crate::models::{Document, ProcessingStage, StageState};
use crate::services::status_tracker::StatusTracker;
use crate::{PipelineError, PipelineResult};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use tdap_common::events::{EventBus, PipelineEvent};
use tracing::{info, warn};
use uuid::Uuid;

pub struct ExtractionStage {
    db: SqlitePool,
    tracker: StatusTracker,
    dispatcher: Arc<dyn JobDispatcher>,
    events: EventBus,
}

impl ExtractionStage {
    pub fn new(
        db: SqlitePool,
        tracker: StatusTracker,
        dispatcher: Arc<dyn JobDispatcher>,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            tracker,
            dispatcher,
            events,
        }
    }

    /// Run extraction for one document
    pub async fn run(&self, document_id: Uuid) -> PipelineResult<()> {
        let doc = db::documents::require(&self.db, document_id).await?;

        // At-least-once delivery: a redelivered job for a finished stage is a no-op
        if doc.processing_status.get(ProcessingStage::Extract) == StageState::Completed {
            return Ok(());
        }

        self.tracker
            .update_status(document_id, ProcessingStage::Extract, StageState::Processing)
            .await?;
        self.events.emit_lossy(PipelineEvent::StageStarted {
            document_id,
            stage: ProcessingStage::Extract.as_str().to_string(),
            timestamp: Utc::now(),
        });

        match self.process(&doc).await {
            Ok(()) => {
                self.tracker
                    .update_status(document_id, ProcessingStage::Extract, StageState::Completed)
                    .await?;
                self.events.emit_lossy(PipelineEvent::StageCompleted {
                    document_id,
                    stage: ProcessingStage::Extract.as_str().to_string(),
                    timestamp: Utc::now(),
                });

                self.dispatcher
                    .enqueue(StageJob::Summarize { document_id })
                    .await?;
                Ok(())
            }
            Err(e) => {
                // Mark failed, then re-raise so the dispatcher's retry policy applies
                if let Err(status_err) = self
                    .tracker
                    .update_status(document_id, ProcessingStage::Extract, StageState::Failed)
                    .await
                {
                    warn!(document_id = %document_id, error = %status_err, "Failed to record failed extract status");
                }
                self.events.emit_lossy(PipelineEvent::StageFailed {
                    document_id,
                    stage: ProcessingStage::Extract.as_str().to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn process(&self, doc: &Document) -> PipelineResult<()> {
        let text = decode_text(doc)?;
        let content_hash = format!("{:x}", Sha256::digest(&doc.content));

        let duplicate_of =
            db::documents::find_duplicate(&self.db, doc.topic_id, &content_hash, doc.id).await?;

        if let Some(original_id) = duplicate_of {
            info!(
                document_id = %doc.id,
                original_document_id = %original_id,
                "Content hash matches an existing document in the topic"
            );
            self.events.emit_lossy(PipelineEvent::DuplicateDetected {
                document_id: doc.id,
                original_document_id: original_id,
                content_hash: content_hash.clone(),
            });
        }

        db::documents::update_extraction(&self.db, doc.id, &text, &content_hash, duplicate_of)
            .await?;

        Ok(())
    }
}

/// Decode uploaded bytes into normalized text.
///
/// Strict UTF-8 with a logged lossy fallback; line endings normalized and
/// runs of blank lines collapsed. Empty output fails the stage.
fn decode_text(doc: &Document) -> PipelineResult<String> {
    let raw = match std::str::from_utf8(&doc.content) {
        Ok(text) => text.to_string(),
        Err(_) => {
            warn!(document_id = %doc.id, "Content is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(&doc.content).into_owned()
        }
    };

    let normalized = normalize_text(&raw);
    if normalized.is_empty() {
        return Err(PipelineError::InvalidInput(format!(
            "document {} has no extractable text",
            doc.id
        )));
    }

    Ok(normalized)
}

fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            // Keep at most one blank line between paragraphs
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_line_endings_and_blank_runs() {
        let text = normalize_text("one\r\n\r\n\r\n\r\ntwo\rthree  \n");
        assert_eq!(text, "one\n\ntwo\nthree");
    }

    #[test]
    fn empty_content_is_rejected() {
        let doc = Document::new(
            Uuid::new_v4(),
            None,
            "user-1",
            "empty",
            "general",
            b"   \n\n  ".to_vec(),
        );
        assert!(matches!(
            decode_text(&doc),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn invalid_utf8_decodes_lossily() {
        let doc = Document::new(
            Uuid::new_v4(),
            None,
            "user-1",
            "binary-ish",
            "general",
            vec![b'o', b'k', 0xFF, b'!' ],
        );
        let text = decode_text(&doc).unwrap();
        assert!(text.starts_with("ok"));
    }
}
