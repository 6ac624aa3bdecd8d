//! Stage status tracking and dependency gating
//!
//! Stage workers are the only writers of `processing_status`. Dependency
//! checks never error for unmet dependencies; they report what is missing so
//! the dispatcher can reschedule once the blocking stage completes. There is
//! no polling here.

use crate::db;
use crate::models::{ProcessingStage, StageState};
use crate::{PipelineError, PipelineResult};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// Result of a dependency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyReport {
    pub ready: bool,
    /// Human-readable names of unmet dependencies
    pub missing: Vec<String>,
}

impl DependencyReport {
    fn ready() -> Self {
        Self {
            ready: true,
            missing: Vec::new(),
        }
    }

    fn blocked(missing: Vec<String>) -> Self {
        Self {
            ready: false,
            missing,
        }
    }
}

/// Per-document stage state tracker
#[derive(Clone)]
pub struct StatusTracker {
    db: SqlitePool,
}

impl StatusTracker {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Idempotent state set.
    ///
    /// Setting the state a stage already has is a no-op (no write). Illegal
    /// transitions (any move off `completed`, or `failed` back to `pending`)
    /// are InvalidInput. A missing document is NotFound.
    pub async fn update_status(
        &self,
        document_id: Uuid,
        stage: ProcessingStage,
        state: StageState,
    ) -> PipelineResult<()> {
        let doc = db::documents::require(&self.db, document_id).await?;

        let current = doc.processing_status.get(stage);
        if current == state {
            debug!(document_id = %document_id, stage = %stage, state = %state, "Status unchanged, skipping write");
            return Ok(());
        }

        if !current.can_transition_to(state) {
            return Err(PipelineError::InvalidInput(format!(
                "stage {} cannot move {} -> {} on document {}",
                stage, current, state, document_id
            )));
        }

        let mut status = doc.processing_status.clone();
        status.set(stage, state);
        db::documents::update_status(&self.db, document_id, &status).await?;

        debug!(
            document_id = %document_id,
            stage = %stage,
            old_state = %current,
            new_state = %state,
            "Stage status updated"
        );

        Ok(())
    }

    /// Check whether a stage's upstream dependencies are satisfied.
    ///
    /// Never errors for unmet dependencies; the report lists them. Errors
    /// only when the document itself does not exist.
    pub async fn check_dependencies(
        &self,
        document_id: Uuid,
        stage: ProcessingStage,
    ) -> PipelineResult<DependencyReport> {
        let doc = db::documents::require(&self.db, document_id).await?;

        let mut missing = Vec::new();
        match stage {
            ProcessingStage::Extract => {}
            ProcessingStage::Summarize => {
                if doc.processing_status.get(ProcessingStage::Extract) != StageState::Completed {
                    missing.push("extract not completed".to_string());
                }
                if doc.extracted_text.as_deref().map_or(true, |t| t.is_empty()) {
                    missing.push("extracted text absent".to_string());
                }
            }
            ProcessingStage::Evaluate => {
                if doc.processing_status.get(ProcessingStage::Summarize) != StageState::Completed {
                    missing.push("summarize not completed".to_string());
                }
                if doc.current_summary_id.is_none() {
                    missing.push("summary absent".to_string());
                }
            }
        }

        if missing.is_empty() {
            Ok(DependencyReport::ready())
        } else {
            Ok(DependencyReport::blocked(missing))
        }
    }
}
