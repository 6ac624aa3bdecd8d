//! Error types for the analysis pipeline
//!
//! One taxonomy for everything that can go wrong between a job being claimed
//! and its effects landing in the database. The dispatcher consults
//! `is_retryable` to decide between rescheduling and terminal failure.

use crate::models::ProcessingStage;
use thiserror::Error;
use uuid::Uuid;

/// Result type for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Pipeline error taxonomy
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Upstream stage has not completed yet; retryable once it does
    #[error("dependencies not ready for {stage} on document {document_id}: missing {missing:?}")]
    DependencyNotReady {
        document_id: Uuid,
        stage: ProcessingStage,
        missing: Vec<String>,
    },

    /// The AI service call failed (network, HTTP error, timeout)
    #[error("AI call failed: {0}")]
    AiCall(String),

    /// The AI responded but the payload did not decode against the schema
    #[error("AI response parse failed: {message}")]
    AiParse {
        message: String,
        /// Raw response text, kept for diagnosis; never persisted as output
        raw: String,
    },

    /// Cost policy rejected the call before it was made
    #[error("AI cost limit exceeded: estimated {estimated_cents:.1} cents over ceiling {limit_cents:.1} cents")]
    CostLimitExceeded {
        estimated_cents: f64,
        limit_cents: f64,
    },

    /// Referenced document/summary/record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller violated an invariant (e.g. regressing a completed stage)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Database operation error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Shared tdap-common error
    #[error(transparent)]
    Common(#[from] tdap_common::Error),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether the dispatcher should reschedule the job that hit this error.
    ///
    /// DependencyNotReady resolves when the upstream stage lands; AI call and
    /// parse failures are transient (the model is stochastic); database
    /// errors cover lock contention. Cost-limit rejections and invariant
    /// violations never resolve by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::DependencyNotReady { .. }
                | PipelineError::AiCall(_)
                | PipelineError::AiParse { .. }
                | PipelineError::Database(_)
        )
    }
}
