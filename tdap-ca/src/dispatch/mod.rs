//! Job dispatch
//!
//! Stage jobs run as independent async tasks. Two dispatcher strategies share
//! one enqueue contract: a durable SQLite-backed queue, and an in-process
//! fire-and-forget executor used when durable queue infrastructure is
//! unavailable. Same signatures, same eventual effects, weaker durability
//! only. Delivery is at-least-once everywhere; consumers are idempotent.

mod durable;
mod in_process;
mod runner;

pub use durable::{DurableQueueDispatcher, DurableQueueWorker};
pub use in_process::{InProcessDispatcher, InProcessWorker};
pub use runner::JobRunner;

use crate::PipelineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One unit of pipeline work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum StageJob {
    Extract {
        document_id: Uuid,
    },
    Summarize {
        document_id: Uuid,
    },
    Evaluate {
        document_id: Uuid,
    },
    AnalyzeDisagreements {
        topic_id: Uuid,
        /// None means a whole-topic (all-pairs) analysis
        new_document_id: Option<Uuid>,
    },
    TrackConsensus {
        topic_id: Uuid,
    },
}

impl StageJob {
    /// Stable name used in the jobs table and logs
    pub fn job_type(&self) -> &'static str {
        match self {
            StageJob::Extract { .. } => "extract",
            StageJob::Summarize { .. } => "summarize",
            StageJob::Evaluate { .. } => "evaluate",
            StageJob::AnalyzeDisagreements { .. } => "analyze_disagreements",
            StageJob::TrackConsensus { .. } => "track_consensus",
        }
    }
}

/// Shared enqueue contract for both queue strategies
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn enqueue(&self, job: StageJob) -> PipelineResult<()>;
}

/// Retry policy shared by both workers
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Exponential backoff, capped at 60 seconds
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(16));
        let delay = self.base_delay.saturating_mul(factor as u32);
        delay.min(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_round_trip() {
        let job = StageJob::AnalyzeDisagreements {
            topic_id: Uuid::new_v4(),
            new_document_id: Some(Uuid::new_v4()),
        };
        let json = serde_json::to_string(&job).unwrap();
        let restored: StageJob = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, job);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert!(policy.delay_for(30) <= Duration::from_secs(60));
    }
}
