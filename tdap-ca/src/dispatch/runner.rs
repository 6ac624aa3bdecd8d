//! Job execution
//!
//! Maps a claimed `StageJob` onto the service that performs it. Both queue
//! strategies execute through this one runner, so their eventual effects are
//! identical.

use crate::config::ServiceConfig;
use crate::dispatch::{JobDispatcher, StageJob};
use crate::services::{
    ConsensusTracker, DisagreementAnalyzer, EvaluationStage, ExtractionStage, QualityGate,
    StatusTracker, SummarizationStage, TopicConsensusAggregator,
};
use crate::services::ai_client::AiTextService;
use crate::PipelineResult;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tdap_common::events::EventBus;
use tracing::debug;

pub struct JobRunner {
    extraction: ExtractionStage,
    summarization: SummarizationStage,
    evaluation: EvaluationStage,
    analyzer: DisagreementAnalyzer,
    aggregator: TopicConsensusAggregator,
}

impl JobRunner {
    pub fn new(
        db: SqlitePool,
        events: EventBus,
        ai: Arc<dyn AiTextService>,
        dispatcher: Arc<dyn JobDispatcher>,
        config: &ServiceConfig,
    ) -> Self {
        let tracker = StatusTracker::new(db.clone());
        let gate = QualityGate::new(db.clone(), config.quality.clone());
        let consensus = ConsensusTracker::new(
            db.clone(),
            gate.clone(),
            events.clone(),
            config.pipeline.snapshot_retention,
        );

        Self {
            extraction: ExtractionStage::new(
                db.clone(),
                tracker.clone(),
                Arc::clone(&dispatcher),
                events.clone(),
            ),
            summarization: SummarizationStage::new(
                db.clone(),
                tracker.clone(),
                Arc::clone(&ai),
                Arc::clone(&dispatcher),
                events.clone(),
                config.ai.clone(),
                config.pipeline.summary_input_cap,
            ),
            evaluation: EvaluationStage::new(
                db.clone(),
                tracker,
                Arc::clone(&ai),
                Arc::clone(&dispatcher),
                events.clone(),
                config.ai.clone(),
                config.pipeline.summary_input_cap,
            ),
            analyzer: DisagreementAnalyzer::new(
                db.clone(),
                ai,
                gate.clone(),
                dispatcher,
                events.clone(),
                config.ai.clone(),
                Duration::from_secs(config.pipeline.debounce_secs),
                config.pipeline.pair_batch_size,
            ),
            aggregator: TopicConsensusAggregator::new(db, gate, consensus, events),
        }
    }

    /// Execute one job to completion or error
    pub async fn run(&self, job: &StageJob) -> PipelineResult<()> {
        debug!(job_type = job.job_type(), "Executing job");

        match job {
            StageJob::Extract { document_id } => self.extraction.run(*document_id).await,
            StageJob::Summarize { document_id } => self.summarization.run(*document_id).await,
            StageJob::Evaluate { document_id } => self.evaluation.run(*document_id).await,
            StageJob::AnalyzeDisagreements {
                topic_id,
                new_document_id,
            } => {
                self.analyzer
                    .analyze_incremental(*topic_id, *new_document_id)
                    .await?;
                // Existing records may reference documents whose evaluation
                // has since dropped below threshold
                self.analyzer.validate_disagreements(*topic_id).await?;
                Ok(())
            }
            StageJob::TrackConsensus { topic_id } => {
                self.aggregator.refresh_user_consensus(*topic_id).await?;
                self.aggregator
                    .update_topic_consensus_snapshot(*topic_id)
                    .await?;
                Ok(())
            }
        }
    }
}
