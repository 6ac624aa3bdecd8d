//! Document quality gate
//!
//! Admits only documents whose current evaluation clears the threshold for
//! their discipline. Rejection is normal filtering, not an error.

use crate::config::QualityGateConfig;
use crate::db;
use crate::models::{Document, Evaluation, Summary};
use crate::PipelineResult;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// A document admitted by the gate, with the artifacts analysis needs
#[derive(Debug, Clone)]
pub struct QualifiedDocument {
    pub document: Document,
    pub summary: Option<Summary>,
    pub evaluation: Evaluation,
}

#[derive(Clone)]
pub struct QualityGate {
    db: SqlitePool,
    config: QualityGateConfig,
}

impl QualityGate {
    pub fn new(db: SqlitePool, config: QualityGateConfig) -> Self {
        Self { db, config }
    }

    /// Threshold applied to a document of the given discipline
    pub fn threshold_for(&self, discipline: &str) -> f64 {
        self.config.threshold_for(discipline)
    }

    /// Whether a single document currently passes the gate
    pub async fn document_passes(&self, document_id: Uuid) -> PipelineResult<bool> {
        let Some(doc) = db::documents::get(&self.db, document_id).await? else {
            return Ok(false);
        };
        let Some(eval) = db::evaluations::current(&self.db, document_id).await? else {
            return Ok(false);
        };
        Ok(eval.overall_score >= self.threshold_for(&doc.discipline))
    }

    /// All gate-passing documents of a topic, with current summary and
    /// evaluation attached
    pub async fn passing_documents(&self, topic_id: Uuid) -> PipelineResult<Vec<QualifiedDocument>> {
        let documents = db::documents::list_by_topic(&self.db, topic_id).await?;
        let mut qualified = Vec::new();

        for document in documents {
            let Some(evaluation) = db::evaluations::current(&self.db, document.id).await? else {
                continue;
            };

            let threshold = self.threshold_for(&document.discipline);
            if evaluation.overall_score < threshold {
                debug!(
                    document_id = %document.id,
                    score = evaluation.overall_score,
                    threshold = threshold,
                    discipline = %document.discipline,
                    "Document below quality threshold"
                );
                continue;
            }

            let summary = db::summaries::current(&self.db, document.id).await?;
            qualified.push(QualifiedDocument {
                document,
                summary,
                evaluation,
            });
        }

        Ok(qualified)
    }
}
