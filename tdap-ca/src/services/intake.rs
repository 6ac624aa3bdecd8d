//! Document intake
//!
//! Entry point of the pipeline: persist an uploaded document and enqueue its
//! extraction. Upload transport and parsing of binary formats live outside
//! this service.

use crate::db;
use crate::dispatch::{JobDispatcher, StageJob};
use crate::models::Document;
use crate::PipelineResult;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct IntakeService {
    db: SqlitePool,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl IntakeService {
    pub fn new(db: SqlitePool, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// Persist a new document and kick off its processing
    pub async fn submit(&self, document: Document) -> PipelineResult<Document> {
        db::documents::insert(&self.db, &document).await?;

        info!(
            document_id = %document.id,
            topic_id = %document.topic_id,
            author_id = %document.author_id,
            "Document accepted for analysis"
        );

        self.dispatcher
            .enqueue(StageJob::Extract {
                document_id: document.id,
            })
            .await?;

        Ok(document)
    }
}
