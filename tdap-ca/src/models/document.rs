//! Document and stage status models
//!
//! A document's `processing_status` is a per-stage state map. States only
//! move forward: pending → processing → completed/failed, with the single
//! backward edge failed → processing for re-runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One phase of document processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Extract,
    Summarize,
    Evaluate,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Extract => "extract",
            ProcessingStage::Summarize => "summarize",
            ProcessingStage::Evaluate => "evaluate",
        }
    }

    /// All stages in pipeline order
    pub fn all() -> [ProcessingStage; 3] {
        [
            ProcessingStage::Extract,
            ProcessingStage::Summarize,
            ProcessingStage::Evaluate,
        ]
    }

    /// The stage enqueued after this one completes, if any
    pub fn next(&self) -> Option<ProcessingStage> {
        match self {
            ProcessingStage::Extract => Some(ProcessingStage::Summarize),
            ProcessingStage::Summarize => Some(ProcessingStage::Evaluate),
            ProcessingStage::Evaluate => None,
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Processing => "processing",
            StageState::Completed => "completed",
            StageState::Failed => "failed",
        }
    }

    /// Forward-only transition rule.
    ///
    /// `failed → processing` (and the degenerate `failed → completed` an
    /// idempotent re-run can produce) are the only backward edges.
    pub fn can_transition_to(&self, next: StageState) -> bool {
        use StageState::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Pending, _) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            (Failed, Processing) | (Failed, Completed) => true,
            (Completed, _) => false,
            _ => false,
        }
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map of stage → state, serialized as a JSON object on the document row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStatus(BTreeMap<ProcessingStage, StageState>);

impl ProcessingStatus {
    /// All stages pending
    pub fn new() -> Self {
        let mut map = BTreeMap::new();
        for stage in ProcessingStage::all() {
            map.insert(stage, StageState::Pending);
        }
        Self(map)
    }

    pub fn get(&self, stage: ProcessingStage) -> StageState {
        self.0.get(&stage).copied().unwrap_or(StageState::Pending)
    }

    pub fn set(&mut self, stage: ProcessingStage, state: StageState) {
        self.0.insert(stage, state);
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(json: &str) -> Self {
        serde_json::from_str(json).unwrap_or_else(|_| Self::new())
    }
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// An uploaded document in a discussion topic
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub topic_id: Uuid,
    /// Document this one replies to, forming the discussion tree
    pub parent_id: Option<Uuid>,
    pub author_id: String,
    pub title: String,
    pub discipline: String,
    /// Raw uploaded content
    pub content: Vec<u8>,
    /// SHA-256 of `content`, set by extraction
    pub content_hash: Option<String>,
    /// Earlier document in the topic with identical content, if any
    pub duplicate_of: Option<Uuid>,
    pub extracted_text: Option<String>,
    pub processing_status: ProcessingStatus,
    /// Current-version pointers; "latest wins" made structural
    pub current_summary_id: Option<Uuid>,
    pub current_evaluation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        topic_id: Uuid,
        parent_id: Option<Uuid>,
        author_id: impl Into<String>,
        title: impl Into<String>,
        discipline: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            topic_id,
            parent_id,
            author_id: author_id.into(),
            title: title.into(),
            discipline: discipline.into(),
            content,
            content_hash: None,
            duplicate_of: None,
            extracted_text: None,
            processing_status: ProcessingStatus::new(),
            current_summary_id: None,
            current_evaluation_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
