//! Event types for the TDAP event system
//!
//! Provides shared event definitions and the EventBus used by the analysis
//! service. Events are broadcast in-process; subscribers are observers such
//! as tests and log bridges.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// TDAP pipeline event types
///
/// Broadcast via EventBus. All events use this central enum for type safety
/// and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A processing stage began work on a document
    StageStarted {
        document_id: Uuid,
        stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A processing stage finished a document
    StageCompleted {
        document_id: Uuid,
        stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A processing stage failed; the dispatcher decides on retry
    StageFailed {
        document_id: Uuid,
        stage: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An uploaded document's content hash matched an existing document
    DuplicateDetected {
        document_id: Uuid,
        original_document_id: Uuid,
        content_hash: String,
    },

    /// The analyzer persisted a new disagreement
    DisagreementRecorded {
        topic_id: Uuid,
        doc1_id: Uuid,
        doc2_id: Uuid,
        severity: String,
    },

    /// A pairwise analysis run finished for a topic
    AnalysisCompleted {
        topic_id: Uuid,
        pairs_examined: usize,
        disagreements_found: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A consensus snapshot was appended for a topic
    SnapshotRecorded {
        topic_id: Uuid,
        consensus_score: f64,
        trend: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Topic-level weighted consensus was recomputed
    TopicConsensusUpdated {
        topic_id: Uuid,
        consensus_score: f64,
        user_pairs: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

// ============================================================================
// EventBus Implementation
// ============================================================================

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: multiple subscribers, bounded buffer,
/// lagging receivers drop the oldest events.
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    ///
    /// Progress-style events are lossy: if nobody is listening the event is
    /// dropped silently.
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}
