//! Consensus snapshots and per-user-pair consensus samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a topic's consensus relative to recent history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Converging,
    Diverging,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Converging => "converging",
            Trend::Diverging => "diverging",
            Trend::Stable => "stable",
        }
    }

    pub fn parse(s: &str) -> Option<Trend> {
        match s {
            "converging" => Some(Trend::Converging),
            "diverging" => Some(Trend::Diverging),
            "stable" => Some(Trend::Stable),
            _ => None,
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time consensus measurement for a topic. Immutable once written;
/// retention is FIFO per topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub snapshot_at: DateTime<Utc>,
    pub consensus_score: f64,
    /// Always 1 − consensus_score
    pub divergence_score: f64,
    pub trend: Trend,
    /// Claims shared across documents / user pairs
    pub key_points: Vec<String>,
    /// Titles of the most severe active disagreements
    pub disagreement_points: Vec<String>,
    /// Number of claims (or user pairs) the score was computed from
    pub sample_size: i64,
}

/// One ancestor chain in the discussion tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionPath {
    /// Slash-joined document ids from the thread root to the document
    pub path: String,
    pub depth: i64,
}

/// Pairwise consensus between two users who both contributed to a topic.
/// The weighting unit for topic-level aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConsensus {
    pub id: Uuid,
    pub topic_id: Uuid,
    /// Normalized so user1_id < user2_id
    pub user1_id: String,
    pub user2_id: String,
    pub consensus_score: f64,
    /// Documents contributed by either user
    pub doc_ids: Vec<Uuid>,
    pub discussion_paths: Vec<DiscussionPath>,
    /// Direct reply exchanges between the pair
    pub rounds: i64,
    /// Claims both users assert verbatim
    pub consensus_points: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl UserConsensus {
    /// Evidence weight for topic aggregation: a long, deep, multi-round
    /// exchange counts for more than a single document swap.
    pub fn weight(&self) -> f64 {
        let doc_count = self.doc_ids.len() as f64;
        let avg_depth = if self.discussion_paths.is_empty() {
            0.0
        } else {
            self.discussion_paths.iter().map(|p| p.depth as f64).sum::<f64>()
                / self.discussion_paths.len() as f64
        };
        doc_count * (1.0 + avg_depth * 0.1) * (1.0 + self.rounds as f64 * 0.2)
    }
}
