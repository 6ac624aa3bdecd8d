//! Pairwise disagreement between two documents' claims
//!
//! Disagreements are deduplicated by SHA-256 over (doc1, doc2, title) and are
//! never hard-deleted; a document falling out of the quality gate flips the
//! record to `invalid`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// How strongly the two claims conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Sort rank, most severe first
    pub fn rank(&self) -> u8 {
        match self {
            Severity::High => 0,
            Severity::Medium => 1,
            Severity::Low => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status; soft invalidation only, no deletes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisagreementStatus {
    Active,
    Invalid,
}

impl DisagreementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisagreementStatus::Active => "active",
            DisagreementStatus::Invalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Option<DisagreementStatus> {
        match s {
            "active" => Some(DisagreementStatus::Active),
            "invalid" => Some(DisagreementStatus::Invalid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub doc1_id: Uuid,
    pub doc2_id: Uuid,
    pub title: String,
    pub description: String,
    pub claim1: String,
    pub claim2: String,
    pub severity: Severity,
    /// Model confidence in [0,1]
    pub confidence: f64,
    /// Union of both documents' discussion-tree branch paths
    pub branch_paths: Vec<String>,
    pub dedup_hash: String,
    pub status: DisagreementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Disagreement {
    /// Identity hash: doc pair + title.
    ///
    /// An accepted approximation of disagreement identity; content-aware
    /// matching is out of scope. The pair is order-normalized so an
    /// incremental run and a later full run agree on identity.
    pub fn dedup_hash(doc1_id: Uuid, doc2_id: Uuid, title: &str) -> String {
        let (first, second) = if doc1_id <= doc2_id {
            (doc1_id, doc2_id)
        } else {
            (doc2_id, doc1_id)
        };
        let mut hasher = Sha256::new();
        hasher.update(first.as_bytes());
        hasher.update(second.as_bytes());
        hasher.update(title.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
