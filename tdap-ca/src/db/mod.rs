//! Database operations for the analysis pipeline
//!
//! Runtime-string sqlx queries against the shared SQLite schema
//! (see tdap_common::db). One module per entity.

pub mod disagreements;
pub mod documents;
pub mod evaluations;
pub mod snapshots;
pub mod summaries;
pub mod user_consensus;

use crate::PipelineError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Parse a UUID stored as TEXT
pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(s)
        .map_err(|e| PipelineError::Internal(format!("invalid UUID in database: {}", e)))
}

/// Parse an RFC 3339 timestamp stored as TEXT
pub(crate) fn parse_time(s: &str) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::Internal(format!("invalid timestamp in database: {}", e)))
}

/// Decode a JSON column, tolerating legacy empty strings
pub(crate) fn parse_json<T: serde::de::DeserializeOwned + Default>(s: &str) -> T {
    if s.trim().is_empty() {
        return T::default();
    }
    serde_json::from_str(s).unwrap_or_default()
}
