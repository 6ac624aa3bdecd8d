//! AI-generated document summary
//!
//! Summary rows are append-only; the document's `current_summary_id` pointer
//! decides which row is live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub document_id: Uuid,
    pub title: String,
    pub overview: String,
    /// Section headings / structural outline
    pub structure: Vec<String>,
    /// Discrete claims the document asserts; unit of consensus analysis
    pub claims: Vec<String>,
    pub keywords: Vec<String>,
    /// Model that produced this summary; None for copied duplicates
    pub model: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_cents: f64,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub fn new(document_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            title: String::new(),
            overview: String::new(),
            structure: Vec::new(),
            claims: Vec::new(),
            keywords: Vec::new(),
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_cents: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Copy of this summary for another document (duplicate-content reuse)
    pub fn copied_for(&self, document_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            title: self.title.clone(),
            overview: self.overview.clone(),
            structure: self.structure.clone(),
            claims: self.claims.clone(),
            keywords: self.keywords.clone(),
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_cents: 0.0,
            created_at: Utc::now(),
        }
    }
}
