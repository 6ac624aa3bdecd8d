//! Quality evaluation of a document
//!
//! Source of the quality gate: a document participates in disagreement and
//! consensus analysis only when its current evaluation clears the threshold
//! for its discipline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub discipline: String,
    /// Per-criterion scores in [0,1] (e.g. rigor, evidence, clarity)
    pub scores: BTreeMap<String, f64>,
    /// Mean of the criterion scores
    pub overall_score: f64,
    pub verdict: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_cents: f64,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn new(document_id: Uuid, discipline: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            discipline: discipline.into(),
            scores: BTreeMap::new(),
            overall_score: 0.0,
            verdict: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_cents: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Recompute `overall_score` as the mean of the criterion scores
    pub fn recompute_overall(&mut self) {
        if self.scores.is_empty() {
            self.overall_score = 0.0;
        } else {
            self.overall_score =
                self.scores.values().sum::<f64>() / self.scores.len() as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_is_mean_of_criteria() {
        let mut eval = Evaluation::new(Uuid::new_v4(), "physics");
        eval.scores.insert("rigor".into(), 0.8);
        eval.scores.insert("evidence".into(), 0.6);
        eval.scores.insert("clarity".into(), 0.7);
        eval.recompute_overall();
        assert!((eval.overall_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn overall_defaults_to_zero_without_scores() {
        let mut eval = Evaluation::new(Uuid::new_v4(), "physics");
        eval.recompute_overall();
        assert_eq!(eval.overall_score, 0.0);
    }
}
