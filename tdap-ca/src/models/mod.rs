//! Data models for the analysis pipeline

mod consensus;
mod disagreement;
mod document;
mod evaluation;
mod summary;

pub use consensus::{ConsensusSnapshot, DiscussionPath, Trend, UserConsensus};
pub use disagreement::{Disagreement, DisagreementStatus, Severity};
pub use document::{Document, ProcessingStage, ProcessingStatus, StageState};
pub use evaluation::Evaluation;
pub use summary::Summary;
