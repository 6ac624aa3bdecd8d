//! Pipeline services

pub mod ai_client;
pub mod claims;
pub mod consensus_tracker;
pub mod disagreement_analyzer;
pub mod evaluation;
pub mod extraction;
pub mod intake;
pub mod quality_gate;
pub mod status_tracker;
pub mod summarization;
pub mod topic_consensus;

pub use ai_client::{AiOutcome, AiRequest, AiTask, AiTextService, HttpTextService};
pub use consensus_tracker::ConsensusTracker;
pub use disagreement_analyzer::{AnalysisOutcome, DisagreementAnalyzer};
pub use evaluation::EvaluationStage;
pub use extraction::ExtractionStage;
pub use intake::IntakeService;
pub use quality_gate::{QualifiedDocument, QualityGate};
pub use status_tracker::{DependencyReport, StatusTracker};
pub use summarization::SummarizationStage;
pub use topic_consensus::{TopicConsensus, TopicConsensusAggregator};
