//! tdap-ca library interface
//!
//! Exposes the content-analysis pipeline for the service binary and for
//! integration testing: models, database queries, stage services, the
//! pairwise disagreement analyzer, consensus builders, and job dispatch.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{PipelineError, PipelineResult};
