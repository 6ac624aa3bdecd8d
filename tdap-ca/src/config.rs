//! Configuration for tdap-ca
//!
//! Tunables are loaded from a TOML file in the root folder, with environment
//! overrides for secrets. Missing file means compiled defaults; a malformed
//! file is a hard configuration error rather than silent defaults.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tdap_common::{Error, Result};
use tracing::{info, warn};

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub ai: AiServiceConfig,
    pub pipeline: PipelineTunables,
    pub quality: QualityGateConfig,
    pub queue: QueueConfig,
}

/// AI text service connection and cost policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiServiceConfig {
    /// OpenAI-compatible chat-completions base URL
    pub base_url: String,
    /// API key; TDAP_AI_API_KEY environment variable takes priority
    pub api_key: Option<String>,
    pub model: String,
    /// Hard timeout for one AI call
    pub timeout_secs: u64,
    /// Outbound rate limit for AI calls
    pub requests_per_second: u32,
    /// Flat token price used for usage accounting and cost estimates
    pub cost_per_1k_tokens_cents: f64,
    /// Calls with a higher estimated cost are policy-rejected, not made
    pub cost_ceiling_cents: f64,
}

impl Default for AiServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            api_key: None,
            model: "default".to_string(),
            timeout_secs: 60,
            requests_per_second: 2,
            cost_per_1k_tokens_cents: 0.5,
            cost_ceiling_cents: 50.0,
        }
    }
}

/// Pipeline behavior tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineTunables {
    /// Maximum characters of extracted text fed to summarization
    pub summary_input_cap: usize,
    /// Analyzer result cache window, seconds
    pub debounce_secs: u64,
    /// Consensus snapshots retained per topic
    pub snapshot_retention: i64,
    /// Concurrent AI calls per analyzer batch
    pub pair_batch_size: usize,
    /// Job retry budget before a job is marked failed
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff, milliseconds
    pub retry_base_ms: u64,
}

impl Default for PipelineTunables {
    fn default() -> Self {
        Self {
            summary_input_cap: 24_000,
            debounce_secs: 300,
            snapshot_retention: 50,
            pair_batch_size: 10,
            max_attempts: 3,
            retry_base_ms: 500,
        }
    }
}

/// Quality gate thresholds, keyed by discipline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityGateConfig {
    pub default_threshold: f64,
    /// Per-discipline overrides; rigor expectations differ by field
    pub thresholds: HashMap<String, f64>,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert("mathematics".to_string(), 0.75);
        thresholds.insert("physics".to_string(), 0.7);
        thresholds.insert("philosophy".to_string(), 0.55);
        Self {
            default_threshold: 0.6,
            thresholds,
        }
    }
}

impl QualityGateConfig {
    /// Threshold for a discipline, falling back to the default
    pub fn threshold_for(&self, discipline: &str) -> f64 {
        self.thresholds
            .get(discipline)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

/// Job queue strategy selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// "durable" (jobs table) or "in-process" (fire-and-forget)
    pub strategy: QueueStrategy,
    /// Durable queue poll interval, milliseconds
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            strategy: QueueStrategy::Durable,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueStrategy {
    Durable,
    InProcess,
}

impl ServiceConfig {
    /// Load configuration from a TOML file, applying environment overrides.
    ///
    /// A missing file yields defaults; a present but malformed file errors.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ServiceConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            info!(path = %path.display(), "Loaded service configuration");
            config
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            ServiceConfig::default()
        };

        // Secrets prefer the environment over the config file
        if let Ok(key) = std::env::var("TDAP_AI_API_KEY") {
            if !key.trim().is_empty() {
                if config.ai.api_key.is_some() {
                    warn!("AI API key found in both environment and config file, using environment");
                }
                config.ai.api_key = Some(key);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.pair_batch_size == 0 {
            return Err(Error::Config("pipeline.pair_batch_size must be > 0".into()));
        }
        if self.pipeline.snapshot_retention < 1 {
            return Err(Error::Config("pipeline.snapshot_retention must be >= 1".into()));
        }
        if self.ai.requests_per_second == 0 {
            return Err(Error::Config("ai.requests_per_second must be > 0".into()));
        }
        Ok(())
    }
}
