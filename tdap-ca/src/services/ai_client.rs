//! AI text service client
//!
//! One seam for every model call the pipeline makes. The outcome is a tagged
//! enum: a genuine completion with usage accounting, or a cost-policy
//! rejection carrying a labeled placeholder. The placeholder variant can
//! never be persisted as stage output by accident, because callers must
//! match on it.

use crate::config::AiServiceConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// What the call is for; used for logging and request labeling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiTask {
    Summarize,
    Evaluate,
    DetectDisagreement,
}

impl AiTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiTask::Summarize => "summarize",
            AiTask::Evaluate => "evaluate",
            AiTask::DetectDisagreement => "detect_disagreement",
        }
    }
}

/// One model call
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub prompt: String,
    /// Caller's cost estimate; the service rejects calls over its ceiling
    pub estimated_max_cost_cents: f64,
    pub user_id: Option<String>,
    pub task: AiTask,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_cents: f64,
}

#[derive(Debug, Clone)]
pub struct AiCompletion {
    pub text: String,
    pub usage: AiUsage,
}

/// Tagged call outcome. CostLimited is a policy rejection, not a result.
#[derive(Debug, Clone)]
pub enum AiOutcome {
    Completion(AiCompletion),
    CostLimited { placeholder: String },
}

/// AI client errors
#[derive(Debug, Error)]
pub enum AiClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("malformed API response: {0}")]
    Malformed(String),
}

/// The external AI text service seam
#[async_trait]
pub trait AiTextService: Send + Sync {
    async fn call(&self, request: AiRequest) -> Result<AiOutcome, AiClientError>;
}

// ============================================================================
// HTTP implementation (OpenAI-style chat completions)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}

/// AI text service over an OpenAI-compatible HTTP endpoint
pub struct HttpTextService {
    client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    cost_per_1k_tokens_cents: f64,
    cost_ceiling_cents: f64,
}

impl HttpTextService {
    pub fn new(config: &AiServiceConfig) -> Result<Self, AiClientError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent("tdap-ca/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| AiClientError::Network(e.to_string()))?;

        let per_second = std::num::NonZeroU32::new(config.requests_per_second.max(1))
            .expect("max(1) guarantees non-zero");
        let rate_limiter = governor::RateLimiter::direct(governor::Quota::per_second(per_second));

        Ok(Self {
            client,
            rate_limiter,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout,
            cost_per_1k_tokens_cents: config.cost_per_1k_tokens_cents,
            cost_ceiling_cents: config.cost_ceiling_cents,
        })
    }

    /// Rough upfront cost estimate for a prompt
    pub fn estimate_cost_cents(&self, prompt: &str) -> f64 {
        estimate_prompt_cost_cents(prompt, self.cost_per_1k_tokens_cents)
    }
}

/// Upfront cost estimate for a prompt (~4 characters per token)
pub fn estimate_prompt_cost_cents(prompt: &str, cost_per_1k_tokens_cents: f64) -> f64 {
    let estimated_tokens = (prompt.len() as f64 / 4.0).ceil();
    estimated_tokens / 1000.0 * cost_per_1k_tokens_cents
}

#[async_trait]
impl AiTextService for HttpTextService {
    async fn call(&self, request: AiRequest) -> Result<AiOutcome, AiClientError> {
        // Cost policy gate: reject before spending anything
        if request.estimated_max_cost_cents > self.cost_ceiling_cents {
            warn!(
                task = request.task.as_str(),
                estimated_cents = request.estimated_max_cost_cents,
                ceiling_cents = self.cost_ceiling_cents,
                "AI call rejected by cost policy"
            );
            return Ok(AiOutcome::CostLimited {
                placeholder: format!(
                    "[analysis unavailable: estimated cost {:.1} cents exceeds the {:.1} cent limit]",
                    request.estimated_max_cost_cents, self.cost_ceiling_cents
                ),
            });
        }

        self.rate_limiter.until_ready().await;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            user: request.user_id.as_deref(),
        };

        debug!(
            task = request.task.as_str(),
            prompt_chars = request.prompt.len(),
            "Calling AI text service"
        );

        let url = format!("{}/chat/completions", self.base_url);
        let mut http_request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                AiClientError::Timeout(self.timeout)
            } else {
                AiClientError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AiClientError::Api(status.as_u16(), error_text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiClientError::Malformed(e.to_string()))?;

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiClientError::Malformed("response contained no choices".to_string()))?;

        let usage = chat.usage.unwrap_or_default();
        let total_tokens = usage.prompt_tokens + usage.completion_tokens;
        let cost_cents = total_tokens as f64 / 1000.0 * self.cost_per_1k_tokens_cents;

        debug!(
            task = request.task.as_str(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_cents = cost_cents,
            "AI call complete"
        );

        Ok(AiOutcome::Completion(AiCompletion {
            text: choice.message.content,
            usage: AiUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                cost_cents,
            },
        }))
    }
}

// ============================================================================
// Response decoding
// ============================================================================

/// Structured-decode failure, with the raw text preserved for diagnosis
#[derive(Debug)]
pub struct AiDecodeError {
    pub message: String,
    pub raw: String,
}

/// Strictly decode an AI response as JSON of type T.
///
/// Exactly one bounded recovery strategy: models frequently wrap JSON in a
/// Markdown code fence, so a fenced payload is unwrapped and parsed once
/// more. No other repair is attempted.
pub fn decode_ai_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, AiDecodeError> {
    let trimmed = raw.trim();

    match serde_json::from_str(trimmed) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            if let Some(unfenced) = strip_code_fence(trimmed) {
                serde_json::from_str(unfenced).map_err(|e| AiDecodeError {
                    message: e.to_string(),
                    raw: raw.to_string(),
                })
            } else {
                Err(AiDecodeError {
                    message: first_err.to_string(),
                    raw: raw.to_string(),
                })
            }
        }
    }
}

/// Unwrap a ```...``` fence (with optional language tag); None if not fenced
fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // Drop the language tag line ("json", etc.)
    let body_start = rest.find('\n')? + 1;
    let body = &rest[body_start..];
    let body_end = body.rfind("```")?;
    Some(body[..body_end].trim())
}
