//! LLM provider clients and the shared retry policy.
//!
//! Every provider implements [`LlmProvider::complete`], a single raw call that
//! returns the model's text. Retries, backoff, the per-call timeout and JSON
//! extraction live once in [`generate_with_retry`] so all providers fail the
//! same way.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Providers;

pub mod fallback;
pub mod gemini;
pub mod openai;

pub use fallback::FallbackClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// Rough English-text ratio used for all token estimates.
pub const CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated due to length]";
const RATE_LIMIT_STEP_SECS: u64 = 30;
const TEMPERATURE: f32 = 0.3;
const MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed JSON in response: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("provider returned empty content")]
    EmptyContent,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    /// Delay before the next attempt, or `None` when retrying cannot help.
    /// `attempt` is zero-based.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        let exponential = Duration::from_secs(1u64 << attempt.min(10));
        match self {
            ProviderError::QuotaExhausted(_)
            | ProviderError::Timeout(_)
            | ProviderError::Config(_) => None,
            ProviderError::RateLimited(_) => Some(Duration::from_secs(
                RATE_LIMIT_STEP_SECS * (u64::from(attempt) + 1),
            )),
            ProviderError::MalformedJson(_)
            | ProviderError::Server { .. }
            | ProviderError::Http(_)
            | ProviderError::Api { .. }
            | ProviderError::EmptyContent => Some(exponential),
        }
    }
}

/// Map a non-success HTTP status and body into the error taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let lower = body.to_lowercase();
        if lower.contains("free_tier") && lower.contains("limit: 0") {
            return ProviderError::QuotaExhausted(body);
        }
        return ProviderError::RateLimited(body);
    }
    if status.is_server_error() {
        return ProviderError::Server {
            status: status.as_u16(),
            body,
        };
    }
    ProviderError::Api {
        status: status.as_u16(),
        body,
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Shorten `text` to roughly `max_tokens`. The cut lands after the last
/// complete sentence inside the budget when that sentence ends in the final
/// fifth of it; otherwise the text is cut hard at the budget. A marker is
/// appended whenever anything was dropped.
pub fn truncate_for_context(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let hard_cut = floor_char_boundary(text, max_chars);
    let head = &text[..hard_cut];
    let cut = match head.rfind(". ") {
        Some(idx) if (idx + 1) * 10 >= max_chars * 8 => idx + 1,
        _ => hard_cut,
    };
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_json_fences(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

/// Parse a model reply into JSON.
pub fn parse_json_reply(text: &str) -> Result<Value, ProviderError> {
    let body = strip_json_fences(text);
    if body.is_empty() {
        return Err(ProviderError::EmptyContent);
    }
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider label used in logs and per-provider tallies.
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    fn max_input_tokens(&self) -> usize;

    fn request_timeout(&self) -> Duration {
        DEFAULT_REQUEST_TIMEOUT
    }

    /// One raw request. Returns the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;

    fn estimate_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn truncate_for_context(&self, text: &str, max_tokens: usize) -> String {
        truncate_for_context(text, max_tokens)
    }

    /// Parsed JSON reply, or `None` once retries are exhausted or the error
    /// cannot be retried.
    async fn generate(&self, prompt: &str, max_retries: u32) -> Option<Value> {
        generate_with_retry(self, prompt, max_retries).await
    }
}

pub type SharedProvider = Arc<dyn LlmProvider>;

/// Build the configured providers as (gemini, openai). A provider without an
/// API key, or whose client fails to initialize, comes back as `None`.
pub fn providers_from_config(cfg: &Providers) -> (Option<SharedProvider>, Option<SharedProvider>) {
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    let gemini = if cfg.gemini.is_available() {
        match GeminiClient::from_settings(&cfg.gemini, timeout) {
            Ok(client) => Some(Arc::new(client) as SharedProvider),
            Err(err) => {
                warn!(error = %err, "gemini client init failed");
                None
            }
        }
    } else {
        None
    };
    let openai = if cfg.openai.is_available() {
        match OpenAiClient::from_settings(&cfg.openai, timeout) {
            Ok(client) => Some(Arc::new(client) as SharedProvider),
            Err(err) => {
                warn!(error = %err, "openai client init failed");
                None
            }
        }
    } else {
        None
    };
    (gemini, openai)
}

/// Call `provider` up to `max_retries` times with backoff between attempts.
/// A call exceeding the provider's timeout is abandoned and not retried.
pub async fn generate_with_retry<P: LlmProvider + ?Sized>(
    provider: &P,
    prompt: &str,
    max_retries: u32,
) -> Option<Value> {
    let attempts = max_retries.max(1);
    let limit = provider.request_timeout();
    for attempt in 0..attempts {
        let outcome = match tokio::time::timeout(limit, provider.complete(prompt)).await {
            Ok(Ok(text)) => parse_json_reply(&text),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProviderError::Timeout(limit)),
        };
        let err = match outcome {
            Ok(value) => {
                debug!(provider = provider.name(), attempt, "LLM call succeeded");
                return Some(value);
            }
            Err(err) => err,
        };

        let Some(delay) = err.backoff(attempt) else {
            warn!(
                provider = provider.name(),
                attempt = attempt + 1,
                error = %err,
                "LLM call failed; not retrying"
            );
            return None;
        };
        if attempt + 1 >= attempts {
            warn!(
                provider = provider.name(),
                attempts,
                error = %err,
                "LLM call failed; retries exhausted"
            );
            break;
        }
        warn!(
            provider = provider.name(),
            attempt = attempt + 1,
            attempts,
            delay_secs = delay.as_secs(),
            error = %err,
            "LLM call failed; backing off"
        );
        tokio::time::sleep(delay).await;
    }
    None
}
