use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use super::{LlmProvider, ProviderError, SharedProvider};

/// Two providers behind one interface. Calls go to the active provider; when
/// it yields nothing the other one is tried, and if that succeeds it becomes
/// active for every later call so a rate-limited provider is not hammered.
pub struct FallbackClient {
    providers: Vec<SharedProvider>,
    active: AtomicUsize,
}

impl FallbackClient {
    /// `primary` starts active. Either side may be missing, but not both.
    pub fn new(
        primary: Option<SharedProvider>,
        fallback: Option<SharedProvider>,
    ) -> Result<Self, ProviderError> {
        let providers: Vec<SharedProvider> = primary.into_iter().chain(fallback).collect();
        if providers.is_empty() {
            return Err(ProviderError::Config(
                "no LLM provider available; set GEMINI_API_KEY or OPENAI_API_KEY".into(),
            ));
        }
        Ok(Self {
            providers,
            active: AtomicUsize::new(0),
        })
    }

    fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst) % self.providers.len()
    }

    fn active(&self) -> &SharedProvider {
        &self.providers[self.active_index()]
    }

    pub fn has_fallback(&self) -> bool {
        self.providers.len() > 1
    }
}

#[async_trait]
impl LlmProvider for FallbackClient {
    fn name(&self) -> &str {
        self.active().name()
    }

    fn model_name(&self) -> &str {
        self.active().model_name()
    }

    fn max_input_tokens(&self) -> usize {
        self.active().max_input_tokens()
    }

    fn request_timeout(&self) -> Duration {
        self.active().request_timeout()
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.active().complete(prompt).await
    }

    async fn generate(&self, prompt: &str, max_retries: u32) -> Option<Value> {
        let idx = self.active_index();
        let primary = &self.providers[idx];
        if let Some(value) = primary.generate(prompt, max_retries).await {
            return Some(value);
        }
        if !self.has_fallback() {
            return None;
        }

        let other_idx = (idx + 1) % self.providers.len();
        let other = &self.providers[other_idx];
        warn!(
            from = primary.name(),
            to = other.name(),
            "primary provider failed; falling back"
        );
        let value = other.generate(prompt, max_retries).await?;
        info!(provider = other.name(), "switching active provider");
        self.active.store(other_idx, Ordering::SeqCst);
        Some(value)
    }
}
