use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{classify_status, LlmProvider, ProviderError, MAX_OUTPUT_TOKENS, TEMPERATURE};
use crate::config::ProviderSettings;

const OPENAI_API_BASE: &str = "https://api.openai.com/";
/// Context window minus headroom for the prompt template.
pub const OPENAI_MAX_INPUT_TOKENS: usize = 120_000;
const SYSTEM_PROMPT: &str = "You are a sharp tech/business analyst. Always respond with valid JSON only, no markdown formatting.";

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Result<Self, ProviderError> {
        let base_url = Url::parse(OPENAI_API_BASE)
            .map_err(|e| ProviderError::Config(format!("invalid OpenAI URL: {e}")))?;
        Self::with_base_url(api_key, model, base_url)
    }

    pub fn with_base_url(
        api_key: String,
        model: String,
        base_url: Url,
    ) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config("OpenAI API key is empty".into()));
        }
        let http = Client::builder()
            .user_agent("daily-briefing/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            timeout: super::DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn from_settings(
        settings: &ProviderSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self::new(settings.api_key.clone(), settings.model.clone())?.with_timeout(timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build_request(&self, prompt: &str) -> Result<reqwest::Request, ProviderError> {
        let endpoint = self
            .base_url
            .join("v1/chat/completions")
            .map_err(|e| ProviderError::Config(format!("invalid OpenAI endpoint: {e}")))?;
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        Ok(self
            .http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .build()?)
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_input_tokens(&self) -> usize {
        OPENAI_MAX_INPUT_TOKENS
    }

    fn request_timeout(&self) -> Duration {
        self.timeout
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = self.build_request(prompt)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        let payload: ChatResponse = res.json().await?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::EmptyContent)
    }
}
