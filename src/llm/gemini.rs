use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{classify_status, LlmProvider, ProviderError, MAX_OUTPUT_TOKENS, TEMPERATURE};
use crate::config::ProviderSettings;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/";
/// Context window minus headroom for the prompt template.
pub const GEMINI_MAX_INPUT_TOKENS: usize = 900_000;

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self, ProviderError> {
        let base_url = Url::parse(GEMINI_API_BASE)
            .map_err(|e| ProviderError::Config(format!("invalid Gemini URL: {e}")))?;
        Self::with_base_url(api_key, model, base_url)
    }

    pub fn with_base_url(
        api_key: String,
        model: String,
        base_url: Url,
    ) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config("Gemini API key is empty".into()));
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
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .map_err(|e| ProviderError::Config(format!("invalid Gemini endpoint: {e}")))?;
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
                response_mime_type: "application/json",
            },
        };
        Ok(self
            .http
            .post(endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .build()?)
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_input_tokens(&self) -> usize {
        GEMINI_MAX_INPUT_TOKENS
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
        let payload: GenerateResponse = res.json().await?;
        payload.text().ok_or(ProviderError::EmptyContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn request_shape() {
        let client = GeminiClient::new("k".into(), "gemini-2.5-flash".into()).unwrap();
        let req = client.build_request("hello").unwrap();
        assert_eq!(
            req.url().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(req.headers()["x-goog-api-key"], "k");
        let body: Value =
            serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = GeminiClient::new(" ".into(), "m".into()).unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[test]
    fn response_text_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]}}]}"#;
        let resp: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.text().as_deref(), Some("{\"a\":1}"));

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(empty.text().is_none());
    }
}
