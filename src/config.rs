//! Configuration loader and validator for the briefing pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub providers: Providers,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

/// LLM provider routing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Providers {
    #[serde(default = "default_gemini_share")]
    pub gemini_share: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub gemini: ProviderSettings,
    pub openai: ProviderSettings,
}

/// Credentials and limits for one provider. An empty `api_key` marks the
/// provider as unavailable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub concurrency: usize,
}

impl ProviderSettings {
    pub fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

fn default_progress_interval() -> u64 {
    10
}

fn default_gemini_share() -> f64 {
    0.7
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    120
}

impl App {
    /// `data_dir` with a leading `~/` expanded against `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// Fill empty API keys from `GEMINI_API_KEY` / `OPENAI_API_KEY`.
    /// Binaries call this once at startup.
    pub fn with_env_keys(mut self) -> Self {
        if !self.providers.gemini.is_available() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                self.providers.gemini.api_key = key;
            }
        }
        if !self.providers.openai.is_available() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                self.providers.openai.api_key = key;
            }
        }
        self
    }

    /// Default SQLite location unless `DATABASE_URL` is set by the caller.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}/briefing.db", self.app.resolved_data_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.progress_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.progress_interval_secs must be > 0"));
    }

    let p = &cfg.providers;
    if !(0.0..=1.0).contains(&p.gemini_share) {
        return Err(ConfigError::Invalid("providers.gemini_share must be within [0, 1]"));
    }
    if p.max_retries == 0 {
        return Err(ConfigError::Invalid("providers.max_retries must be >= 1"));
    }
    if p.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("providers.request_timeout_secs must be > 0"));
    }

    if p.gemini.model.trim().is_empty() {
        return Err(ConfigError::Invalid("providers.gemini.model must be non-empty"));
    }
    if p.gemini.concurrency == 0 {
        return Err(ConfigError::Invalid("providers.gemini.concurrency must be >= 1"));
    }
    if p.openai.model.trim().is_empty() {
        return Err(ConfigError::Invalid("providers.openai.model must be non-empty"));
    }
    if p.openai.concurrency == 0 {
        return Err(ConfigError::Invalid("providers.openai.concurrency must be >= 1"));
    }

    Ok(())
}

/// Returns an example configuration document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  progress_interval_secs: 10

providers:
  gemini_share: 0.7
  max_retries: 3
  request_timeout_secs: 120

  gemini:
    api_key: ""
    model: "gemini-2.5-flash"
    concurrency: 5
  openai:
    api_key: ""
    model: "gpt-4o"
    concurrency: 3
"#
}
