//! Configuration for the completion layer.
//!
//! Maps directly to `mnemo.toml`. Every section has serde defaults so a
//! partial file (or an empty one) is valid.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MnemoConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Default backend.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Retry tuning per operation.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Shared outbound request budget.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Override routing.
    #[serde(default)]
    pub router: RouterConfig,
    /// Prompt locations.
    #[serde(default)]
    pub prompts: PromptConfig,
}

impl MnemoConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `LlmError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| LlmError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Secret API key. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for building the `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether no key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// How structured replies are requested from the model and extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// `response_format = json_object`, schema described in the system prompt.
    #[default]
    JsonMode,
    /// `response_format = json_schema` with a strict schema.
    JsonSchemaMode,
    /// Plain completion; JSON pulled out of a fenced markdown block.
    MdJson,
}

/// Which family of API the backend speaks. All are OpenAI-compatible over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Ollama's OpenAI-compatible `/v1` API (local).
    #[default]
    Ollama,
    /// OpenAI or any hosted OpenAI-compatible API.
    OpenAi,
    /// OpenRouter.
    OpenRouter,
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Transcription model, independent of the chat model.
    #[serde(default = "default_whisper")]
    pub model: String,
    /// Target language (ISO-639-1).
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: default_whisper(),
            language: default_language(),
        }
    }
}

/// One backend's endpoint, credentials and model.
///
/// Vision fields are optional; unset ones resolve to the primary values so a
/// backend without separate vision settings still answers image requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Human-readable adapter name (used in logs).
    #[serde(default = "default_backend_name")]
    pub name: String,
    /// API family.
    #[serde(default)]
    pub provider: ProviderKind,
    /// Base URL, e.g. `http://localhost:11434/v1`.
    #[serde(default = "default_ollama_url")]
    pub endpoint: String,
    /// API key (Ollama ignores it but the OpenAI client requires one).
    #[serde(default = "default_ollama_key")]
    pub api_key: ApiKey,
    /// Chat model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Vision model, if different from `model`.
    #[serde(default)]
    pub vision_model: Option<String>,
    /// Vision endpoint, if different from `endpoint`.
    #[serde(default)]
    pub vision_endpoint: Option<String>,
    /// Vision API key, if different from `api_key`.
    #[serde(default)]
    pub vision_api_key: Option<ApiKey>,
    /// Max output tokens for structured completions.
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
    /// Max output tokens for image descriptions.
    #[serde(default = "default_vision_max_tokens")]
    pub vision_max_tokens: u32,
    /// Structured-output extraction mode.
    #[serde(default)]
    pub extraction_mode: ExtractionMode,
    /// Validation-repair round trips after the first reply.
    #[serde(default = "default_max_repairs")]
    pub max_repairs: u32,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Speech-to-text settings.
    #[serde(default)]
    pub transcription: TranscriptionConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: default_backend_name(),
            provider: ProviderKind::Ollama,
            endpoint: default_ollama_url(),
            api_key: default_ollama_key(),
            model: default_model(),
            vision_model: None,
            vision_endpoint: None,
            vision_api_key: None,
            max_completion_tokens: default_max_completion_tokens(),
            vision_max_tokens: default_vision_max_tokens(),
            extraction_mode: ExtractionMode::JsonMode,
            max_repairs: default_max_repairs(),
            request_timeout_secs: default_request_timeout(),
            transcription: TranscriptionConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Minimal config for an endpoint/key/model triple.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: ApiKey::new(api_key),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Set explicit vision settings.
    #[must_use]
    pub fn with_vision(
        mut self,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        self.vision_model = Some(model.into());
        self.vision_endpoint = Some(endpoint.into());
        self.vision_api_key = Some(ApiKey::new(api_key));
        self
    }

    /// Set the extraction mode.
    #[must_use]
    pub fn with_extraction_mode(mut self, mode: ExtractionMode) -> Self {
        self.extraction_mode = mode;
        self
    }

    /// Resolved vision model.
    #[must_use]
    pub fn vision_model(&self) -> &str {
        non_empty(self.vision_model.as_deref()).unwrap_or(&self.model)
    }

    /// Resolved vision endpoint.
    #[must_use]
    pub fn vision_endpoint(&self) -> &str {
        non_empty(self.vision_endpoint.as_deref()).unwrap_or(&self.endpoint)
    }

    /// Resolved vision API key.
    #[must_use]
    pub fn vision_api_key(&self) -> &ApiKey {
        match &self.vision_api_key {
            Some(key) if !key.is_empty() => key,
            _ => &self.api_key,
        }
    }

    /// Whether vision requests go somewhere other than the primary client.
    #[must_use]
    pub fn has_distinct_vision(&self) -> bool {
        self.vision_model() != self.model
            || self.vision_endpoint() != self.endpoint
            || self.vision_api_key() != &self.api_key
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Backoff settings for one operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Total time budget across attempts, seconds.
    #[serde(default = "default_128")]
    pub deadline_secs: f64,
    /// First backoff delay, seconds.
    #[serde(default = "default_8")]
    pub base_delay_secs: f64,
    /// Ceiling for a single delay, seconds.
    #[serde(default = "default_128")]
    pub max_delay_secs: f64,
    /// Upper bound of the random jitter added to each delay, seconds.
    #[serde(default = "default_1_0")]
    pub jitter_secs: f64,
}

impl BackoffConfig {
    fn with_base(base_delay_secs: f64) -> Self {
        Self {
            deadline_secs: 128.0,
            base_delay_secs,
            max_delay_secs: 128.0,
            jitter_secs: 1.0,
        }
    }
}

/// Retry tuning, one entry per adapter operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Structured completion.
    #[serde(default = "default_structured_backoff")]
    pub structured: BackoffConfig,
    /// Audio transcription.
    #[serde(default = "default_structured_backoff")]
    pub audio: BackoffConfig,
    /// Image transcription.
    #[serde(default = "default_image_backoff")]
    pub image: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            structured: default_structured_backoff(),
            audio: default_structured_backoff(),
            image: default_image_backoff(),
        }
    }
}

/// Shared outbound request budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// When false the limiter only counts, never waits.
    #[serde(default)]
    pub enabled: bool,
    /// Max requests in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Max requests started per interval.
    #[serde(default = "default_requests_per_interval")]
    pub requests_per_interval: u32,
    /// Interval length, seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent: default_max_concurrent(),
            requests_per_interval: default_requests_per_interval(),
            interval_secs: default_interval(),
        }
    }
}

/// Which override failures fall back to the default backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackScope {
    /// Any error on the override path falls back.
    #[default]
    AnyError,
    /// Only transient/connectivity errors (and client construction) fall back.
    Transient,
}

/// Override routing settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    /// Fallback scope for override failures.
    #[serde(default)]
    pub fallback: FallbackScope,
}

/// Prompt file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Directory holding prompt templates.
    #[serde(default = "default_prompt_dir")]
    pub directory: String,
    /// Template used by `summarize_text` when none is given.
    #[serde(default = "default_summary_prompt")]
    pub summary_prompt: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            directory: default_prompt_dir(),
            summary_prompt: default_summary_prompt(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_string()
}
fn default_backend_name() -> String {
    "ollama".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_ollama_key() -> ApiKey {
    ApiKey::new("ollama")
}
fn default_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_max_completion_tokens() -> u32 {
    16_384
}
fn default_vision_max_tokens() -> u32 {
    300
}
fn default_max_repairs() -> u32 {
    2
}
fn default_request_timeout() -> u64 {
    120
}
fn default_whisper() -> String {
    "whisper-1".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_128() -> f64 {
    128.0
}
fn default_8() -> f64 {
    8.0
}
fn default_1_0() -> f64 {
    1.0
}
fn default_structured_backoff() -> BackoffConfig {
    BackoffConfig::with_base(8.0)
}
fn default_image_backoff() -> BackoffConfig {
    BackoffConfig::with_base(2.0)
}
fn default_max_concurrent() -> usize {
    16
}
fn default_requests_per_interval() -> u32 {
    60
}
fn default_interval() -> u64 {
    60
}
fn default_prompt_dir() -> String {
    "prompts".to_string()
}
fn default_summary_prompt() -> String {
    "summarize_search_results.txt".to_string()
}
