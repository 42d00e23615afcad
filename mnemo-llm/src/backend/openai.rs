//! Default adapter over an OpenAI-compatible API (Ollama `/v1`, OpenAI,
//! OpenRouter, llama.cpp server).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::LlmBackend;
use super::chat::{ChatEndpoint, message_content};
use super::provider::{self, ProviderTarget};
use crate::config::{BackendConfig, ExtractionMode, RetryConfig};
use crate::error::{LlmError, Result};
use crate::files::{FileSource, LocalFiles};
use crate::ratelimit::RateLimiter;
use crate::retry::{GateClock, RetryPolicy, retry_gated};
use crate::shape::{DescribeShape, ExternalSchema, SchemaDialect, StructuredResult, TargetShape, extract_json};
use crate::types::{CompletionRequest, merge_extra};

const IMAGE_QUESTION: &str = "What's in this image?";
const NO_TRANSCRIPT: &str = "Transcription failed. No text returned.";

/// Retry policy per adapter operation.
#[derive(Debug, Clone, Copy)]
struct Policies {
    structured: RetryPolicy,
    audio: RetryPolicy,
    image: RetryPolicy,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            structured: RetryPolicy::standard(),
            audio: RetryPolicy::standard(),
            image: RetryPolicy::quick(),
        }
    }
}

/// The default backend adapter.
///
/// Built once from a [`BackendConfig`]; every call goes through the shared
/// [`RateLimiter`] and is wrapped in its operation's [`RetryPolicy`].
pub struct OpenAiAdapter {
    config: BackendConfig,
    http: Client,
    chat: ChatEndpoint,
    vision: Option<ProviderTarget>,
    limiter: Arc<RateLimiter>,
    files: Arc<dyn FileSource>,
    policies: Policies,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("name", &self.config.name)
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .field("distinct_vision", &self.vision.is_some())
            .finish_non_exhaustive()
    }
}

impl OpenAiAdapter {
    /// Build an adapter using the global limiter, local files and default
    /// retry policies.
    ///
    /// # Errors
    /// Returns `LlmError::Config` if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LlmError::Config(format!("HTTP client: {e}")))?;
        let endpoint = if config.endpoint.trim().is_empty() {
            config.provider.default_endpoint().to_string()
        } else {
            config.endpoint.clone()
        };
        let chat = ChatEndpoint::new(http.clone(), endpoint, config.api_key.clone());
        let vision = config.has_distinct_vision().then(|| {
            ProviderTarget::resolve(
                config.vision_model(),
                Some(config.vision_endpoint()),
                config.vision_api_key().clone(),
            )
        });
        Ok(Self {
            config,
            http,
            chat,
            vision,
            limiter: RateLimiter::global(),
            files: Arc::new(LocalFiles),
            policies: Policies::default(),
        })
    }

    /// Use a specific limiter instead of the global one.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Use a specific file reader.
    #[must_use]
    pub fn with_files(mut self, files: Arc<dyn FileSource>) -> Self {
        self.files = files;
        self
    }

    /// Take retry tuning from config.
    #[must_use]
    pub fn with_retry(mut self, retry: &RetryConfig) -> Self {
        self.policies = Policies {
            structured: RetryPolicy::from_config(&retry.structured),
            audio: RetryPolicy::from_config(&retry.audio),
            image: RetryPolicy::from_config(&retry.image),
        };
        self
    }

    /// Use one policy for every operation.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policies = Policies {
            structured: policy,
            audio: policy,
            image: policy,
        };
        self
    }

    /// The adapter's configuration.
    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The limiter this adapter acquires.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    // -----------------------------------------------------------------
    // Structured completion
    // -----------------------------------------------------------------

    fn system_message(&self, request: &CompletionRequest) -> String {
        if request.shape.is_plain_text() || self.config.extraction_mode == ExtractionMode::JsonSchemaMode {
            return request.system_prompt.clone();
        }
        match request.shape.describe_for(SchemaDialect::PromptInstructions) {
            ExternalSchema::Instructions(text) if !text.is_empty() => {
                if request.system_prompt.is_empty() {
                    text
                } else {
                    format!("{}\n\n{text}", request.system_prompt)
                }
            }
            _ => request.system_prompt.clone(),
        }
    }

    fn response_format(&self, shape: &TargetShape) -> Option<Value> {
        if shape.is_plain_text() {
            return None;
        }
        match self.config.extraction_mode {
            ExtractionMode::JsonMode => Some(json!({ "type": "json_object" })),
            ExtractionMode::JsonSchemaMode => match shape.describe_for(SchemaDialect::JsonSchema) {
                ExternalSchema::JsonSchema { name, schema } => Some(json!({
                    "type": "json_schema",
                    "json_schema": { "name": name, "schema": schema, "strict": true },
                })),
                ExternalSchema::Instructions(_) => None,
            },
            ExtractionMode::MdJson => None,
        }
    }

    fn request_body(&self, messages: &[Value], request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_completion_tokens,
        });
        if let Some(format) = self.response_format(&request.shape) {
            body["response_format"] = format;
        }
        merge_extra(&mut body, &request.extra);
        body
    }

    /// One structured completion, including repair round trips.
    async fn complete_once(&self, request: &CompletionRequest, gate: GateClock) -> Result<StructuredResult> {
        let mut messages = vec![
            json!({ "role": "user", "content": request.text_input }),
            json!({ "role": "system", "content": self.system_message(request) }),
        ];

        let mut round: u32 = 0;
        loop {
            let body = self.request_body(&messages, request);
            debug!(
                backend = %self.config.name,
                model = %self.config.model,
                shape = request.shape.name(),
                round,
                "sending structured completion"
            );
            let reply = self
                .chat
                .post_json(&self.limiter, &gate, "chat/completions", &body)
                .await?;
            let content = message_content(&reply)?;

            if request.shape.is_plain_text() {
                return Ok(StructuredResult::Text(content));
            }

            match parse_structured(&content, &request.shape) {
                Ok(result) => return Ok(result),
                Err(err) if round < self.config.max_repairs => {
                    warn!(
                        backend = %self.config.name,
                        shape = request.shape.name(),
                        round,
                        error = %err,
                        "reply failed validation, asking the model to repair it"
                    );
                    messages.push(json!({ "role": "assistant", "content": content }));
                    messages.push(json!({
                        "role": "user",
                        "content": format!(
                            "Recall the function correctly, fix the errors and return valid JSON:\n{err}"
                        ),
                    }));
                    round += 1;
                }
                Err(err) => {
                    return Err(LlmError::ContractViolation(format!(
                        "reply for '{}' still invalid after {} repairs: {err}",
                        request.shape.name(),
                        self.config.max_repairs
                    )));
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Transcription
    // -----------------------------------------------------------------

    async fn transcribe_audio_once(&self, file_name: &str, bytes: &[u8], gate: GateClock) -> Result<String> {
        let part = Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
        let form = Form::new()
            .part("file", part)
            .text("model", self.config.transcription.model.clone())
            .text("language", self.config.transcription.language.clone());
        let reply = self
            .chat
            .post_multipart(&self.limiter, &gate, "audio/transcriptions", form)
            .await?;
        reply
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LlmError::ContractViolation(NO_TRANSCRIPT.into()))
    }

    async fn transcribe_image_once(&self, data_url: &str, gate: GateClock) -> Result<String> {
        let messages = json!([{
            "role": "user",
            "content": [
                { "type": "text", "text": IMAGE_QUESTION },
                { "type": "image_url", "image_url": { "url": data_url } },
            ],
        }]);

        let reply = match &self.vision {
            Some(target) => {
                provider::completion(
                    &self.http,
                    &self.limiter,
                    &gate,
                    target,
                    messages,
                    self.config.vision_max_tokens,
                    &Map::new(),
                )
                .await?
            }
            None => {
                let body = json!({
                    "model": self.config.vision_model(),
                    "messages": messages,
                    "max_tokens": self.config.vision_max_tokens,
                });
                self.chat
                    .post_json(&self.limiter, &gate, "chat/completions", &body)
                    .await?
            }
        };
        message_content(&reply)
    }
}

/// Parse and validate a structured reply.
fn parse_structured(content: &str, shape: &TargetShape) -> Result<StructuredResult> {
    let raw = extract_json(content)
        .ok_or_else(|| LlmError::ContractViolation("reply contains no JSON object".into()))?;
    let value: Value =
        serde_json::from_str(raw).map_err(|e| LlmError::ContractViolation(format!("invalid JSON: {e}")))?;
    shape.validate(value)
}

#[async_trait]
impl LlmBackend for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn structured_completion(&self, request: &CompletionRequest) -> Result<StructuredResult> {
        retry_gated(&self.policies.structured, "structured_completion", |gate| {
            self.complete_once(request, gate)
        })
        .await
    }

    async fn transcribe_audio(&self, path: &Path) -> Result<String> {
        let bytes = self.files.read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();
        retry_gated(&self.policies.audio, "transcribe_audio", |gate| {
            self.transcribe_audio_once(&file_name, &bytes, gate)
        })
        .await
    }

    async fn transcribe_image(&self, path: &Path) -> Result<String> {
        let bytes = self.files.read(path).await?;
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(&bytes));
        retry_gated(&self.policies.image, "transcribe_image", |gate| {
            self.transcribe_image_once(&data_url, gate)
        })
        .await
    }
}
