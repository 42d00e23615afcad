//! Multi-provider completion path.
//!
//! Model identifiers may carry a provider prefix (`openrouter/google/gemini-flash-1.5`,
//! `ollama/llava`, `openai/gpt-4o-mini`). The prefix picks the default base URL
//! and is stripped before the model name goes on the wire. An explicit
//! endpoint always wins over the provider default.

use reqwest::Client;
use serde_json::{Value, json};

use super::chat::ChatEndpoint;
use crate::config::{ApiKey, ProviderKind};
use crate::error::Result;
use crate::ratelimit::RateLimiter;
use crate::retry::GateClock;
use crate::types::merge_extra;

impl ProviderKind {
    /// Base URL used when no endpoint is configured.
    #[must_use]
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }
}

/// Split a provider prefix off a model identifier.
#[must_use]
pub fn split_model(model: &str) -> (ProviderKind, &str) {
    let prefixes: [(&str, ProviderKind); 5] = [
        ("openrouter/", ProviderKind::OpenRouter),
        ("ollama_chat/", ProviderKind::Ollama),
        ("ollama/", ProviderKind::Ollama),
        ("openai/", ProviderKind::OpenAi),
        ("custom_openai/", ProviderKind::OpenAi),
    ];
    for (prefix, kind) in prefixes {
        if let Some(rest) = model.strip_prefix(prefix) {
            return (kind, rest);
        }
    }
    (ProviderKind::OpenAi, model)
}

/// Where a provider-routed request goes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTarget {
    /// Resolved provider.
    pub provider: ProviderKind,
    /// Model name sent to the API (prefix stripped).
    pub model: String,
    /// Base URL.
    pub endpoint: String,
    /// Credentials.
    pub api_key: ApiKey,
}

impl ProviderTarget {
    /// Resolve a model identifier, optional endpoint and key.
    #[must_use]
    pub fn resolve(model: &str, endpoint: Option<&str>, api_key: ApiKey) -> Self {
        let (provider, bare) = split_model(model);
        let endpoint = endpoint
            .filter(|e| !e.trim().is_empty())
            .map_or_else(|| provider.default_endpoint().to_string(), str::to_string);
        Self {
            provider,
            model: bare.to_string(),
            endpoint,
            api_key,
        }
    }
}

/// Send a chat completion to a provider-routed target.
///
/// # Errors
/// Propagates transport and status errors from [`ChatEndpoint::post_json`].
pub async fn completion(
    http: &Client,
    limiter: &RateLimiter,
    gate: &GateClock,
    target: &ProviderTarget,
    messages: Value,
    max_tokens: u32,
    extra: &serde_json::Map<String, Value>,
) -> Result<Value> {
    let endpoint = ChatEndpoint::new(http.clone(), target.endpoint.clone(), target.api_key.clone());
    let mut body = json!({
        "model": target.model,
        "messages": messages,
        "max_tokens": max_tokens,
    });
    merge_extra(&mut body, extra);
    tracing::debug!(
        provider = ?target.provider,
        model = %target.model,
        endpoint = %target.endpoint,
        "provider-routed completion"
    );
    endpoint.post_json(limiter, gate, "chat/completions", &body).await
}
