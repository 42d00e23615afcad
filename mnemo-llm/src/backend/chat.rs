//! OpenAI-compatible HTTP plumbing shared by every backend.

use reqwest::header::RETRY_AFTER;
use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::config::ApiKey;
use crate::error::{LlmError, Result};
use crate::ratelimit::RateLimiter;
use crate::retry::GateClock;

/// A base URL plus credentials.
#[derive(Debug, Clone)]
pub struct ChatEndpoint {
    http: Client,
    base_url: String,
    api_key: ApiKey,
}

impl ChatEndpoint {
    /// Wrap an HTTP client with a base URL and key.
    pub fn new(http: Client, base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Base URL as configured.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(self.api_key.expose())
        }
    }

    /// POST a JSON body and decode the JSON reply, holding a limiter permit
    /// until the body has been read. `gate` is marked once the permit is
    /// granted.
    ///
    /// # Errors
    /// Maps HTTP failures through [`LlmError::from_status`]; a non-JSON
    /// success body is a `ContractViolation`.
    pub async fn post_json(
        &self,
        limiter: &RateLimiter,
        gate: &GateClock,
        path: &str,
        body: &Value,
    ) -> Result<Value> {
        let _permit = limiter.acquire().await?;
        gate.mark();
        let response = self
            .authorized(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    /// POST a multipart form and decode the JSON reply.
    ///
    /// # Errors
    /// Same as [`ChatEndpoint::post_json`].
    pub async fn post_multipart(
        &self,
        limiter: &RateLimiter,
        gate: &GateClock,
        path: &str,
        form: Form,
    ) -> Result<Value> {
        let _permit = limiter.acquire().await?;
        gate.mark();
        let response = self
            .authorized(self.http.post(self.url(path)))
            .multipart(form)
            .send()
            .await?;
        read_json(response).await
    }
}

async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::from_status(status.as_u16(), &body, retry_after));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| LlmError::ContractViolation(format!("response body is not JSON: {e}")))
}

/// Text of `choices[0].message.content`.
///
/// # Errors
/// Returns `LlmError::ContractViolation` if the reply has no text content.
pub fn message_content(reply: &Value) -> Result<String> {
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::ContractViolation("completion reply has no message content".into()))
}
