//! Ephemeral structured-output client for a runtime override backend.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::LlmBackend;
use super::chat::{ChatEndpoint, message_content};
use crate::error::{LlmError, Result};
use crate::ratelimit::RateLimiter;
use crate::retry::GateClock;
use crate::router::OverrideConfig;
use crate::shape::{DescribeShape, ExternalSchema, SchemaDialect, StructuredResult, extract_json};
use crate::types::{CompletionRequest, merge_extra};

/// A client built for one override call. Always asks for `json_schema`
/// output; plain text travels as `{"text": ...}` and is unwrapped.
#[derive(Debug)]
pub struct SchemaClient {
    model: String,
    chat: ChatEndpoint,
    limiter: Arc<RateLimiter>,
}

impl SchemaClient {
    /// Build a client for `config`.
    ///
    /// # Errors
    /// Returns `LlmError::Config` if the endpoint is not an absolute http(s)
    /// URL or the HTTP client cannot be built.
    pub fn new(config: &OverrideConfig, http: Client, limiter: Arc<RateLimiter>) -> Result<Self> {
        let parsed = url::Url::parse(&config.endpoint)
            .map_err(|e| LlmError::Config(format!("override endpoint '{}': {e}", config.endpoint)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LlmError::Config(format!(
                "override endpoint '{}' must be http or https",
                config.endpoint
            )));
        }
        Ok(Self {
            model: config.model.clone(),
            chat: ChatEndpoint::new(http, config.endpoint.clone(), config.api_key.clone()),
            limiter,
        })
    }

    /// Model this client targets.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": request.text_input },
                { "role": "system", "content": request.system_prompt },
            ],
        });
        if let ExternalSchema::JsonSchema { name, schema } = request.shape.describe_for(SchemaDialect::JsonSchema) {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true },
            });
        }
        merge_extra(&mut body, &request.extra);
        body
    }
}

#[async_trait]
impl LlmBackend for SchemaClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn structured_completion(&self, request: &CompletionRequest) -> Result<StructuredResult> {
        let body = self.request_body(request);
        debug!(model = %self.model, endpoint = %self.chat.base_url(), shape = request.shape.name(), "override completion");
        let reply = self
            .chat
            .post_json(&self.limiter, &GateClock::default(), "chat/completions", &body)
            .await?;
        let content = message_content(&reply)?;
        let raw = extract_json(&content)
            .ok_or_else(|| LlmError::ContractViolation("override reply contains no JSON object".into()))?;
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| LlmError::ContractViolation(format!("override reply is not valid JSON: {e}")))?;
        request.shape.validate(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKey;
    use crate::shape::{Field, FieldKind, Schema};

    fn override_config(endpoint: &str) -> OverrideConfig {
        OverrideConfig {
            model: "gpt-4o-mini".into(),
            endpoint: endpoint.into(),
            api_key: ApiKey::new("sk-test"),
        }
    }

    fn client() -> SchemaClient {
        SchemaClient::new(
            &override_config("https://api.openai.com/v1"),
            Client::new(),
            Arc::new(RateLimiter::unlimited()),
        )
        .expect("valid override")
    }

    #[test]
    fn rejects_malformed_endpoints() {
        let limiter = Arc::new(RateLimiter::unlimited());
        for bad in ["not a url", "ftp://host/v1", "/relative/v1"] {
            let err = SchemaClient::new(&override_config(bad), Client::new(), Arc::clone(&limiter))
                .expect_err("invalid endpoint");
            assert!(matches!(err, LlmError::Config(_)), "{bad}");
        }
    }

    #[test]
    fn plain_text_requested_as_text_object() {
        let body = client().request_body(&CompletionRequest::new("What is 2+2?", "Be brief."));
        let format = &body["response_format"];
        assert_eq!(format["type"], json!("json_schema"));
        assert_eq!(format["json_schema"]["name"], json!("ResponseModel"));
        assert_eq!(format["json_schema"]["schema"]["required"], json!(["text"]));
        assert_eq!(body["messages"][0]["role"], json!("user"));
        assert_eq!(body["messages"][1]["role"], json!("system"));
    }

    #[test]
    fn structured_shape_uses_its_schema() {
        let schema = Schema::object("Answer").field(Field::new("answer", FieldKind::Integer));
        let request = CompletionRequest::new("q", "s").with_shape(schema);
        let body = client().request_body(&request);
        assert_eq!(body["response_format"]["json_schema"]["name"], json!("Answer"));
        assert!(body["response_format"]["json_schema"]["schema"]["properties"]["answer"].is_object());
    }
}
