//! Completion service: prompt assembly, history folding and dispatch.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{LlmBackend, OpenAiAdapter};
use crate::config::MnemoConfig;
use crate::error::Result;
use crate::prompt::{DirectoryPrompts, PromptRenderer};
use crate::ratelimit::RateLimiter;
use crate::router::{EnvSource, HttpOverrideFactory, OverrideRouter, ProcessEnv};
use crate::shape::{StructuredResult, TargetShape};
use crate::types::CompletionRequest;

/// Inputs to [`CompletionService::generate_completion`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    /// The user's question.
    pub query: String,
    /// Retrieved context for the question.
    pub context: String,
    /// Template rendered with `question` and `context`.
    pub user_prompt_path: String,
    /// Named system prompt, used unless `system_prompt` is set.
    pub system_prompt_path: String,
    /// Explicit system prompt.
    pub system_prompt: Option<String>,
    /// Earlier turns of the conversation, prepended to the system prompt.
    pub conversation_history: Option<String>,
    /// Result shape.
    pub shape: TargetShape,
}

impl CompletionParams {
    /// Plain-text params with no history or explicit system prompt.
    pub fn new(
        query: impl Into<String>,
        context: impl Into<String>,
        user_prompt_path: impl Into<String>,
        system_prompt_path: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            context: context.into(),
            user_prompt_path: user_prompt_path.into(),
            system_prompt_path: system_prompt_path.into(),
            system_prompt: None,
            conversation_history: None,
            shape: TargetShape::PlainText,
        }
    }

    /// Use `system_prompt` instead of the named system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Fold earlier conversation turns into the system prompt.
    #[must_use]
    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.conversation_history = Some(history.into());
        self
    }

    /// Ask for a structured result instead of plain text.
    #[must_use]
    pub fn with_shape(mut self, shape: impl Into<TargetShape>) -> Self {
        self.shape = shape.into();
        self
    }
}

/// Fold earlier conversation into the system prompt.
#[must_use]
pub fn fold_history(history: Option<&str>, system_prompt: &str) -> String {
    match history {
        Some(history) if !history.is_empty() => format!("{history}\nTASK:{system_prompt}"),
        _ => system_prompt.to_string(),
    }
}

/// Entry point for answer generation and summarisation.
pub struct CompletionService {
    router: OverrideRouter,
    prompts: Arc<dyn PromptRenderer>,
    env: Arc<dyn EnvSource>,
    summary_prompt: String,
}

impl CompletionService {
    /// Service over `router` and `prompts`, reading overrides from the
    /// process environment.
    #[must_use]
    pub fn new(router: OverrideRouter, prompts: Arc<dyn PromptRenderer>) -> Self {
        Self {
            router,
            prompts,
            env: Arc::new(ProcessEnv),
            summary_prompt: crate::config::PromptConfig::default().summary_prompt,
        }
    }

    /// Wire the full stack from configuration: global limiter, default
    /// adapter, override router and prompt directory.
    ///
    /// # Errors
    /// Returns `LlmError::Config` if the default adapter cannot be built.
    pub fn from_config(config: &MnemoConfig) -> Result<Self> {
        if !RateLimiter::install_global(&config.rate_limit) {
            debug!("global rate limiter already installed, keeping it");
        }
        let limiter = RateLimiter::global();
        let adapter = OpenAiAdapter::new(config.backend.clone())?
            .with_limiter(Arc::clone(&limiter))
            .with_retry(&config.retry);
        info!(
            backend = %config.backend.name,
            model = %config.backend.model,
            endpoint = %config.backend.endpoint,
            rate_limited = limiter.is_enabled(),
            "completion service ready"
        );
        let router = OverrideRouter::new(Arc::new(adapter))
            .with_factory(Arc::new(HttpOverrideFactory::bounded(
                config.backend.request_timeout(),
                limiter,
            )?))
            .with_scope(config.router.fallback);
        Ok(Self::new(router, Arc::new(DirectoryPrompts::new(&config.prompts.directory)))
            .with_summary_prompt(config.prompts.summary_prompt.clone()))
    }

    /// Read overrides from `env` instead of the process environment.
    #[must_use]
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    /// Default template for [`CompletionService::summarize_text`].
    #[must_use]
    pub fn with_summary_prompt(mut self, name: impl Into<String>) -> Self {
        self.summary_prompt = name.into();
        self
    }

    /// The default backend.
    #[must_use]
    pub fn default_backend(&self) -> &Arc<dyn LlmBackend> {
        self.router.default_backend()
    }

    /// Answer `params.query` from `params.context`.
    ///
    /// # Errors
    /// Returns prompt errors, or the routed backend's error.
    pub async fn generate_completion(&self, params: CompletionParams) -> Result<StructuredResult> {
        let user_prompt = self
            .prompts
            .render(
                &params.user_prompt_path,
                &[("question", &params.query), ("context", &params.context)],
            )
            .await?;
        let system_prompt = match params.system_prompt.as_deref() {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ => self.prompts.read_named(&params.system_prompt_path).await?,
        };
        let system_prompt = fold_history(params.conversation_history.as_deref(), &system_prompt);

        let request = CompletionRequest::new(user_prompt, system_prompt).with_shape(params.shape);
        self.router.route_completion(&request, self.env.as_ref()).await
    }

    /// Summarise `text` as plain text on the default backend.
    ///
    /// # Errors
    /// Returns prompt errors, or the default backend's error.
    pub async fn summarize_text(
        &self,
        text: &str,
        prompt_path: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<String> {
        let system_prompt = match system_prompt {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ => self.prompts.read_named(prompt_path.unwrap_or(&self.summary_prompt)).await?,
        };
        let request = CompletionRequest::new(text, system_prompt);
        self.default_backend()
            .structured_completion(&request)
            .await?
            .into_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_folded_before_task() {
        assert_eq!(
            fold_history(Some("user: hi\nassistant: hello"), "Answer briefly."),
            "user: hi\nassistant: hello\nTASK:Answer briefly."
        );
    }

    #[test]
    fn empty_history_leaves_prompt_alone() {
        assert_eq!(fold_history(None, "sys"), "sys");
        assert_eq!(fold_history(Some(""), "sys"), "sys");
    }

    #[test]
    fn builds_from_default_config() {
        let service = CompletionService::from_config(&MnemoConfig::default()).expect("service");
        assert_eq!(service.default_backend().name(), "ollama");
        assert_eq!(service.summary_prompt, "summarize_search_results.txt");
    }

    #[test]
    fn params_default_to_plain_text() {
        let params = CompletionParams::new("q", "c", "context_for_question.txt", "answer_simple_question.txt");
        assert!(params.shape.is_plain_text());
        assert!(params.system_prompt.is_none());
    }
}
