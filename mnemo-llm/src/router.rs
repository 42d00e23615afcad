//! Runtime override routing.
//!
//! When `SEARCH_LLM_MODEL`, `SEARCH_LLM_ENDPOINT` and `SEARCH_LLM_API_KEY` are
//! all set, structured completions go to that backend first through an
//! ephemeral [`SchemaClient`]. If the override fails, the failure is logged
//! once and the same request is sent to the default backend.
//!
//! The environment is read through [`EnvSource`], fresh on every call, so
//! tests can route with a plain `HashMap`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{LlmBackend, SchemaClient};
use crate::config::{ApiKey, FallbackScope};
use crate::error::{LlmError, Result};
use crate::ratelimit::RateLimiter;
use crate::shape::StructuredResult;
use crate::types::CompletionRequest;

/// Override model variable.
pub const ENV_MODEL: &str = "SEARCH_LLM_MODEL";
/// Override endpoint variable.
pub const ENV_ENDPOINT: &str = "SEARCH_LLM_ENDPOINT";
/// Override API key variable.
pub const ENV_API_KEY: &str = "SEARCH_LLM_API_KEY";

/// Read-only view of environment variables.
pub trait EnvSource: Send + Sync {
    /// Value of `key`, if set.
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// A complete override triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideConfig {
    /// Model identifier.
    pub model: String,
    /// Base URL.
    pub endpoint: String,
    /// Credentials.
    pub api_key: ApiKey,
}

impl OverrideConfig {
    /// Resolve the override from `env`. `None` unless all three variables
    /// are non-blank.
    #[must_use]
    pub fn resolve(env: &dyn EnvSource) -> Option<Self> {
        let get = |key: &str| {
            env.var(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Some(Self {
            model: get(ENV_MODEL)?,
            endpoint: get(ENV_ENDPOINT)?,
            api_key: ApiKey::new(get(ENV_API_KEY)?),
        })
    }
}

/// Anything that went wrong on the override path. Never returned to callers
/// of [`OverrideRouter::route_completion`] when it falls back.
#[derive(Debug, Error)]
pub enum OverrideError {
    /// The client could not be constructed.
    #[error("override client for '{model}' could not be built: {source}")]
    Build {
        /// Override model.
        model: String,
        /// Cause.
        source: LlmError,
    },
    /// The completion call failed.
    #[error("override completion on '{model}' failed: {source}")]
    Call {
        /// Override model.
        model: String,
        /// Cause.
        source: LlmError,
    },
}

impl OverrideError {
    /// Whether this failure falls back under `scope`.
    #[must_use]
    pub fn falls_back(&self, scope: FallbackScope) -> bool {
        match (scope, self) {
            (FallbackScope::AnyError, _) | (FallbackScope::Transient, Self::Build { .. }) => true,
            (FallbackScope::Transient, Self::Call { source, .. }) => source.is_transient(),
        }
    }

    /// The underlying error.
    #[must_use]
    pub fn into_inner(self) -> LlmError {
        match self {
            Self::Build { source, .. } | Self::Call { source, .. } => source,
        }
    }
}

/// Recover from an override failure by running `default`.
///
/// Emits exactly one warning when it falls back. Failures outside `scope`
/// surface as their underlying [`LlmError`].
///
/// # Errors
/// Returns the default path's error, or the override error when it is
/// outside `scope`.
pub async fn fallback<T, F, Fut>(
    attempt: std::result::Result<T, OverrideError>,
    scope: FallbackScope,
    default: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match attempt {
        Ok(value) => Ok(value),
        Err(err) if err.falls_back(scope) => {
            warn!(error = %err, "LLM override failed, falling back to default backend");
            default().await
        }
        Err(err) => Err(err.into_inner()),
    }
}

/// Builds override clients.
pub trait OverrideClientFactory: Send + Sync {
    /// Construct a backend for `config`.
    ///
    /// # Errors
    /// Returns an error if the configuration is unusable.
    fn build(&self, config: &OverrideConfig) -> Result<Arc<dyn LlmBackend>>;
}

/// Per-request timeout for override calls when none is configured.
pub const DEFAULT_OVERRIDE_TIMEOUT: Duration = Duration::from_secs(120);

/// Connect timeout for override calls.
pub const OVERRIDE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds [`SchemaClient`]s sharing one HTTP connection pool and limiter.
#[derive(Debug, Clone)]
pub struct HttpOverrideFactory {
    http: Client,
    limiter: Arc<RateLimiter>,
}

impl HttpOverrideFactory {
    /// Factory over `http` and `limiter`. `http` should carry its own
    /// timeouts; the override path has no retry deadline.
    #[must_use]
    pub fn new(http: Client, limiter: Arc<RateLimiter>) -> Self {
        Self { http, limiter }
    }

    /// Factory whose requests give up after `timeout` (connecting after at
    /// most [`OVERRIDE_CONNECT_TIMEOUT`]).
    ///
    /// # Errors
    /// Returns `LlmError::Config` if the HTTP client cannot be built.
    pub fn bounded(timeout: Duration, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(OVERRIDE_CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| LlmError::Config(format!("override HTTP client: {e}")))?;
        Ok(Self::new(http, limiter))
    }
}

impl Default for HttpOverrideFactory {
    fn default() -> Self {
        let limiter = RateLimiter::global();
        Self::bounded(DEFAULT_OVERRIDE_TIMEOUT, Arc::clone(&limiter)).unwrap_or_else(|err| {
            warn!(error = %err, "bounded override client unavailable, using defaults");
            Self::new(Client::default(), limiter)
        })
    }
}

impl OverrideClientFactory for HttpOverrideFactory {
    fn build(&self, config: &OverrideConfig) -> Result<Arc<dyn LlmBackend>> {
        let client = SchemaClient::new(config, self.http.clone(), Arc::clone(&self.limiter))?;
        Ok(Arc::new(client))
    }
}

/// Sends structured completions to the override backend when one is
/// configured, otherwise (or on failure) to the default backend.
pub struct OverrideRouter {
    default: Arc<dyn LlmBackend>,
    factory: Arc<dyn OverrideClientFactory>,
    scope: FallbackScope,
}

impl OverrideRouter {
    /// Router over `default` with the HTTP override factory.
    #[must_use]
    pub fn new(default: Arc<dyn LlmBackend>) -> Self {
        Self {
            default,
            factory: Arc::new(HttpOverrideFactory::default()),
            scope: FallbackScope::default(),
        }
    }

    /// Use a different override factory.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn OverrideClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Set which override failures fall back.
    #[must_use]
    pub fn with_scope(mut self, scope: FallbackScope) -> Self {
        self.scope = scope;
        self
    }

    /// The default backend.
    #[must_use]
    pub fn default_backend(&self) -> &Arc<dyn LlmBackend> {
        &self.default
    }

    /// Route one structured completion.
    ///
    /// # Errors
    /// Returns the default backend's error, or an override error outside the
    /// fallback scope.
    pub async fn route_completion(
        &self,
        request: &CompletionRequest,
        env: &dyn EnvSource,
    ) -> Result<StructuredResult> {
        let Some(config) = OverrideConfig::resolve(env) else {
            return self.default.structured_completion(request).await;
        };
        debug!(model = %config.model, endpoint = %config.endpoint, "LLM override active");
        let attempt = self.try_override(&config, request).await;
        fallback(attempt, self.scope, || self.default.structured_completion(request)).await
    }

    async fn try_override(
        &self,
        config: &OverrideConfig,
        request: &CompletionRequest,
    ) -> std::result::Result<StructuredResult, OverrideError> {
        let client = self.factory.build(config).map_err(|source| OverrideError::Build {
            model: config.model.clone(),
            source,
        })?;
        client
            .structured_completion(request)
            .await
            .map_err(|source| OverrideError::Call {
                model: config.model.clone(),
                source,
            })
    }
}
