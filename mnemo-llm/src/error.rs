//! LLM error types and failure classification.

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The model or resource does not exist (HTTP 404, missing input file).
    #[error("Resource not found: {resource}")]
    NotFound {
        /// What was missing (model name, path, URL).
        resource: String,
    },

    /// The backend rejected the request because of its rate limit.
    #[error("Rate limited by backend (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Seconds until the limit resets, if the backend said so.
        retry_after_secs: Option<u64>,
    },

    /// The backend answered with a 5xx status.
    #[error("Backend server error (HTTP {status}): {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// HTTP request failed for any other reason.
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// Request timed out.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// LLM provider is unreachable.
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    /// The backend answered successfully but the reply lacks the expected
    /// structure (no transcript, no content, schema mismatch).
    #[error("Backend contract violation: {0}")]
    ContractViolation(String),

    /// Prompt template could not be loaded or rendered.
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// The backend does not implement this operation.
    #[error("Operation not supported by backend '{backend}': {operation}")]
    Unsupported {
        /// Backend name.
        backend: String,
        /// Operation name.
        operation: &'static str,
    },

    /// Configuration error.
    #[error("LLM configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse failure classes used by retry and fallback decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Deterministic miss; resending cannot help.
    NotFound,
    /// Rate limits, network errors, 5xx. Worth retrying.
    Transient,
    /// The backend replied but broke the response contract.
    ContractViolation,
    /// Caller-side problem (bad config, prompt, unsupported operation).
    Caller,
}

impl LlmError {
    /// Shorthand for a [`LlmError::NotFound`].
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::RateLimited { .. }
            | Self::Server { .. }
            | Self::RequestFailed(_)
            | Self::Timeout(_)
            | Self::Unavailable(_) => ErrorClass::Transient,
            Self::ContractViolation(_) => ErrorClass::ContractViolation,
            Self::Prompt(_) | Self::Unsupported { .. } | Self::Config(_) => ErrorClass::Caller,
            Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound => ErrorClass::NotFound,
            Self::Io(_) => ErrorClass::Caller,
        }
    }

    /// Whether this is a transport-level failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Build an error from a non-success HTTP status and its body.
    #[must_use]
    pub fn from_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> Self {
        let body = truncate(body, 512);
        match status {
            404 => Self::NotFound {
                resource: if body.is_empty() { "HTTP 404".to_string() } else { body },
            },
            429 => Self::RateLimited { retry_after_secs },
            500..=599 => Self::Server { status, body },
            _ => Self::RequestFailed(format!("HTTP {status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else if let Some(status) = err.status() {
            LlmError::from_status(status.as_u16(), &err.to_string(), None)
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, LlmError>;
