//! # mnemo-llm — LLM completion orchestration for mnemo search
//!
//! Sits between the search pipeline and one or more OpenAI-compatible
//! backends (Ollama, OpenAI, OpenRouter, llama.cpp server):
//!   - **Structured completions** validated against a target shape, with
//!     repair round trips when the model replies with the wrong JSON
//!   - **Audio and image transcription**
//!   - **Runtime override** of the completion backend from the environment,
//!     with fallback to the default backend
//!
//! Every outbound call holds a permit from one shared [`RateLimiter`] and is
//! retried under a deadline-bounded [`RetryPolicy`].
//!
//! # Architecture
//!
//! ```text
//! CompletionService ── prompts, history folding
//!        │
//! OverrideRouter ───── SEARCH_LLM_* set? ── SchemaClient ──┐ (on failure)
//!        │                                                 │
//! OpenAiAdapter ◄─────────────────────────────────────────┘
//!        │  retry_with_policy
//!        │  RateLimiter::acquire
//!        ▼
//!   HTTP /chat/completions, /audio/transcriptions
//! ```

#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod config;
pub mod error;
pub mod files;
pub mod logging;
pub mod prompt;
pub mod ratelimit;
pub mod retry;
pub mod router;
pub mod service;
pub mod shape;
pub mod types;

pub use backend::{LlmBackend, OpenAiAdapter, SchemaClient};
pub use config::{BackendConfig, MnemoConfig};
pub use error::{ErrorClass, LlmError, Result};
pub use ratelimit::{RateLimiter, RatePermit};
pub use retry::{GateClock, RetryPolicy, retry_gated, retry_with_policy};
pub use router::{EnvSource, OverrideConfig, OverrideRouter, ProcessEnv};
pub use service::{CompletionParams, CompletionService};
pub use shape::{Schema, StructuredResult, TargetShape};
pub use types::CompletionRequest;
