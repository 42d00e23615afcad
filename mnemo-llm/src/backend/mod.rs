//! LLM backends.
//!
//! ```text
//! LlmBackend (trait)
//! ├── OpenAiAdapter   default adapter: chat, transcription, vision
//! └── SchemaClient    ephemeral override client, structured output only
//! ```
//!
//! All of them speak the OpenAI-compatible HTTP API through [`ChatEndpoint`],
//! which holds a [`crate::ratelimit::RatePermit`] for the duration of every
//! request.

mod chat;
mod openai;
pub mod provider;
mod schema_client;

pub use chat::{ChatEndpoint, message_content};
pub use openai::OpenAiAdapter;
pub use schema_client::SchemaClient;

use std::path::Path;

use async_trait::async_trait;

use crate::error::{LlmError, Result};
use crate::shape::StructuredResult;
use crate::types::CompletionRequest;

/// One backend's completion and transcription operations.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name (used in logs and errors).
    fn name(&self) -> &str;

    /// Complete `request` and return a result conforming to its shape.
    async fn structured_completion(&self, request: &CompletionRequest) -> Result<StructuredResult>;

    /// Transcribe the audio resource at `path`.
    async fn transcribe_audio(&self, _path: &Path) -> Result<String> {
        Err(LlmError::Unsupported {
            backend: self.name().to_string(),
            operation: "transcribe_audio",
        })
    }

    /// Describe the image resource at `path`.
    async fn transcribe_image(&self, _path: &Path) -> Result<String> {
        Err(LlmError::Unsupported {
            backend: self.name().to_string(),
            operation: "transcribe_image",
        })
    }
}
