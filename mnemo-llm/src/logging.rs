//! Tracing subscriber setup for binaries and tools embedding the crate.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::GeneralConfig;
use crate::error::{LlmError, Result};

/// Filter used when `RUST_LOG` is unset.
#[must_use]
pub fn default_filter(config: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.log_level.trim().is_empty() {
            EnvFilter::new("info")
        } else {
            EnvFilter::new(config.log_level.trim())
        }
    })
}

/// Install the global subscriber: `RUST_LOG` if set, else the configured
/// level; JSON lines when `json_logs` is on.
///
/// # Errors
/// Returns `LlmError::Config` if a global subscriber is already installed.
pub fn init(config: &GeneralConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(default_filter(config));
    let installed = if config.json_logs {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| LlmError::Config(format!("logging: {e}")))
}
