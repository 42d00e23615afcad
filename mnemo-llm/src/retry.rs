//! Deadline-bounded retry with exponential backoff and jitter.
//!
//! [`retry_with_policy`] wraps any fallible async operation. Errors the
//! policy deems non-retryable are returned on the spot; everything else is
//! retried until the policy's deadline has passed, after which the last error
//! is handed back unchanged.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::config::BackoffConfig;
use crate::error::{ErrorClass, LlmError, Result};

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = fn(&LlmError) -> bool;

/// Default predicate: retry everything except missing resources and
/// contract violations.
#[must_use]
pub fn retry_unless_deterministic(err: &LlmError) -> bool {
    !matches!(err.class(), ErrorClass::NotFound | ErrorClass::ContractViolation)
}

/// Backoff shape, deadline and retry predicate for one operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total time budget measured from the first attempt.
    pub deadline: Duration,
    /// Delay before the first retry (before jitter).
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
    /// Which errors get retried.
    pub is_retryable: RetryPredicate,
}

impl RetryPolicy {
    /// Policy with the default predicate.
    #[must_use]
    pub fn new(deadline: Duration, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            deadline,
            base_delay,
            max_delay,
            jitter: Duration::from_secs(1),
            is_retryable: retry_unless_deterministic,
        }
    }

    /// Structured completions and audio: 128s budget, 8s base.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(128), Duration::from_secs(8), Duration::from_secs(128))
    }

    /// Image transcription: 128s budget, 2s base.
    #[must_use]
    pub fn quick() -> Self {
        Self::new(Duration::from_secs(128), Duration::from_secs(2), Duration::from_secs(128))
    }

    /// Build from a config section. Negative or NaN values clamp to zero.
    #[must_use]
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            deadline: secs(config.deadline_secs),
            base_delay: secs(config.base_delay_secs),
            max_delay: secs(config.max_delay_secs),
            jitter: secs(config.jitter_secs),
            is_retryable: retry_unless_deterministic,
        }
    }

    /// Replace the retry predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.is_retryable = predicate;
        self
    }

    /// Replace the jitter bound.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-based):
    /// `min(base * 2^attempt + U(0, jitter), max_delay)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1_u32 << attempt.min(16));
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            let jitter_ms = self.jitter.as_millis().min(u128::from(u64::MAX)) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        exp.saturating_add(jitter).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// When an operation first got through the rate gate.
///
/// The retry deadline runs from this instant, so time spent queueing for the
/// first permit is not charged against the budget. Clones share the mark.
#[derive(Debug, Clone, Default)]
pub struct GateClock(Arc<OnceLock<Instant>>);

impl GateClock {
    /// Record that the gate opened now. Later calls keep the first mark.
    pub fn mark(&self) {
        let _ = self.0.set(Instant::now());
    }

    /// The first mark, if any.
    #[must_use]
    pub fn started(&self) -> Option<Instant> {
        self.0.get().copied()
    }
}

/// Run `op` under `policy`, with the deadline starting at the first attempt.
///
/// `operation` only labels the debug trace emitted before each retry sleep.
///
/// # Errors
/// Returns the first non-retryable error, or the last error once the deadline
/// has elapsed.
pub async fn retry_with_policy<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_gated(policy, operation, |clock| {
        clock.mark();
        op()
    })
    .await
}

/// Run `op` under `policy`, with the deadline starting when `op` marks the
/// [`GateClock`] it is handed (normally right after its first rate-limiter
/// permit is granted).
///
/// An attempt that fails before marking the clock starts it at the failure.
///
/// # Errors
/// Returns the first non-retryable error, or the last error once the deadline
/// has elapsed.
pub async fn retry_gated<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut(GateClock) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let clock = GateClock::default();
    let mut attempt: u32 = 0;
    loop {
        let err = match op(clock.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !(policy.is_retryable)(&err) {
            return Err(err);
        }

        clock.mark();
        let elapsed = clock.started().map_or(Duration::ZERO, |started| started.elapsed());
        if elapsed >= policy.deadline {
            return Err(err);
        }
        let delay = policy.delay_for(attempt).min(policy.deadline - elapsed);

        debug!(
            operation,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying LLM call after failure"
        );
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}
