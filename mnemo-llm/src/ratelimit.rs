//! Shared outbound request gate.
//!
//! Every network call to an LLM backend runs while holding a [`RatePermit`].
//! The gate enforces two budgets when enabled:
//! - a concurrency budget (requests in flight at once), and
//! - a request-rate budget (requests started per interval).
//!
//! Permits are RAII guards, so the budget is returned on every exit path,
//! including errors and cancelled futures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;
use crate::error::{LlmError, Result};

static GLOBAL: OnceLock<Arc<RateLimiter>> = OnceLock::new();

/// Fixed-window request counter.
#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
    limit: u32,
    interval: Duration,
}

impl Window {
    /// Take a slot, or report how long until the window resets.
    fn try_take(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        if now.duration_since(self.started) >= self.interval {
            self.started = now;
            self.used = 0;
        }
        if self.used < self.limit {
            self.used += 1;
            Ok(())
        } else {
            Err((self.started + self.interval).saturating_duration_since(now))
        }
    }
}

/// Acquisition counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    /// Permits handed out.
    pub acquired: u64,
    /// Permits returned.
    pub released: u64,
}

impl LimiterStats {
    /// Permits currently held.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Process-wide gate for outbound LLM requests.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    permits: Semaphore,
    window: Option<Mutex<Window>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl RateLimiter {
    /// Build a limiter from config.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let max_concurrent = config.max_concurrent.clamp(1, Semaphore::MAX_PERMITS);
        let window = (config.enabled && config.requests_per_interval > 0 && config.interval_secs > 0)
            .then(|| {
                Mutex::new(Window {
                    started: Instant::now(),
                    used: 0,
                    limit: config.requests_per_interval,
                    interval: Duration::from_secs(config.interval_secs),
                })
            });
        Self {
            enabled: config.enabled,
            permits: Semaphore::new(max_concurrent),
            window,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// A limiter that never waits (but still counts).
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(&RateLimitConfig::default())
    }

    /// The shared process-wide limiter.
    ///
    /// Uses [`RateLimitConfig::default`] unless [`RateLimiter::install_global`]
    /// ran first.
    pub fn global() -> Arc<RateLimiter> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::unlimited())))
    }

    /// Configure the process-wide limiter. Returns `false` if it was already
    /// initialised (the existing limiter is kept).
    pub fn install_global(config: &RateLimitConfig) -> bool {
        GLOBAL.set(Arc::new(Self::new(config))).is_ok()
    }

    /// Wait for budget and take a permit.
    ///
    /// # Errors
    /// Returns `LlmError::Unavailable` if the gate has been closed.
    pub async fn acquire(&self) -> Result<RatePermit<'_>> {
        let slot = if self.enabled {
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| LlmError::Unavailable("rate limiter closed".into()))?;
            self.wait_for_window().await;
            Some(permit)
        } else {
            None
        };
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(acquired = n, "rate limiter permit acquired");
        Ok(RatePermit {
            limiter: self,
            _slot: slot,
        })
    }

    async fn wait_for_window(&self) {
        let Some(window) = &self.window else {
            return;
        };
        loop {
            let wait = window.lock().try_take(Instant::now());
            match wait {
                Ok(()) => return,
                Err(delay) => {
                    trace!(delay_ms = delay.as_millis() as u64, "rate window exhausted, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Snapshot of the acquisition counters.
    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }

    /// Whether the limiter enforces budgets.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Scoped permit. Dropping it returns the budget.
#[derive(Debug)]
pub struct RatePermit<'a> {
    limiter: &'a RateLimiter,
    _slot: Option<SemaphorePermit<'a>>,
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        self.limiter.released.fetch_add(1, Ordering::SeqCst);
    }
}
