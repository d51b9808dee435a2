//! Process-wide request pacing for the hosted model.
//!
//! The service enforces a requests-per-minute quota, so every outbound
//! upload and generate call goes through one shared [`RateLimiter`]. The
//! limiter owns its [`Clock`], which lets tests substitute a manual clock
//! and assert on the exact sleeps instead of waiting in real time.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Time source and sleeper used by the analyzer.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time with `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Enforces a minimum gap between consecutive requests across all callers.
///
/// The lock is held while sleeping, so concurrent callers queue up and are
/// released one `min_delay` apart.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, min_delay: Duration) -> Self {
        Self {
            clock,
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Wait until `min_delay` has passed since the previous request, then
    /// record this one. Returns how long the caller was held back.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_request.lock().await;
        let mut waited = Duration::ZERO;

        if let Some(previous) = *last {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.min_delay {
                waited = self.min_delay - elapsed;
                tracing::debug!(wait_ms = waited.as_millis() as u64, "rate limit");
                self.clock.sleep(waited).await;
            }
        }

        *last = Some(self.clock.now());
        waited
    }
}
