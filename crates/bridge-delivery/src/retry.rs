use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use bridge_core::clock::{Sleeper, TokioSleeper};
use bridge_core::errors::BridgeError;

/// Hard ceiling on per-request attempt overrides.
pub const MAX_ATTEMPTS_CAP: u32 = 10;

/// Exponential backoff around a fallible send.
///
/// After failed attempt `n` (0-based) the policy waits `base · 2^(n+1)`,
/// so a 1 s base gives 2 s, 4 s, 8 s… No delay follows the final attempt.
/// Non-retryable errors stop the loop at once.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_add(1)))
    }

    /// Clamp a caller-supplied override into `1..=MAX_ATTEMPTS_CAP`.
    pub fn attempts_for(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.max_attempts)
            .clamp(1, MAX_ATTEMPTS_CAP)
    }

    /// Run `op` up to `max_attempts` times. Returns the final result and how
    /// many attempts were made.
    pub async fn run<T, F, Fut>(&self, max_attempts: u32, mut op: F) -> (Result<T, BridgeError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt + 1),
                Err(e) if !e.is_retryable() => return (Err(e), attempt + 1),
                Err(e) if attempt + 1 >= max_attempts => {
                    warn!(attempts = attempt + 1, error = %e, "giving up after final attempt");
                    return (Err(e), attempt + 1);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "send failed, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
