//! Retry policy for operations that are allowed to retry.

use std::future::Future;
use std::time::Duration;

/// Pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same pause after every failure.
    Fixed(Duration),
    /// Doubling pause starting at `initial`, capped at `max`.
    Exponential {
        /// Pause after the first failure.
        initial: Duration,
        /// Upper bound on any pause.
        max: Duration,
    },
}

impl Backoff {
    /// Pause before retry number `attempt` (zero based).
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { initial, max } => {
                let multiplier = 2u64.saturating_pow(attempt).min(u64::from(u32::MAX));
                initial.saturating_mul(multiplier as u32).min(max)
            }
        }
    }
}

/// Bounded retry with a backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Policy with a fixed pause. `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed(delay))
    }

    /// Policy with an arbitrary backoff.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Total attempts including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds or attempts run out, returning the last
    /// error in that case.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt - 1);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        operation = label,
                        attempts = attempt,
                        error = %e,
                        "giving up after final attempt"
                    );
                    return Err(e);
                }
            }
        }
    }
}
