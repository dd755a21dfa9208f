//! Retry policy and bounded exponential-backoff executor.
//!
//! [`RetryPolicy`] holds the configuration and the pure delay arithmetic;
//! [`RetryMechanism`] runs an operation under that policy.

use std::{future::Future, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration for send operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (in milliseconds).
    ///
    /// Default: 1000 milliseconds
    #[serde(default = "defaults::initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum retry delay (in milliseconds).
    ///
    /// Caps the exponential backoff to prevent excessively long delays.
    ///
    /// Default: 30000 milliseconds
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Factor the delay grows by after every failed attempt.
    ///
    /// The delay before retry `n` is `initial * multiplier^(n - 1)`.
    ///
    /// Default: 2.0
    #[serde(default = "defaults::backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Jitter factor for randomizing retry delays.
    ///
    /// The delay is randomized within ±`jitter_factor`. Zero disables jitter.
    ///
    /// Default: 0.0 (no jitter)
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            initial_delay_ms: defaults::initial_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            backoff_multiplier: defaults::backoff_multiplier(),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Check if another attempt may follow the failed attempt `attempt` (1-indexed).
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Get the number of attempts left after attempt `attempt`.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt)
    }

    /// Delay to wait after the failed attempt `attempt` (1-indexed), without jitter.
    ///
    /// # Formula
    /// `delay = min(initial * multiplier^(attempt - 1), max_delay)`
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        let max = self.max_delay_ms as f64;

        let delay_ms = if delay.is_finite() && delay < max {
            delay.max(0.0) as u64
        } else {
            self.max_delay_ms
        };

        Duration::from_millis(delay_ms)
    }

    /// Apply jitter to `delay`: `delay * (1 ± jitter_factor)`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }

        let base = delay.as_millis() as f64;
        let jitter_range = base * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let jittered = ((base + jitter).max(0.0) as u64).min(self.max_delay_ms);

        Duration::from_millis(jittered)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn initial_delay_ms() -> u64 {
        1000 // 1 second
    }

    pub const fn max_delay_ms() -> u64 {
        30_000 // 30 seconds
    }

    pub const fn backoff_multiplier() -> f64 {
        2.0
    }
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryMechanism {
    policy: RetryPolicy,
}

impl RetryMechanism {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// See [`RetryPolicy::calculate_delay`].
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.policy.calculate_delay(attempt)
    }

    /// See [`RetryPolicy::should_retry`].
    pub const fn should_retry(&self, attempt: u32) -> bool {
        self.policy.should_retry(attempt)
    }

    /// Invoke `op` until it succeeds or `max_attempts` is reached.
    ///
    /// The last error is returned unchanged once attempts are exhausted.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(op, |_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_retry(attempt, &error, delay)`
    /// before every backoff sleep.
    pub async fn execute_with<T, E, F, Fut, R>(&self, op: F, on_retry: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(u32, &E, Duration),
    {
        self.execute_classified(op, |_| true, on_retry).await
    }

    /// Like [`execute_with`](Self::execute_with), but an error for which
    /// `retryable` returns `false` is returned at once without backing off.
    pub async fn execute_classified<T, E, F, Fut, P, R>(
        &self,
        mut op: F,
        retryable: P,
        mut on_retry: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        R: FnMut(u32, &E, Duration),
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if !retryable(&error) => return Err(error),
                Err(error) if !self.policy.should_retry(attempt) => return Err(error),
                Err(error) => {
                    let delay = self.policy.jittered(self.policy.calculate_delay(attempt));
                    tracing::debug!(
                        attempt,
                        remaining = self.policy.remaining_attempts(attempt),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Attempt failed, backing off before retry"
                    );
                    on_retry(attempt, &error, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
