//! Per-backend circuit breaker to isolate failing backends
//!
//! Every backend gets its own breaker, so a flaky backend never stops the
//! dispatcher from using a healthy one.
//!
//! # Circuit Breaker Pattern
//!
//! The circuit breaker has three states:
//! - **Closed**: Normal operation, all sends allowed
//! - **Open**: Circuit tripped due to failures, all sends rejected immediately
//! - **Half-Open**: Testing recovery, a single trial send is allowed
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  Failure threshold reached   ┌──────┐
//! │ Closed  │ ──────────────────────────>  │ Open │
//! └─────────┘                               └──────┘
//!     ^                                        │
//!     │                                        │ Recovery timeout elapsed
//!     │                                        v
//!     │  Success              ┌───────────────┐
//!     └───────────────────────│  Half-Open    │
//!                             └───────────────┘
//!                                     │
//!                                     │ Failure
//!                                     v
//!                               ┌──────┐
//!                               │ Open │
//!                               └──────┘
//! ```
//!
//! Failures only accumulate inside the monitoring period: once the first
//! failure of a streak is older than `monitoring_period_ms`, the next failure
//! starts a new streak.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial send (milliseconds)
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,

    /// Window in which consecutive failures are counted (milliseconds)
    #[serde(default = "default_monitoring_period_ms")]
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            monitoring_period_ms: default_monitoring_period_ms(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5 // Trip circuit after 5 failures
}

const fn default_recovery_timeout_ms() -> u64 {
    60_000 // Keep circuit open for 1 minute
}

const fn default_monitoring_period_ms() -> u64 {
    300_000 // Count failures within a 5 minute window
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all sends allowed
    Closed,
    /// Circuit tripped - reject all sends immediately
    Open,
    /// Testing recovery - allow a single trial send
    HalfOpen,
}

/// Mutable breaker state, guarded by the breaker's mutex
#[derive(Debug)]
struct CircuitBreakerData {
    state: CircuitState,
    /// Number of consecutive failures
    failure_count: u32,
    /// When the current failure streak started
    streak_started_at: Option<Instant>,
    /// Wall-clock time of the most recent failure
    last_failure_at: Option<DateTime<Utc>>,
    /// When an open circuit becomes eligible for a trial send
    reopen_at: Option<Instant>,
    /// Wall-clock mirror of `reopen_at`, for reporting
    scheduled_reopen: Option<DateTime<Utc>>,
    /// Whether the half-open trial send is running
    trial_in_flight: bool,
}

impl CircuitBreakerData {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            streak_started_at: None,
            last_failure_at: None,
            reopen_at: None,
            scheduled_reopen: None,
            trial_in_flight: false,
        }
    }

    /// Move an open circuit to half-open once its recovery timeout has passed
    fn refresh(&mut self, backend: &str) {
        if self.state == CircuitState::Open
            && self.reopen_at.is_some_and(|reopen_at| Instant::now() >= reopen_at)
        {
            self.state = CircuitState::HalfOpen;
            self.trial_in_flight = false;
            tracing::info!(
                backend,
                "Circuit breaker entering HALF-OPEN state - testing recovery"
            );
        }
    }

    fn open(&mut self, recovery_timeout: Duration) {
        let now = Instant::now();
        self.state = CircuitState::Open;
        self.reopen_at = Some(now + recovery_timeout);
        self.scheduled_reopen = chrono::Duration::from_std(recovery_timeout)
            .ok()
            .map(|timeout| Utc::now() + timeout);
        self.trial_in_flight = false;
    }

    fn record_success(&mut self, backend: &str) {
        let was = self.state;
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.streak_started_at = None;
        self.last_failure_at = None;
        self.reopen_at = None;
        self.scheduled_reopen = None;
        self.trial_in_flight = false;

        if was != CircuitState::Closed {
            tracing::info!(backend, "Circuit breaker CLOSED - normal operation resumed");
        }
    }

    fn record_failure(&mut self, backend: &str, config: &CircuitBreakerConfig) {
        let now = Instant::now();
        self.last_failure_at = Some(Utc::now());
        let recovery_timeout = Duration::from_millis(config.recovery_timeout_ms);

        match self.state {
            CircuitState::Closed => {
                let window = Duration::from_millis(config.monitoring_period_ms);
                if self
                    .streak_started_at
                    .is_none_or(|started| now.duration_since(started) > window)
                {
                    self.failure_count = 0;
                    self.streak_started_at = Some(now);
                }
                self.failure_count += 1;

                if self.failure_count >= config.failure_threshold {
                    self.open(recovery_timeout);
                    tracing::warn!(
                        backend,
                        failure_count = self.failure_count,
                        threshold = config.failure_threshold,
                        recovery_timeout_ms = config.recovery_timeout_ms,
                        "Circuit breaker OPENED - rejecting sends to this backend"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.failure_count += 1;
                self.open(recovery_timeout);
                tracing::warn!(backend, "Circuit breaker trial failed - reopening circuit");
            }
            CircuitState::Open => {
                // A send admitted before the circuit tripped; already open
                self.failure_count += 1;
            }
        }
    }
}

/// Clears the half-open trial marker if the trial future is dropped early
struct TrialGuard<'a> {
    data: &'a parking_lot::Mutex<CircuitBreakerData>,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.data.lock().trial_in_flight = false;
        }
    }
}

/// Circuit breaker guarding a single backend
#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    config: CircuitBreakerConfig,
    data: parking_lot::Mutex<CircuitBreakerData>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker for `backend`
    #[must_use]
    pub fn new(backend: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            data: parking_lot::Mutex::new(CircuitBreakerData::new()),
        }
    }

    /// Name of the guarded backend
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Decide whether a call may proceed.
    ///
    /// Returns `Ok(true)` when the call is the half-open trial.
    fn admit(&self) -> Result<bool, DispatchError> {
        let mut data = self.data.lock();
        data.refresh(&self.backend);

        match data.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen if !data.trial_in_flight => {
                data.trial_in_flight = true;
                Ok(true)
            }
            CircuitState::HalfOpen | CircuitState::Open => Err(DispatchError::CircuitOpen {
                backend: self.backend.clone(),
                last_failure: data.last_failure_at,
            }),
        }
    }

    /// Run `op` through the breaker.
    ///
    /// When the circuit is open the operation is never invoked and
    /// [`DispatchError::CircuitOpen`] is returned. Otherwise the operation's
    /// own result is returned unchanged after the outcome has been recorded.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let mut trial = TrialGuard {
            data: &self.data,
            armed: self.admit()?,
        };

        let result = op().await;

        {
            let mut data = self.data.lock();
            match &result {
                Ok(_) => data.record_success(&self.backend),
                Err(_) => data.record_failure(&self.backend, &self.config),
            }
        }
        trial.armed = false;

        result
    }

    /// Get the current circuit state
    pub fn state(&self) -> CircuitState {
        let mut data = self.data.lock();
        data.refresh(&self.backend);
        data.state
    }

    /// Force the circuit closed and forget all failures
    pub fn reset(&self) {
        *self.data.lock() = CircuitBreakerData::new();
        tracing::info!(backend = %self.backend, "Circuit breaker reset");
    }

    /// Get statistics for this breaker (for monitoring/debugging)
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut data = self.data.lock();
        data.refresh(&self.backend);

        CircuitBreakerStats {
            backend: self.backend.clone(),
            state: data.state,
            failure_count: data.failure_count,
            last_failure_at: data.last_failure_at,
            scheduled_reopen: (data.state == CircuitState::Open)
                .then_some(data.scheduled_reopen)
                .flatten(),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Backend guarded by this breaker
    pub backend: String,
    /// Current circuit state
    pub state: CircuitState,
    /// Number of consecutive failures
    pub failure_count: u32,
    /// When the most recent failure happened
    pub last_failure_at: Option<DateTime<Utc>>,
    /// When an open circuit allows a trial send
    pub scheduled_reopen: Option<DateTime<Utc>>,
}
