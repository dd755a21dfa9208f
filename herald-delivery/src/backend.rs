//! Delivery backend abstraction
//!
//! A [`Backend`] is anything that can hand a [`Message`] to a provider. The
//! dispatcher only ever talks to backends through this trait; the one
//! concrete implementation shipped here is [`SimulatedBackend`], which is
//! configured rather than subclassed.

use std::time::Duration;

use async_trait::async_trait;
use herald_common::{DeliveryOutcome, Message};
use rand::Rng;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::DispatchError;

/// A provider that messages can be sent through
///
/// A failed send may be reported either as an `Err` or as an outcome with
/// `success == false`; the dispatcher treats both as a failure of this backend.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Name used in outcomes, logs and circuit breaker statistics
    fn name(&self) -> &str;

    /// Send a message through this backend
    ///
    /// # Errors
    /// If the provider could not be reached or refused the message
    async fn send(&self, message: &Message) -> Result<DeliveryOutcome, DispatchError>;

    /// Advisory health probe. Never consulted by the dispatch pipeline.
    async fn is_healthy(&self) -> bool;
}

/// How a simulated failure is reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureMode {
    /// Return an outcome with `success == false`
    #[default]
    Outcome,
    /// Return `Err(DispatchError::Provider)`
    Error,
}

/// Configuration for a [`SimulatedBackend`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedBackendConfig {
    pub name: String,

    /// Probability in `[0, 1]` that a send succeeds
    ///
    /// Default: 1.0
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,

    /// Simulated provider latency (milliseconds)
    ///
    /// Default: 0
    #[serde(default)]
    pub latency_ms: u64,

    /// Value reported by the health probe
    ///
    /// Default: true
    #[serde(default = "default_healthy")]
    pub healthy: bool,

    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl SimulatedBackendConfig {
    /// A backend that always succeeds immediately
    pub fn reliable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success_rate: default_success_rate(),
            latency_ms: 0,
            healthy: default_healthy(),
            failure_mode: FailureMode::default(),
        }
    }
}

const fn default_success_rate() -> f64 {
    1.0
}

const fn default_healthy() -> bool {
    true
}

/// Backend that succeeds or fails at a configured rate
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    config: SimulatedBackendConfig,
}

impl SimulatedBackend {
    #[must_use]
    pub const fn new(config: SimulatedBackendConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &SimulatedBackendConfig {
        &self.config
    }

    fn roll(&self) -> bool {
        let rate = self.config.success_rate;
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 || rate.is_nan() {
            false
        } else {
            rand::rng().random_bool(rate)
        }
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, message: &Message) -> Result<DeliveryOutcome, DispatchError> {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        if self.roll() {
            let provider_id = format!("{}-{}", self.config.name, Ulid::new());
            tracing::debug!(
                backend = %self.config.name,
                provider_id = %provider_id,
                recipients = message.recipient_count(),
                "Simulated send accepted"
            );
            return Ok(DeliveryOutcome::delivered(&self.config.name, provider_id));
        }

        tracing::debug!(backend = %self.config.name, "Simulated send rejected");
        let reason = "simulated provider failure";
        match self.config.failure_mode {
            FailureMode::Outcome => Ok(DeliveryOutcome::rejected(&self.config.name, reason)),
            FailureMode::Error => Err(DispatchError::Provider {
                backend: self.config.name.clone(),
                message: reason.to_string(),
            }),
        }
    }

    async fn is_healthy(&self) -> bool {
        self.config.healthy
    }
}
