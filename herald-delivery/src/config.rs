//! Dispatch configuration
//!
//! Every section has per-field serde defaults, so an empty RON document
//! `()` is a valid configuration with no backends.

use serde::{Deserialize, Serialize};

use crate::{
    backend::SimulatedBackendConfig, circuit_breaker::CircuitBreakerConfig, error::ConfigError,
    idempotency::DedupConfig, policy::RetryPolicy, queue::QueueConfig,
    rate_limiter::RateLimitConfig,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    /// Backends in the order they are tried
    #[serde(default)]
    pub backends: Vec<SimulatedBackendConfig>,
}

fn positive<T: PartialOrd + Default>(field: &'static str, value: T) -> Result<(), ConfigError> {
    if value > T::default() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be positive"))
    }
}

impl DispatchConfig {
    /// Check every numeric setting, naming the first offending field
    ///
    /// # Errors
    /// If a value is out of range or two backends share a name
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        positive("retry.max_attempts", retry.max_attempts)?;
        positive("retry.initial_delay_ms", retry.initial_delay_ms)?;
        positive("retry.max_delay_ms", retry.max_delay_ms)?;
        if retry.max_delay_ms < retry.initial_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must not be below retry.initial_delay_ms",
            ));
        }
        if !(retry.backoff_multiplier >= 1.0 && retry.backoff_multiplier.is_finite()) {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                "must be a finite value of at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(ConfigError::invalid(
                "retry.jitter_factor",
                "must lie between 0.0 and 1.0",
            ));
        }

        positive("rate_limit.max_requests", self.rate_limit.max_requests)?;
        positive("rate_limit.window_ms", self.rate_limit.window_ms)?;

        let breaker = &self.circuit_breaker;
        positive("circuit_breaker.failure_threshold", breaker.failure_threshold)?;
        positive(
            "circuit_breaker.recovery_timeout_ms",
            breaker.recovery_timeout_ms,
        )?;
        positive(
            "circuit_breaker.monitoring_period_ms",
            breaker.monitoring_period_ms,
        )?;

        positive("dedup.poll_interval_ms", self.dedup.poll_interval_ms)?;
        positive("dedup.max_wait_ms", self.dedup.max_wait_ms)?;
        positive("queue.idle_poll_ms", self.queue.idle_poll_ms)?;

        for (index, backend) in self.backends.iter().enumerate() {
            if backend.name.trim().is_empty() {
                return Err(ConfigError::invalid("backends.name", "must not be empty"));
            }
            if !(0.0..=1.0).contains(&backend.success_rate) {
                return Err(ConfigError::invalid(
                    "backends.success_rate",
                    format!("{} must lie between 0.0 and 1.0", backend.name),
                ));
            }
            if self.backends[..index]
                .iter()
                .any(|other| other.name == backend.name)
            {
                return Err(ConfigError::invalid(
                    "backends.name",
                    format!("{} is declared twice", backend.name),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: DispatchConfig = ron::from_str("()").unwrap();
        assert_eq!(config, DispatchConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config: DispatchConfig = ron::from_str(
            r#"(
                retry: (max_attempts: 5, jitter_factor: 0.1),
                rate_limit: (max_requests: 10),
                backends: [
                    (name: "primary"),
                    (name: "secondary", success_rate: 0.9, latency_ms: 20),
                ],
            )"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].latency_ms, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_names_offending_field() {
        let mut config = DispatchConfig::default();
        config.retry.max_attempts = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::invalid("retry.max_attempts", "must be positive"))
        );

        let mut config = DispatchConfig::default();
        config.retry.max_delay_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "retry.max_delay_ms",
                ..
            })
        ));

        let mut config = DispatchConfig::default();
        config.retry.jitter_factor = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "retry.jitter_factor",
                ..
            })
        ));

        let mut config = DispatchConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = DispatchConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "circuit_breaker.failure_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_backend_names_rejected() {
        let config = DispatchConfig {
            backends: vec![
                SimulatedBackendConfig::reliable("primary"),
                SimulatedBackendConfig::reliable("primary"),
            ],
            ..DispatchConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "backends.name",
                ..
            })
        ));
    }
}
