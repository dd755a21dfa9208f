//! Typed error handling for dispatch operations.
//!
//! This module provides structured error types that distinguish between:
//! - Fail-fast rejections (an open circuit) - skip to the next backend
//! - Provider failures - retried with backoff, then the next backend
//! - Terminal failures - every backend exhausted, or a coalesced duplicate failed

use chrono::{DateTime, Utc};
use herald_common::MessageId;
use thiserror::Error;

/// Top-level dispatch error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The backend's circuit breaker is open; the send was never attempted.
    #[error("Circuit breaker open for backend {backend}")]
    CircuitOpen {
        backend: String,
        last_failure: Option<DateTime<Utc>>,
    },

    /// The backend reported or raised a failure.
    #[error("Backend {backend} failed: {message}")]
    Provider { backend: String, message: String },

    /// Every configured backend failed.
    #[error("All {attempted} backends failed, last error: {last}")]
    Exhausted {
        attempted: usize,
        last: Box<DispatchError>,
    },

    /// No backends are configured, so nothing could be attempted.
    #[error("No backends configured")]
    NoBackends,

    /// A concurrent request with the same idempotency key failed.
    #[error("Duplicate request with key {key} failed")]
    DuplicateFailed { key: String },

    /// Waiting on a concurrent request with the same idempotency key took too long.
    #[error("Timed out after {waited_ms}ms waiting on duplicate request with key {key}")]
    DedupTimeout { key: String, waited_ms: u64 },
}

impl DispatchError {
    /// Returns `true` if this error came from an open circuit.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Returns `true` if a later attempt may succeed.
    ///
    /// The dispatch pipeline backs off and retries only these errors; any
    /// other error a backend returns moves straight on to the next backend.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }

    /// Returns `true` if the error came out of idempotency coalescing.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateFailed { .. } | Self::DedupTimeout { .. })
    }
}

/// Errors raised by the priority queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A drain loop is already running on this queue.
    #[error("Queue is already being processed")]
    AlreadyProcessing,

    /// No entry with the given id is queued.
    #[error("Message not found in queue: {0}")]
    NotFound(MessageId),
}

/// Errors raised when validating dispatch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
