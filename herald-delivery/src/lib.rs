//! Resilient dispatch pipeline for outbound notifications
//!
//! This crate provides:
//! - Sliding-window rate limiting
//! - Per-backend circuit breakers
//! - Bounded exponential-backoff retry
//! - Idempotent, single-flight dispatch keyed on message content or a token
//! - A priority queue with a background drain loop
//! - The [`Coordinator`] composing all of the above over a list of backends

pub mod backend;
pub mod circuit_breaker;
mod config;
mod coordinator;
mod error;
pub mod idempotency;
pub mod policy;
pub mod queue;
pub mod rate_limiter;
mod service;

// Re-export backend types
pub use backend::{Backend, FailureMode, SimulatedBackend, SimulatedBackendConfig};
// Re-export resilience primitives
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use config::DispatchConfig;
pub use coordinator::{BackendHealth, Coordinator, CoordinatorBuilder, QueuedDispatch};
// Re-export error types
pub use error::{ConfigError, DispatchError, QueueError};
pub use idempotency::{DedupConfig, DedupStats, IdempotencyCache};
pub use policy::{RetryMechanism, RetryPolicy};
pub use queue::{PriorityQueue, QueueConfig, QueueEntry, QueueHandler, QueueStats};
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use service::DispatchQueryService;
