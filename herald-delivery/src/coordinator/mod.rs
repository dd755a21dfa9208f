//! The dispatch coordinator
//!
//! [`Coordinator`] owns one rate limiter, one circuit breaker per backend,
//! the retry executor, the idempotency cache, the priority queue and the
//! table of [`DispatchRecord`]s. It is cheap to clone; every clone shares
//! the same state, which lets spawned pipelines and the drain loop report
//! back into one status table.

mod pipeline;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use herald_common::{
    DeliveryOutcome, DispatchRecord, DispatchStatus, Message, MessageId, ValidationError,
    internal,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::{
    backend::{Backend, SimulatedBackend},
    circuit_breaker::{CircuitBreaker, CircuitBreakerStats},
    config::DispatchConfig,
    error::{ConfigError, QueueError},
    idempotency::{DedupStats, IdempotencyCache},
    policy::RetryMechanism,
    queue::{PriorityQueue, QueueStats},
    rate_limiter::{RateLimitStats, RateLimiter},
};

/// A backend together with the breaker guarding it
#[derive(Debug)]
struct Route {
    backend: Arc<dyn Backend>,
    breaker: CircuitBreaker,
}

/// Queue payload for deferred dispatch
#[derive(Debug, Clone)]
pub struct QueuedDispatch {
    pub message: Arc<Message>,
    pub key: String,
}

/// Result of probing one backend's advisory health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend: String,
    pub healthy: bool,
}

#[derive(Debug)]
struct CoordinatorInner {
    routes: Vec<Route>,
    rate_limiter: RateLimiter,
    retry: RetryMechanism,
    dedup: IdempotencyCache,
    queue: PriorityQueue<QueuedDispatch>,
    records: DashMap<MessageId, DispatchRecord>,
    /// Woken whenever a record reaches a terminal status
    settled: Notify,
}

/// Resilient dispatcher composing the rate limiter, circuit breakers,
/// retry, deduplication and the priority queue
#[derive(Debug, Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

/// Assembles a [`Coordinator`] from configuration plus extra backends
#[derive(Debug, Default)]
pub struct CoordinatorBuilder {
    config: DispatchConfig,
    backends: Vec<Arc<dyn Backend>>,
}

impl CoordinatorBuilder {
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            backends: Vec::new(),
        }
    }

    /// Add a backend after the ones declared in the configuration
    #[must_use]
    pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backends.push(Arc::new(backend));
        self
    }

    /// Add a shared backend after the ones declared in the configuration
    #[must_use]
    pub fn shared_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Validate the configuration and build the coordinator
    ///
    /// # Errors
    /// If the configuration is invalid or two backends share a name
    pub fn build(self) -> Result<Coordinator, ConfigError> {
        self.config.validate()?;

        let backends = self
            .config
            .backends
            .iter()
            .map(|config| Arc::new(SimulatedBackend::new(config.clone())) as Arc<dyn Backend>)
            .chain(self.backends);

        let mut routes: Vec<Route> = Vec::new();
        for backend in backends {
            if routes.iter().any(|r| r.backend.name() == backend.name()) {
                return Err(ConfigError::invalid(
                    "backends.name",
                    format!("{} is declared twice", backend.name()),
                ));
            }
            routes.push(Route {
                breaker: CircuitBreaker::new(
                    backend.name(),
                    self.config.circuit_breaker.clone(),
                ),
                backend,
            });
        }

        internal!(
            level = INFO,
            "Coordinator ready with {} backend(s)",
            routes.len()
        );

        Ok(Coordinator {
            inner: Arc::new(CoordinatorInner {
                routes,
                rate_limiter: RateLimiter::new(self.config.rate_limit.clone()),
                retry: RetryMechanism::new(self.config.retry.clone()),
                dedup: IdempotencyCache::new(self.config.dedup.clone()),
                queue: PriorityQueue::new(self.config.queue.clone()),
                records: DashMap::new(),
                settled: Notify::new(),
            }),
        })
    }
}

impl Coordinator {
    #[must_use]
    pub fn builder(config: DispatchConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    /// Build a coordinator using only the backends declared in `config`
    ///
    /// # Errors
    /// If the configuration is invalid
    pub fn from_config(config: DispatchConfig) -> Result<Self, ConfigError> {
        CoordinatorBuilder::new(config).build()
    }

    /// Accept a message for immediate dispatch
    ///
    /// The id and a pending record exist by the time this returns; the send
    /// itself runs on a spawned task.
    ///
    /// # Errors
    /// Never fails without an explicit token; see [`submit_with_token`](Self::submit_with_token).
    pub fn submit(
        &self,
        message: Message,
        submitter: Option<&str>,
    ) -> Result<MessageId, ValidationError> {
        self.submit_inner(message, None, submitter)
    }

    /// Accept a message whose dedup key is the caller's `token`
    ///
    /// # Errors
    /// If `token` is empty
    pub fn submit_with_token(
        &self,
        message: Message,
        token: &str,
        submitter: Option<&str>,
    ) -> Result<MessageId, ValidationError> {
        self.submit_inner(message, Some(token), submitter)
    }

    fn submit_inner(
        &self,
        message: Message,
        token: Option<&str>,
        submitter: Option<&str>,
    ) -> Result<MessageId, ValidationError> {
        let (id, dispatch) = self.accept(message, token, submitter)?;
        tracing::info!(message_id = %id, key = %dispatch.key, "Message accepted for dispatch");

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator
                .process(id, dispatch.message, &dispatch.key)
                .await;
        });

        Ok(id)
    }

    /// Accept a message for deferred dispatch through the priority queue
    ///
    /// # Errors
    /// Never fails without an explicit token; see [`enqueue_with_token`](Self::enqueue_with_token).
    pub fn enqueue(
        &self,
        message: Message,
        priority: i32,
        submitter: Option<&str>,
    ) -> Result<MessageId, ValidationError> {
        self.enqueue_inner(message, None, priority, submitter)
    }

    /// Like [`enqueue`](Self::enqueue) with an explicit idempotency token
    ///
    /// # Errors
    /// If `token` is empty
    pub fn enqueue_with_token(
        &self,
        message: Message,
        token: &str,
        priority: i32,
        submitter: Option<&str>,
    ) -> Result<MessageId, ValidationError> {
        self.enqueue_inner(message, Some(token), priority, submitter)
    }

    fn enqueue_inner(
        &self,
        message: Message,
        token: Option<&str>,
        priority: i32,
        submitter: Option<&str>,
    ) -> Result<MessageId, ValidationError> {
        let (id, dispatch) = self.accept(message, token, submitter)?;
        tracing::info!(message_id = %id, priority, "Message queued for dispatch");
        self.inner.queue.enqueue(id, dispatch, priority);
        Ok(id)
    }

    /// Validate the token, allocate an id and write the pending record
    fn accept(
        &self,
        message: Message,
        token: Option<&str>,
        submitter: Option<&str>,
    ) -> Result<(MessageId, QueuedDispatch), ValidationError> {
        if token.is_some_and(|token| token.trim().is_empty()) {
            return Err(ValidationError::EmptyToken);
        }

        let id = MessageId::generate();
        let key = IdempotencyCache::generate_key(&message, token, submitter);
        self.inner.records.insert(
            id,
            DispatchRecord::new(id, self.inner.retry.policy().max_attempts),
        );

        Ok((
            id,
            QueuedDispatch {
                message: Arc::new(message),
                key,
            },
        ))
    }

    /// Start draining the priority queue in the background
    ///
    /// # Errors
    /// If the queue is already being drained
    pub fn start_drain(&self) -> Result<(), QueueError> {
        self.inner
            .queue
            .start_processing(pipeline::DrainHandler::new(self.clone()))
    }

    /// Stop draining before the next queued entry
    pub fn stop_drain(&self) {
        self.inner.queue.stop_processing();
    }

    pub fn status(&self, id: &MessageId) -> Option<DispatchRecord> {
        self.inner.records.get(id).map(|record| record.value().clone())
    }

    /// Every record, oldest first
    ///
    /// Message ids increase with every allocation, so id order is acceptance order.
    pub fn list_statuses(&self) -> Vec<DispatchRecord> {
        let mut records: Vec<DispatchRecord> = self
            .inner
            .records
            .iter()
            .map(|record| record.value().clone())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Breaker statistics in backend order
    pub fn circuit_stats(&self) -> Vec<CircuitBreakerStats> {
        self.inner
            .routes
            .iter()
            .map(|route| route.breaker.stats())
            .collect()
    }

    pub fn rate_stats(&self) -> RateLimitStats {
        self.inner.rate_limiter.stats()
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.inner.dedup.stats()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn reset_dedup(&self) {
        self.inner.dedup.clear_cache();
    }

    pub fn reset_circuits(&self) {
        for route in &self.inner.routes {
            route.breaker.reset();
        }
    }

    pub fn reset_rate(&self) {
        self.inner.rate_limiter.reset();
    }

    /// Probe every backend's advisory health, in backend order
    pub async fn backend_health(&self) -> Vec<BackendHealth> {
        let probes = self.inner.routes.iter().map(|route| async {
            BackendHealth {
                backend: route.backend.name().to_string(),
                healthy: route.backend.is_healthy().await,
            }
        });

        futures_util::future::join_all(probes).await
    }

    /// Wait until the record for `id` is sent or failed, or `timeout` elapses
    ///
    /// Returns the latest record, which is only terminal if it settled in
    /// time, or `None` for an unknown id. A timeout too large to represent
    /// as an instant waits without a deadline.
    pub async fn wait_for_terminal(&self, id: &MessageId, timeout: Duration) -> Option<DispatchRecord> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let notified = self.inner.settled.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            let record = self.status(id)?;
            if record.status.is_terminal() {
                return Some(record);
            }

            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Some(record);
                    }
                    // A timeout here just means the deadline passed; re-check once more
                    let _ = tokio::time::timeout(remaining, notified).await;
                }
                None => notified.await,
            }
        }
    }

    /// Apply a status transition, waking waiters on terminal states
    fn transition(
        &self,
        id: MessageId,
        status: DispatchStatus,
        outcome: Option<DeliveryOutcome>,
    ) {
        let applied = self
            .inner
            .records
            .get_mut(&id)
            .is_some_and(|mut record| record.transition(status, outcome));

        if applied {
            if status.is_terminal() {
                self.inner.settled.notify_waiters();
            }
        } else {
            tracing::warn!(message_id = %id, status = %status, "Ignored out-of-order status transition");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{backend::SimulatedBackendConfig, circuit_breaker::CircuitState};

    fn message(subject: &str) -> Message {
        Message::builder()
            .from("noreply@example.org")
            .to("user@example.com")
            .subject(subject)
            .text("Hello")
            .build()
            .unwrap()
    }

    fn coordinator() -> Coordinator {
        Coordinator::from_config(DispatchConfig {
            backends: vec![SimulatedBackendConfig::reliable("primary")],
            ..DispatchConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_creates_pending_record_then_sends() {
        let coordinator = coordinator();
        let id = coordinator.submit(message("Welcome"), None).unwrap();

        let record = coordinator.status(&id).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.max_attempts, 3);

        let record = coordinator
            .wait_for_terminal(&id, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(record.status, DispatchStatus::Sent);
        assert_eq!(record.attempts, 1);
        assert!(record.last_attempt_at.is_some());

        let outcome = record.outcome.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.backend, "primary");
    }

    #[tokio::test]
    async fn test_empty_token_rejected_before_allocation() {
        let coordinator = coordinator();

        assert_eq!(
            coordinator.submit_with_token(message("Welcome"), "  ", None),
            Err(ValidationError::EmptyToken)
        );
        assert!(coordinator.list_statuses().is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_and_resets() {
        let coordinator = coordinator();
        let id = coordinator.submit(message("Welcome"), None).unwrap();
        coordinator
            .wait_for_terminal(&id, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(coordinator.rate_stats().current_usage, 1);
        assert_eq!(coordinator.dedup_stats().cached, 1);
        assert_eq!(coordinator.queue_stats().length, 0);

        let circuits = coordinator.circuit_stats();
        assert_eq!(circuits.len(), 1);
        assert_eq!(circuits[0].backend, "primary");
        assert_eq!(circuits[0].state, CircuitState::Closed);

        coordinator.reset_rate();
        coordinator.reset_dedup();
        coordinator.reset_circuits();
        assert_eq!(coordinator.rate_stats().current_usage, 0);
        assert_eq!(coordinator.dedup_stats().cached, 0);
        assert_eq!(coordinator.list_statuses().len(), 1);
    }

    #[tokio::test]
    async fn test_list_statuses_in_acceptance_order() {
        let coordinator = coordinator();
        let ids: Vec<MessageId> = (0..50)
            .map(|n| {
                coordinator
                    .enqueue(message(&format!("Digest {n}")), 0, None)
                    .unwrap()
            })
            .collect();

        let listed: Vec<MessageId> = coordinator
            .list_statuses()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_builder_rejects_duplicate_backend_names() {
        let result = Coordinator::builder(DispatchConfig {
            backends: vec![SimulatedBackendConfig::reliable("primary")],
            ..DispatchConfig::default()
        })
        .backend(SimulatedBackend::new(SimulatedBackendConfig::reliable(
            "primary",
        )))
        .build();

        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "backends.name",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_backend_health() {
        let coordinator = Coordinator::from_config(DispatchConfig {
            backends: vec![
                SimulatedBackendConfig::reliable("primary"),
                SimulatedBackendConfig {
                    healthy: false,
                    ..SimulatedBackendConfig::reliable("secondary")
                },
            ],
            ..DispatchConfig::default()
        })
        .unwrap();

        assert_eq!(
            coordinator.backend_health().await,
            vec![
                BackendHealth {
                    backend: "primary".to_string(),
                    healthy: true
                },
                BackendHealth {
                    backend: "secondary".to_string(),
                    healthy: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_with_unrepresentable_timeout() {
        let coordinator = coordinator();
        let id = coordinator.submit(message("Welcome"), None).unwrap();

        let record = coordinator
            .wait_for_terminal(&id, Duration::MAX)
            .await
            .unwrap();
        assert_eq!(record.status, DispatchStatus::Sent);

        let record = coordinator
            .wait_for_terminal(&id, Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(record.status, DispatchStatus::Sent);
    }

    #[tokio::test]
    async fn test_wait_for_unknown_id() {
        let coordinator = coordinator();
        assert!(
            coordinator
                .wait_for_terminal(&MessageId::generate(), Duration::from_millis(10))
                .await
                .is_none()
        );
    }
}
