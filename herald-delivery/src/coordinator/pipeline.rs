//! The per-message dispatch pipeline
//!
//! ```text
//! sending ─> rate slot ─> dedup(key) ─> backend 1: breaker(retry(send))
//!                                        │ failure
//!                                        v
//!                                       backend 2: breaker(retry(send)) ...
//! ```
//!
//! Retry exhaustion counts as one failure for the backend's breaker. Only
//! running out of backends fails the message.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use herald_common::{DeliveryOutcome, DispatchStatus, Message, MessageId, UNKNOWN_BACKEND};

use super::{Coordinator, QueuedDispatch, Route};
use crate::{
    error::DispatchError,
    queue::{QueueEntry, QueueHandler},
};

impl Coordinator {
    /// Run the pipeline for an immediately submitted message and record the result
    pub(super) async fn process(&self, id: MessageId, message: Arc<Message>, key: &str) {
        let result = self.dispatch(id, &message, key).await;
        self.settle(id, result);
    }

    /// Rate limit, then deduplicate and dispatch with fallback
    async fn dispatch(
        &self,
        id: MessageId,
        message: &Message,
        key: &str,
    ) -> Result<DeliveryOutcome, DispatchError> {
        self.transition(id, DispatchStatus::Sending, None);
        self.inner.rate_limiter.wait_for_slot().await;

        // The first send belongs to the attempt recorded above
        let first_send = AtomicBool::new(true);
        self.inner
            .dedup
            .execute(key, || self.dispatch_with_fallback(id, message, &first_send))
            .await
    }

    /// Record the terminal status for a finished pipeline
    fn settle(&self, id: MessageId, result: Result<DeliveryOutcome, DispatchError>) {
        match result {
            Ok(outcome) => {
                tracing::info!(message_id = %id, backend = %outcome.backend, "Message sent");
                self.transition(id, DispatchStatus::Sent, Some(outcome));
            }
            Err(error) => {
                tracing::error!(message_id = %id, error = %error, "Message dispatch failed");
                self.transition(
                    id,
                    DispatchStatus::Failed,
                    Some(DeliveryOutcome::rejected(UNKNOWN_BACKEND, error.to_string())),
                );
            }
        }
    }

    /// Try every backend in order until one accepts the message
    async fn dispatch_with_fallback(
        &self,
        id: MessageId,
        message: &Message,
        first_send: &AtomicBool,
    ) -> Result<DeliveryOutcome, DispatchError> {
        let routes = &self.inner.routes;
        let mut last_error = None;

        for route in routes {
            let backend = route.backend.name();
            let send = move || self.send_once(id, route, message, first_send);
            let on_retry = move |attempt: u32, error: &DispatchError, delay: Duration| {
                tracing::warn!(
                    message_id = %id,
                    backend,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Send failed, retrying"
                );
                self.transition(id, DispatchStatus::Retrying, None);
            };

            let result = route
                .breaker
                .execute(move || {
                    self.inner
                        .retry
                        .execute_classified(send, DispatchError::is_retryable, on_retry)
                })
                .await;

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(error) => {
                    tracing::warn!(
                        message_id = %id,
                        backend,
                        error = %error,
                        "Backend failed, falling back"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.map_or(DispatchError::NoBackends, |last| {
            DispatchError::Exhausted {
                attempted: routes.len(),
                last: Box::new(last),
            }
        }))
    }

    /// One send through one backend
    ///
    /// A structured failure outcome is turned into an error so the retry
    /// executor and the breaker both see it as a failure.
    async fn send_once(
        &self,
        id: MessageId,
        route: &Route,
        message: &Message,
        first_send: &AtomicBool,
    ) -> Result<DeliveryOutcome, DispatchError> {
        if !first_send.swap(false, Ordering::SeqCst) {
            self.transition(id, DispatchStatus::Sending, None);
        }

        let outcome = route.backend.send(message).await?;
        if outcome.success {
            Ok(outcome)
        } else {
            Err(DispatchError::Provider {
                backend: route.backend.name().to_string(),
                message: outcome
                    .error
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            })
        }
    }
}

/// Drains the coordinator's queue through the same pipeline as `submit`
pub(super) struct DrainHandler {
    coordinator: Coordinator,
}

impl DrainHandler {
    pub(super) const fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl QueueHandler<QueuedDispatch> for DrainHandler {
    async fn handle(&self, entry: &QueueEntry<QueuedDispatch>) -> Result<(), DispatchError> {
        let coordinator = &self.coordinator;
        let dispatch = &entry.payload;

        match coordinator
            .dispatch(entry.id, &dispatch.message, &dispatch.key)
            .await
        {
            Ok(outcome) => {
                coordinator.settle(entry.id, Ok(outcome));
                Ok(())
            }
            Err(error) if entry.can_retry() => {
                tracing::warn!(
                    message_id = %entry.id,
                    retry_count = entry.retry_count,
                    error = %error,
                    "Queued dispatch failed, will retry"
                );
                coordinator.transition(entry.id, DispatchStatus::Retrying, None);
                Err(error)
            }
            Err(error) => {
                coordinator.settle(entry.id, Err(error.clone()));
                Err(error)
            }
        }
    }
}
