//! Background drain loop for the priority queue

use std::{future::Future, sync::atomic::Ordering, time::Duration};

use async_trait::async_trait;
use herald_common::internal;

use super::{PriorityQueue, QueueEntry};
use crate::error::{DispatchError, QueueError};

/// Work performed for every dequeued entry
///
/// An `Err` puts the entry back in the queue until it has been retried
/// [`MAX_QUEUE_RETRIES`](super::MAX_QUEUE_RETRIES) times.
#[async_trait]
pub trait QueueHandler<T: Send + Sync>: Send + Sync {
    async fn handle(&self, entry: &QueueEntry<T>) -> Result<(), DispatchError>;
}

#[async_trait]
impl<T, F, Fut> QueueHandler<T> for F
where
    T: Send + Sync + 'static,
    F: Fn(&QueueEntry<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
{
    async fn handle(&self, entry: &QueueEntry<T>) -> Result<(), DispatchError> {
        self(entry).await
    }
}

impl<T: Send + Sync + 'static> PriorityQueue<T> {
    /// Spawn the drain loop on the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyProcessing`] if a drain loop is already running.
    pub fn start_processing<H>(&self, handler: H) -> Result<(), QueueError>
    where
        H: QueueHandler<T> + 'static,
    {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueueError::AlreadyProcessing);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let queue = self.clone();
        tokio::spawn(async move { queue.drain(handler, generation).await });

        Ok(())
    }

    /// Stop the drain loop before its next iteration
    ///
    /// A handler that is already running is left to finish.
    pub fn stop_processing(&self) {
        if self.inner.processing.swap(false, Ordering::SeqCst) {
            internal!(level = INFO, "Queue drain stopping");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
            && self.inner.generation.load(Ordering::SeqCst) == generation
    }

    async fn drain<H: QueueHandler<T>>(self, handler: H, generation: u64) {
        let idle = Duration::from_millis(self.inner.config.idle_poll_ms);
        internal!(level = INFO, "Queue drain started");

        while self.is_current(generation) {
            let Some(mut entry) = self.dequeue() else {
                tokio::time::sleep(idle).await;
                continue;
            };

            match handler.handle(&entry).await {
                Ok(()) => {
                    tracing::debug!(message_id = %entry.id, "Queued entry handled");
                }
                Err(error) if entry.can_retry() => {
                    entry.retry_count += 1;
                    tracing::warn!(
                        message_id = %entry.id,
                        retry_count = entry.retry_count,
                        error = %error,
                        "Queued entry failed, putting it back"
                    );
                    self.insert(entry);
                }
                Err(error) => {
                    tracing::error!(
                        message_id = %entry.id,
                        retry_count = entry.retry_count,
                        error = %error,
                        "Queued entry failed too often, dropping it"
                    );
                }
            }

            tokio::task::yield_now().await;
        }

        internal!(level = INFO, "Queue drain stopped");
    }
}
