//! Priority queue for deferred dispatch
//!
//! Entries are kept in descending priority order. Entries of equal priority
//! keep their insertion order, so the queue is a total preorder with a FIFO
//! tie-break. A background drain loop (see [`drain`]) consumes the head.

pub mod drain;

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use herald_common::MessageId;
use serde::{Deserialize, Serialize};

pub use self::drain::QueueHandler;
use crate::error::QueueError;

/// How many times a failed entry is put back before it is dropped
pub const MAX_QUEUE_RETRIES: u32 = 3;

/// Configuration for the queue drain loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long the drain loop sleeps when the queue is empty (milliseconds)
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

const fn default_idle_poll_ms() -> u64 {
    100
}

/// A queued unit of deferred work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry<T> {
    pub id: MessageId,
    pub payload: T,
    /// Higher values are dequeued first
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    /// How often this entry has been put back after a failed drain
    pub retry_count: u32,
}

impl<T> QueueEntry<T> {
    fn new(id: MessageId, payload: T, priority: i32) -> Self {
        Self {
            id,
            payload,
            priority,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Whether a failure of this entry would put it back in the queue
    pub const fn can_retry(&self) -> bool {
        self.retry_count < MAX_QUEUE_RETRIES
    }
}

#[derive(Debug)]
struct QueueInner<T> {
    config: QueueConfig,
    entries: parking_lot::Mutex<VecDeque<QueueEntry<T>>>,
    processing: AtomicBool,
    /// Bumped on every start so a stopped loop never outlives a restart
    generation: AtomicU64,
}

/// Ordered list of deferred work, shared between producers and the drain loop
#[derive(Debug)]
pub struct PriorityQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for PriorityQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl<T> PriorityQueue<T> {
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                entries: parking_lot::Mutex::new(VecDeque::new()),
                processing: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Add `payload` behind every entry of the same or higher priority
    pub fn enqueue(&self, id: MessageId, payload: T, priority: i32) {
        self.insert(QueueEntry::new(id, payload, priority));
        tracing::debug!(message_id = %id, priority, "Entry queued");
    }

    fn insert(&self, entry: QueueEntry<T>) {
        let mut entries = self.inner.entries.lock();
        let position = entries
            .iter()
            .position(|queued| queued.priority < entry.priority)
            .unwrap_or(entries.len());
        entries.insert(position, entry);
    }

    /// Take the highest-priority, oldest entry
    pub fn dequeue(&self) -> Option<QueueEntry<T>> {
        self.inner.entries.lock().pop_front()
    }

    pub fn remove(&self, id: &MessageId) -> Option<QueueEntry<T>> {
        let mut entries = self.inner.entries.lock();
        let position = entries.iter().position(|entry| entry.id == *id)?;
        entries.remove(position)
    }

    /// Move an entry to its place for `priority`, behind existing entries of equal priority
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if no entry with `id` is queued.
    pub fn update_priority(&self, id: &MessageId, priority: i32) -> Result<(), QueueError> {
        let mut entries = self.inner.entries.lock();
        let position = entries
            .iter()
            .position(|entry| entry.id == *id)
            .ok_or(QueueError::NotFound(*id))?;

        if let Some(mut entry) = entries.remove(position) {
            entry.priority = priority;
            let position = entries
                .iter()
                .position(|queued| queued.priority < priority)
                .unwrap_or(entries.len());
            entries.insert(position, entry);
        }

        Ok(())
    }

    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Whether a drain loop is running
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        let entries = self.inner.entries.lock();
        QueueStats {
            length: entries.len(),
            processing: self.is_processing(),
            highest_priority: entries.front().map(|entry| entry.priority),
        }
    }
}

impl<T: Clone> PriorityQueue<T> {
    pub fn get_item_by_id(&self, id: &MessageId) -> Option<QueueEntry<T>> {
        self.inner
            .entries
            .lock()
            .iter()
            .find(|entry| entry.id == *id)
            .cloned()
    }

    /// Snapshot of every entry in dequeue order
    pub fn get_items(&self) -> Vec<QueueEntry<T>> {
        self.inner.entries.lock().iter().cloned().collect()
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub length: usize,
    pub processing: bool,
    /// Priority of the head entry, if any
    pub highest_priority: Option<i32>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn payloads(queue: &PriorityQueue<&'static str>) -> Vec<&'static str> {
        queue.get_items().into_iter().map(|e| e.payload).collect()
    }

    #[test]
    fn test_priority_order_with_fifo_ties() {
        let queue = PriorityQueue::default();
        queue.enqueue(MessageId::generate(), "a", 5);
        queue.enqueue(MessageId::generate(), "b", 10);
        queue.enqueue(MessageId::generate(), "c", 5);

        assert_eq!(payloads(&queue), vec!["b", "a", "c"]);
        assert_eq!(queue.dequeue().map(|e| e.payload), Some("b"));
        assert_eq!(queue.dequeue().map(|e| e.payload), Some("a"));
        assert_eq!(queue.dequeue().map(|e| e.payload), Some("c"));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_remove_and_lookup() {
        let queue = PriorityQueue::default();
        let first = MessageId::generate();
        let second = MessageId::generate();
        queue.enqueue(first, "first", 1);
        queue.enqueue(second, "second", 1);

        assert_eq!(queue.get_item_by_id(&second).map(|e| e.payload), Some("second"));
        assert_eq!(queue.remove(&first).map(|e| e.payload), Some("first"));
        assert!(queue.remove(&first).is_none());
        assert!(queue.get_item_by_id(&first).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_update_priority_reorders() {
        let queue = PriorityQueue::default();
        let low = MessageId::generate();
        queue.enqueue(low, "low", 1);
        queue.enqueue(MessageId::generate(), "high", 10);
        queue.enqueue(MessageId::generate(), "other", 10);

        queue.update_priority(&low, 10).unwrap();
        assert_eq!(payloads(&queue), vec!["high", "other", "low"]);

        let missing = MessageId::generate();
        assert_eq!(
            queue.update_priority(&missing, 3),
            Err(QueueError::NotFound(missing))
        );
    }

    #[test]
    fn test_stats_and_clear() {
        let queue = PriorityQueue::default();
        assert_eq!(
            queue.stats(),
            QueueStats {
                length: 0,
                processing: false,
                highest_priority: None
            }
        );

        queue.enqueue(MessageId::generate(), "a", -2);
        queue.enqueue(MessageId::generate(), "b", 7);
        assert_eq!(queue.stats().highest_priority, Some(7));
        assert_eq!(queue.stats().length, 2);

        queue.clear();
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn dequeue_order_is_stable_by_priority(priorities in prop::collection::vec(-5i32..5, 0..40)) {
            let queue = PriorityQueue::default();
            for (index, priority) in priorities.iter().enumerate() {
                queue.enqueue(MessageId::generate(), index, *priority);
            }

            let mut expected: Vec<(i32, usize)> = priorities
                .iter()
                .enumerate()
                .map(|(index, priority)| (*priority, index))
                .collect();
            // Stable sort keeps insertion order among equal priorities
            expected.sort_by(|a, b| b.0.cmp(&a.0));

            let actual: Vec<(i32, usize)> = std::iter::from_fn(|| queue.dequeue())
                .map(|entry| (entry.priority, entry.payload))
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
