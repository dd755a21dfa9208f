//! Idempotency cache with single-flight coalescing
//!
//! Every dispatch runs under a dedup key. The first request for a key becomes
//! the leader and performs the send; concurrent requests with the same key
//! wait for the leader instead of sending again. Only successful outcomes are
//! remembered, so a failed key can be retried by a later request.
//!
//! # Key derivation
//!
//! Keys derived from message content use a fast 64-bit non-cryptographic
//! hash. Collisions are possible: the key is a dedup hint and must never be
//! treated as a security boundary.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use ahash::{AHashMap, AHashSet};
use herald_common::{DeliveryOutcome, Message};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Submitter used when none is given
pub const ANONYMOUS_SUBMITTER: &str = "anonymous";

/// Fixed seeds so equal content always yields the same key within a build
const KEY_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Configuration for duplicate coalescing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How often a waiting duplicate checks on the leader (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a duplicate waits on the leader before giving up (milliseconds)
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

const fn default_poll_interval_ms() -> u64 {
    50
}

const fn default_max_wait_ms() -> u64 {
    30_000
}

/// What a request should do with its key
enum Admission {
    /// A successful outcome is already cached
    Cached(DeliveryOutcome),
    /// Another request with this key is running
    InFlight,
    /// This request performs the send
    Leader,
}

#[derive(Debug, Default)]
struct DedupState {
    results: AHashMap<String, DeliveryOutcome>,
    pending: AHashSet<String>,
}

/// Removes the pending marker when the leader finishes or is dropped
struct PendingGuard<'a> {
    cache: &'a IdempotencyCache,
    key: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.cache.state.lock().pending.remove(self.key);
    }
}

/// Cache of successful outcomes plus the set of in-flight keys
#[derive(Debug, Default)]
pub struct IdempotencyCache {
    config: DedupConfig,
    state: parking_lot::Mutex<DedupState>,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            state: parking_lot::Mutex::new(DedupState::default()),
        }
    }

    /// Derive the dedup key for `message`.
    ///
    /// An explicit `token` wins over content. Otherwise the key covers the
    /// submitter and every message field, with recipient lists sorted so
    /// their order does not matter.
    pub fn generate_key(message: &Message, token: Option<&str>, submitter: Option<&str>) -> String {
        fn sorted(addresses: &[String]) -> Vec<&str> {
            let mut addresses: Vec<&str> = addresses.iter().map(String::as_str).collect();
            addresses.sort_unstable();
            addresses
        }

        if let Some(token) = token {
            return format!("token:{token}");
        }

        let attachments: Vec<(&str, &str, &[u8])> = message
            .attachments()
            .iter()
            .map(|a| (a.filename.as_str(), a.content_type.as_str(), &*a.content))
            .collect();

        let canonical = (
            submitter.unwrap_or(ANONYMOUS_SUBMITTER),
            message.from(),
            sorted(message.to()),
            sorted(message.cc()),
            sorted(message.bcc()),
            message.subject(),
            message.text(),
            message.html(),
            attachments,
        );

        let [k0, k1, k2, k3] = KEY_SEEDS;
        let fingerprint = ahash::RandomState::with_seeds(k0, k1, k2, k3).hash_one(&canonical);

        format!("content:{fingerprint:016x}")
    }

    fn admit(&self, key: &str) -> Admission {
        let mut state = self.state.lock();

        if let Some(outcome) = state.results.get(key) {
            return Admission::Cached(outcome.clone());
        }

        if state.pending.insert(key.to_string()) {
            Admission::Leader
        } else {
            Admission::InFlight
        }
    }

    /// Run `op` at most once per key.
    ///
    /// - A cached outcome is returned without invoking `op`.
    /// - If another request holds the key, wait for its outcome.
    /// - Otherwise invoke `op`; a successful outcome is cached, a failure is not.
    pub async fn execute<F, Fut>(&self, key: &str, op: F) -> Result<DeliveryOutcome, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DeliveryOutcome, DispatchError>>,
    {
        match self.admit(key) {
            Admission::Cached(outcome) => {
                tracing::debug!(key, "Idempotency cache hit, skipping dispatch");
                return Ok(outcome);
            }
            Admission::InFlight => {
                tracing::debug!(key, "Duplicate request in flight, waiting on its outcome");
                return self.wait_for_leader(key).await;
            }
            Admission::Leader => {}
        }

        let _pending = PendingGuard { cache: self, key };
        let result = op().await;

        if let Ok(outcome) = &result
            && outcome.success
        {
            self.state
                .lock()
                .results
                .insert(key.to_string(), outcome.clone());
        }

        result
    }

    /// Poll until the leader for `key` caches a result, fails, or the wait times out
    async fn wait_for_leader(&self, key: &str) -> Result<DeliveryOutcome, DispatchError> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_wait = Duration::from_millis(self.config.max_wait_ms);
        let started = Instant::now();

        loop {
            tokio::time::sleep(poll_interval).await;

            {
                let state = self.state.lock();
                if let Some(outcome) = state.results.get(key) {
                    return Ok(outcome.clone());
                }
                if !state.pending.contains(key) {
                    return Err(DispatchError::DuplicateFailed {
                        key: key.to_string(),
                    });
                }
            }

            let waited = started.elapsed();
            if waited >= max_wait {
                tracing::warn!(key, "Gave up waiting on duplicate request");
                return Err(DispatchError::DedupTimeout {
                    key: key.to_string(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
    }

    pub fn has_result(&self, key: &str) -> bool {
        self.state.lock().results.contains_key(key)
    }

    pub fn get_result(&self, key: &str) -> Option<DeliveryOutcome> {
        self.state.lock().results.get(key).cloned()
    }

    /// Forget the cached outcome for `key`, returning it if there was one
    pub fn remove_from_cache(&self, key: &str) -> Option<DeliveryOutcome> {
        self.state.lock().results.remove(key)
    }

    /// Forget every cached outcome. In-flight keys are left alone.
    pub fn clear_cache(&self) {
        self.state.lock().results.clear();
        tracing::info!("Idempotency cache cleared");
    }

    pub fn cache_size(&self) -> usize {
        self.state.lock().results.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn stats(&self) -> DedupStats {
        let state = self.state.lock();
        DedupStats {
            cached: state.results.len(),
            pending: state.pending.len(),
        }
    }
}

/// Idempotency cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Successful outcomes held in the cache
    pub cached: usize,
    /// Keys with a request in flight
    pub pending: usize,
}
