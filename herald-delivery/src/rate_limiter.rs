//! Admission control using a sliding time window
//!
//! Every admission is timestamped. A request is admitted only while fewer
//! than `max_requests` admissions fall inside the trailing `window`.
//!
//! # Example
//!
//! ```text
//! Limit: 3 requests per 1000ms
//!
//! t=0ms    admit (1/3)
//! t=100ms  admit (2/3)
//! t=200ms  admit (3/3)
//! t=300ms  reject, oldest admission expires at t=1000ms (wait 700ms)
//! t=1000ms admit (t=0 entry purged)
//! ```

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum admissions inside one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Length of the sliding window (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

const fn default_max_requests() -> u32 {
    100
}

const fn default_window_ms() -> u64 {
    60_000 // One minute
}

/// Smallest pause between two admission attempts while waiting for a slot
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Timestamps of the admissions inside the current window
#[derive(Debug)]
struct SlidingWindow {
    admissions: VecDeque<Instant>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindow {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            admissions: VecDeque::new(),
            max_requests: max_requests as usize,
            window,
        }
    }

    /// Drop admissions that have aged out of the window
    fn purge(&mut self, now: Instant) {
        while self
            .admissions
            .front()
            .is_some_and(|admitted| now.duration_since(*admitted) >= self.window)
        {
            self.admissions.pop_front();
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        self.purge(now);

        if self.admissions.len() < self.max_requests {
            self.admissions.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest admission leaves the window
    fn time_until_slot(&mut self) -> Duration {
        let now = Instant::now();
        self.purge(now);

        if self.admissions.len() < self.max_requests {
            return Duration::ZERO;
        }

        self.admissions.front().map_or(Duration::ZERO, |oldest| {
            self.window.saturating_sub(now.duration_since(*oldest))
        })
    }

    fn usage(&mut self) -> usize {
        self.purge(Instant::now());
        self.admissions.len()
    }
}

/// Sliding-window rate limiter shared by every dispatch
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: parking_lot::Mutex<SlidingWindow>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let window = SlidingWindow::new(
            config.max_requests,
            Duration::from_millis(config.window_ms),
        );

        Self {
            config,
            window: parking_lot::Mutex::new(window),
        }
    }

    /// Try to admit one request without waiting
    ///
    /// Returns `true` and records the admission if a slot is free.
    pub fn acquire(&self) -> bool {
        self.window.lock().try_acquire()
    }

    /// Time until a slot frees up, zero if one is free now
    pub fn time_until_slot(&self) -> Duration {
        self.window.lock().time_until_slot()
    }

    /// Wait until a request is admitted.
    ///
    /// There is no deadline; callers that need one should wrap this in
    /// `tokio::time::timeout`.
    pub async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock();
                if window.try_acquire() {
                    return;
                }
                window.time_until_slot()
            };

            tracing::debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                max_requests = self.config.max_requests,
                "Rate limit reached, waiting for a slot"
            );
            tokio::time::sleep(wait.max(MIN_WAIT)).await;
        }
    }

    /// Admissions currently inside the window
    pub fn current_usage(&self) -> usize {
        self.window.lock().usage()
    }

    /// Admissions still available inside the window
    pub fn remaining_slots(&self) -> usize {
        let mut window = self.window.lock();
        window.max_requests.saturating_sub(window.usage())
    }

    /// Forget every recorded admission
    pub fn reset(&self) {
        self.window.lock().admissions.clear();
        tracing::info!("Rate limiter window reset");
    }

    /// Snapshot of the limiter (for monitoring/debugging)
    pub fn stats(&self) -> RateLimitStats {
        let mut window = self.window.lock();
        let current_usage = window.usage();

        RateLimitStats {
            current_usage,
            remaining_slots: window.max_requests.saturating_sub(current_usage),
            max_requests: self.config.max_requests,
            window_ms: self.config.window_ms,
        }
    }
}

/// Statistics for the rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStats {
    /// Admissions inside the current window
    pub current_usage: usize,
    /// Admissions still available
    pub remaining_slots: usize,
    /// Configured maximum per window
    pub max_requests: u32,
    /// Configured window length (milliseconds)
    pub window_ms: u64,
}
