//! Service trait abstraction for dispatch state
//!
//! The CLI's `stats` snapshot reads the dispatcher through this trait rather
//! than through the concrete [`Coordinator`].

use herald_common::{DispatchRecord, DispatchStatus, MessageId};

use crate::{
    Coordinator, circuit_breaker::CircuitBreakerStats, idempotency::DedupStats,
    queue::QueueStats, rate_limiter::RateLimitStats,
};

/// Read-only and administrative view of a dispatcher
///
/// # Example
///
/// ```rust,ignore
/// fn failed_count(service: &dyn DispatchQueryService) -> usize {
///     service.list_statuses(Some(DispatchStatus::Failed)).len()
/// }
/// ```
pub trait DispatchQueryService: Send + Sync {
    /// Get the record for a specific message
    ///
    /// Returns `None` if the id was never accepted.
    fn status(&self, id: &MessageId) -> Option<DispatchRecord>;

    /// List every record, optionally only those with the given status
    fn list_statuses(&self, status: Option<DispatchStatus>) -> Vec<DispatchRecord>;

    fn circuit_stats(&self) -> Vec<CircuitBreakerStats>;

    fn rate_stats(&self) -> RateLimitStats;

    fn dedup_stats(&self) -> DedupStats;

    fn queue_stats(&self) -> QueueStats;

    /// Forget every cached outcome so identical messages are sent again
    fn reset_dedup(&self);

    /// Close every circuit and forget recorded failures
    fn reset_circuits(&self);

    fn reset_rate(&self);
}

impl DispatchQueryService for Coordinator {
    fn status(&self, id: &MessageId) -> Option<DispatchRecord> {
        Self::status(self, id)
    }

    fn list_statuses(&self, status: Option<DispatchStatus>) -> Vec<DispatchRecord> {
        let records = Self::list_statuses(self);
        match status {
            Some(status) => records
                .into_iter()
                .filter(|record| record.status == status)
                .collect(),
            None => records,
        }
    }

    fn circuit_stats(&self) -> Vec<CircuitBreakerStats> {
        Self::circuit_stats(self)
    }

    fn rate_stats(&self) -> RateLimitStats {
        Self::rate_stats(self)
    }

    fn dedup_stats(&self) -> DedupStats {
        Self::dedup_stats(self)
    }

    fn queue_stats(&self) -> QueueStats {
        Self::queue_stats(self)
    }

    fn reset_dedup(&self) {
        Self::reset_dedup(self);
    }

    fn reset_circuits(&self) {
        Self::reset_circuits(self);
    }

    fn reset_rate(&self) {
        Self::reset_rate(self);
    }
}
