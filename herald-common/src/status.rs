//! Dispatch lifecycle records

use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageId;

/// Lifecycle state of a submitted message.
///
/// ```text
/// Pending ──> Sending ──> Sent
///               │  ^
///               v  │
///             Retrying ──> Failed
/// ```
///
/// `Sending` may also move straight to `Failed`. `Sent` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Retrying,
}

impl DispatchStatus {
    /// Checks if no further transitions can happen
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    /// Checks whether moving from `self` to `next` keeps the lifecycle monotonic
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sending | Self::Failed)
                | (
                    Self::Sending,
                    Self::Sending | Self::Retrying | Self::Sent | Self::Failed
                )
                | (Self::Retrying, Self::Sending | Self::Failed)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

impl Display for DispatchStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(self.as_str())
    }
}

/// Result of a single delivery performed by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// Identifier assigned by the backend, when it accepted the message
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub backend: String,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryOutcome {
    /// An accepted delivery
    pub fn delivered(backend: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
            backend: backend.into(),
            timestamp: Utc::now(),
        }
    }

    /// A rejected delivery
    pub fn rejected(backend: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
            backend: backend.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle record the dispatcher keeps for every accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: MessageId,
    pub status: DispatchStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub outcome: Option<DeliveryOutcome>,
}

impl DispatchRecord {
    /// Create a new pending record
    #[must_use]
    pub fn new(id: MessageId, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: DispatchStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
            outcome: None,
        }
    }

    /// Move the record to `status`, attaching `outcome` when one is given.
    ///
    /// Every transition into `Sending` counts as an attempt. Returns `false`
    /// and leaves the record untouched when the transition would break the
    /// lifecycle ordering.
    pub fn transition(&mut self, status: DispatchStatus, outcome: Option<DeliveryOutcome>) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }

        let now = Utc::now();
        if status == DispatchStatus::Sending {
            self.attempts = self.attempts.saturating_add(1);
            self.last_attempt_at = Some(now);
        }
        self.status = status;
        self.updated_at = now;
        if outcome.is_some() {
            self.outcome = outcome;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut record = DispatchRecord::new(MessageId::generate(), 3);
        assert_eq!(record.status, DispatchStatus::Pending);
        assert_eq!(record.attempts, 0);

        assert!(record.transition(DispatchStatus::Sending, None));
        assert!(record.transition(DispatchStatus::Retrying, None));
        assert!(record.transition(DispatchStatus::Sending, None));
        assert_eq!(record.attempts, 2);
        assert!(record.last_attempt_at.is_some());

        let outcome = DeliveryOutcome::delivered("primary", "primary-1");
        assert!(record.transition(DispatchStatus::Sent, Some(outcome.clone())));
        assert_eq!(record.outcome, Some(outcome));
        assert!(record.status.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut record = DispatchRecord::new(MessageId::generate(), 3);
        assert!(record.transition(DispatchStatus::Sending, None));
        assert!(record.transition(DispatchStatus::Failed, None));

        assert!(!record.transition(DispatchStatus::Sending, None));
        assert!(!record.transition(DispatchStatus::Sent, None));
        assert_eq!(record.status, DispatchStatus::Failed);
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn test_pending_cannot_skip_to_sent() {
        assert!(!DispatchStatus::Pending.can_transition_to(DispatchStatus::Sent));
        assert!(!DispatchStatus::Pending.can_transition_to(DispatchStatus::Retrying));
        assert!(!DispatchStatus::Retrying.can_transition_to(DispatchStatus::Sent));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DispatchStatus::Retrying.to_string(), "retrying");
        assert_eq!(DispatchStatus::Sent.as_str(), "sent");
    }
}
