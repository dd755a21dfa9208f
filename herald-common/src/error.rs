//! Error types for the herald-common crate.

use thiserror::Error;

/// Errors raised while validating a message before it is accepted.
///
/// A message that fails validation never receives an id and never gets a
/// dispatch record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was not supplied.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// The message has no `to` recipients.
    #[error("Message must have at least one recipient")]
    NoRecipients,

    /// An address could not be parsed as a single mailbox.
    #[error("Invalid {field} address: {address}")]
    InvalidAddress { field: &'static str, address: String },

    /// Neither a text nor an HTML body was supplied.
    #[error("Message must have a text or HTML body")]
    EmptyBody,

    /// An attachment is malformed.
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),

    /// An explicit idempotency token was empty.
    #[error("Idempotency token must not be empty")]
    EmptyToken,
}
