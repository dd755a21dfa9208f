//! Shared types for the herald notification dispatcher
//!
//! This crate provides:
//! - The immutable [`Message`] model and its validating builder
//! - Dispatch lifecycle records ([`DispatchRecord`], [`DeliveryOutcome`])
//! - Logging initialisation and the `internal!` logging macro

pub mod error;
pub mod logging;
pub mod message;
pub mod status;

pub use error::ValidationError;
pub use message::{Attachment, Message, MessageBuilder, MessageId};
pub use status::{DeliveryOutcome, DispatchRecord, DispatchStatus};
pub use tracing;

/// Backend tag used on synthetic outcomes that no backend produced.
pub const UNKNOWN_BACKEND: &str = "unknown";
