//! Policy abstractions for dispatch operations.
//!
//! - [`RetryPolicy`]: Determines retry behavior and timing
//! - [`RetryMechanism`]: Runs an operation under a [`RetryPolicy`]

pub mod retry;

pub use retry::{RetryMechanism, RetryPolicy};
