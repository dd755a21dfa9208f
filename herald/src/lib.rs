//! Command-line front end for the herald dispatcher
//!
//! - Configuration discovery and loading
//! - The `send`, `check-config` and `health` commands

pub mod commands;
pub mod config;
