//! Shared test helpers for dispatch integration tests
#![allow(dead_code)] // Test utility module - not all helpers used in every test

pub mod mock_backend;
