//! Test utilities for the load test harness.
//!
//! This crate provides a mock target service and logging setup for integration tests. See the
//! modules for all available utilities.

pub mod server;
pub mod tracing;
