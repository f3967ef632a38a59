//! HOOPWATCH: live basketball totals poller.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod logging;
pub mod types;
pub mod page;
pub mod engine;
pub mod dashboard;
