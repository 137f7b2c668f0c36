// ABOUTME: Library root for rollstack - exposes the orchestration engine for the binary and tests.
// ABOUTME: The main binary is in main.rs.

pub mod cloud;
pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod output;
pub mod throttle;
pub mod types;
