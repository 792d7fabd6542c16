//! Integration test suite for patchup
//!
//! End-to-end tests against a local HTTP server standing in for the update
//! server.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **manifest_fetch**: HTTP outcomes of the manifest request
//! - **update_flow**: check, stage and apply across a simulated restart
//! - **swap_atomicity**: backup and restore when an install step fails
//! - **cli**: the `patchup` binary

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod manifest_fetch;
mod swap_atomicity;
mod update_flow;
