// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the NamespacedPv mirroring and release protocol.
//!
//! These tests verify the full request/release lifecycle WITHOUT requiring a
//! live Kubernetes cluster. They drive the production decision logic against
//! a simulated volume whose phase transitions mimic the binding subsystem.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_request_deleted_while_bound_waits
//! ```
//!
//! ## Test Categories
//!
//! - **Release protocol tests**: finalizer lifecycle scenarios, including the
//!   safety property (a bound volume is never finalized) and the liveness
//!   property (a released volume is always finalized)
//! - **Mirror tests**: deterministic PersistentVolume generation and drift
//!   detection

mod mirror_tests;
mod release_protocol_tests;

// Re-export for use in tests
pub use mock_state::*;
