//! Shared test utilities for yuedu integration tests.
//!
//! - `TestHarness`: file-backed database in a temp dir with store, leases,
//!   bus and service wired together
//! - Providers that replay scripted output, optionally gated step by step

pub mod harness;
pub mod providers;

pub use harness::TestHarness;
pub use providers::*;
