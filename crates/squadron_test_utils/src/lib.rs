//! # Squadron Test Utilities
//!
//! Shared testing utilities for all crates:
//! - Determinism test harness
//! - Fixture building helpers
//! - Formation invariant checks
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;
pub mod invariants;

/// Re-export proptest for convenience.
pub use proptest;
