//! Deterministic lab runtime for testing.
//!
//! The lab runtime provides:
//!
//! - Virtual time (no wall-clock dependencies)
//! - Deterministic ordering of fiber resumptions
//! - A teardown check that no root fiber was leaked

pub mod config;
pub mod runtime;

pub use config::LabConfig;
pub use runtime::{test, LabRuntime};
