//! Bounded execution tracing.
//!
//! Every fiber carries a stack of [`TraceFrame`]s (labels pushed with
//! `Fx::traced`, source locations, fork points). Failures are wrapped in
//! `Cause::Traced` with a bounded snapshot of that stack so a cause can be
//! rendered with the path that produced it.

pub mod buffer;

pub use buffer::{Trace, TraceFrame};
