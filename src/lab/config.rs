//! Configuration for the lab runtime.
//!
//! The lab always runs on virtual time; the configuration controls the
//! interpreter knobs that affect scheduling order:
//! - Op budget before a fiber yields
//! - Trace bound
//! - Root concurrency level and finalization strategy

use crate::runtime::config::{
    ClockKind, RuntimeConfig, DEFAULT_MAX_OP_COUNT, DEFAULT_MAX_TRACE_COUNT,
};
use crate::scope::FinalizationStrategy;

/// Configuration for the lab runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabConfig {
    /// Synchronous steps a fiber may take before it yields.
    pub max_op_count: usize,
    /// Trace frames kept per fiber.
    pub max_trace_count: usize,
    /// Concurrency level of root fibers.
    pub default_concurrency: usize,
    /// How scopes run their finalizers.
    pub finalization: FinalizationStrategy,
    /// Whether [`lab::test`](super::test) fails when root fibers are still
    /// alive after the test body.
    pub panic_on_leak: bool,
}

impl LabConfig {
    /// Creates a lab configuration with the runtime defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_op_count: DEFAULT_MAX_OP_COUNT,
            max_trace_count: DEFAULT_MAX_TRACE_COUNT,
            default_concurrency: usize::MAX,
            finalization: FinalizationStrategy::Sequential,
            panic_on_leak: true,
        }
    }

    /// Sets the op budget.
    #[must_use]
    pub const fn max_op_count(mut self, value: usize) -> Self {
        self.max_op_count = value;
        self
    }

    /// Sets the trace bound.
    #[must_use]
    pub const fn max_trace_count(mut self, value: usize) -> Self {
        self.max_trace_count = value;
        self
    }

    /// Sets the root concurrency level.
    #[must_use]
    pub const fn default_concurrency(mut self, value: usize) -> Self {
        self.default_concurrency = value;
        self
    }

    /// Sets the finalization strategy.
    #[must_use]
    pub const fn finalization(mut self, value: FinalizationStrategy) -> Self {
        self.finalization = value;
        self
    }

    /// Sets whether leaked root fibers fail a lab test.
    #[must_use]
    pub const fn panic_on_leak(mut self, value: bool) -> Self {
        self.panic_on_leak = value;
        self
    }

    /// Returns the equivalent runtime configuration.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig {
            max_op_count: self.max_op_count,
            max_trace_count: self.max_trace_count,
            default_concurrency: self.default_concurrency,
            finalization: self.finalization,
            clock: ClockKind::Virtual,
        };
        config.normalize();
        config
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        Self::new()
    }
}
