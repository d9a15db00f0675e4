//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `max_op_count` | 2048 |
//! | `max_trace_count` | 50 |
//! | `default_concurrency` | unbounded (`usize::MAX`) |
//! | `finalization` | [`FinalizationStrategy::Sequential`] |
//! | `clock` | [`ClockKind::Wall`] |

use crate::scope::FinalizationStrategy;
use std::fmt;
use std::str::FromStr;

/// Default number of synchronous steps before a fiber yields.
pub const DEFAULT_MAX_OP_COUNT: usize = 2048;
/// Default number of trace frames kept per fiber.
pub const DEFAULT_MAX_TRACE_COUNT: usize = 50;

/// Which time source drives the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockKind {
    /// Real elapsed time; timers fire when their deadline passes.
    #[default]
    Wall,
    /// Virtual time that only moves when the scheduler is advanced.
    Virtual,
}

impl fmt::Display for ClockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wall => write!(f, "wall"),
            Self::Virtual => write!(f, "virtual"),
        }
    }
}

impl FromStr for ClockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wall" => Ok(Self::Wall),
            "virtual" => Ok(Self::Virtual),
            other => Err(format!("expected `wall` or `virtual`, got {other:?}")),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Synchronous steps a fiber may take before it must yield.
    pub max_op_count: usize,
    /// Trace frames kept per fiber.
    pub max_trace_count: usize,
    /// Concurrency level of root fibers (how many forked children may run
    /// at once).
    pub default_concurrency: usize,
    /// How scopes run their finalizers.
    pub finalization: FinalizationStrategy,
    /// Time source of the scheduler.
    pub clock: ClockKind,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.max_op_count == 0 {
            self.max_op_count = 1;
        }
        if self.default_concurrency == 0 {
            self.default_concurrency = 1;
        }
        if let FinalizationStrategy::ConcurrentN(0) = self.finalization {
            self.finalization = FinalizationStrategy::ConcurrentN(1);
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_op_count: DEFAULT_MAX_OP_COUNT,
            max_trace_count: DEFAULT_MAX_TRACE_COUNT,
            default_concurrency: usize::MAX,
            finalization: FinalizationStrategy::Sequential,
            clock: ClockKind::Wall,
        }
    }
}
