//! Observable fiber status.

use super::AnyExit;

/// Where a fiber is in its lifecycle.
///
/// `Running` and `Suspended` carry the current top of the fiber's interrupt
/// status stack; `Done` carries the published exit.
#[derive(Debug, Clone)]
pub enum FiberStatus {
    /// Created but never started.
    NotStarted,
    /// The run loop is currently advancing this fiber.
    Running {
        /// Whether an interrupt would take effect immediately.
        interruptible: bool,
    },
    /// Waiting for the scheduler or a future.
    Suspended {
        /// Whether an interrupt would take effect immediately.
        interruptible: bool,
    },
    /// Terminated with a published exit.
    Done(AnyExit),
}

impl FiberStatus {
    /// Returns true if the fiber has terminated.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Returns true if the run loop is active.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns true if the fiber is waiting.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    /// Returns the interruptibility of a live fiber.
    #[must_use]
    pub const fn interruptible(&self) -> Option<bool> {
        match self {
            Self::Running { interruptible } | Self::Suspended { interruptible } => {
                Some(*interruptible)
            }
            Self::NotStarted | Self::Done(_) => None,
        }
    }
}
