//! Time sources for the scheduler.
//!
//! The scheduler reads time through [`TimeSource`], so the same fiber code
//! runs against wall-clock time in production and against a
//! [`VirtualClock`] that only moves when the scheduler advances it.

use crate::types::Time;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Time source abstraction.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Time;

    /// Moves the clock forward to `time` if it supports jumping.
    ///
    /// Returns `false` for clocks that can only be waited on, in which case
    /// the scheduler blocks until the deadline instead.
    fn advance_to(&self, time: Time) -> bool {
        let _ = time;
        false
    }

    /// Returns true if time only moves when advanced explicitly.
    fn is_virtual(&self) -> bool {
        false
    }

    /// Creates an independent clock starting at this clock's current time.
    fn fork(&self) -> std::sync::Arc<dyn TimeSource>;
}

/// Wall-clock time measured from the clock's creation.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a wall clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Time::from_nanos(nanos)
    }

    fn fork(&self) -> std::sync::Arc<dyn TimeSource> {
        std::sync::Arc::new(*self)
    }
}

/// Virtual time for deterministic tests.
///
/// # Example
///
/// ```
/// use fiberfx::time::{TimeSource, VirtualClock};
/// use fiberfx::types::Time;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance_to(Time::from_secs(1));
/// assert_eq!(clock.now(), Time::from_secs(1));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock at the given time.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }

    /// Moves forward only; a target in the past is a no-op.
    fn advance_to(&self, time: Time) -> bool {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
        true
    }

    fn is_virtual(&self) -> bool {
        true
    }

    fn fork(&self) -> std::sync::Arc<dyn TimeSource> {
        std::sync::Arc::new(Self::starting_at(self.now()))
    }
}
