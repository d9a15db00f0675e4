//! Identifier and timestamp types.
//!
//! A [`FiberId`] names one logical thread of execution. Ids are allocated from
//! a monotonic [`SequenceNumber`] owned by the platform, so two runtimes that
//! share a platform never hand out the same id.

use core::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A unique identifier for a fiber.
///
/// `FiberId::NONE` is used where an interruption or closure is not
/// attributable to any live fiber (for example a runtime shutdown).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId {
    sequence: u64,
    started_at: Time,
}

impl FiberId {
    /// The id used when no fiber is responsible.
    pub const NONE: Self = Self {
        sequence: 0,
        started_at: Time::ZERO,
    };

    /// Creates a fiber id from its parts.
    #[must_use]
    pub const fn new(sequence: u64, started_at: Time) -> Self {
        Self {
            sequence,
            started_at,
        }
    }

    /// Returns the sequence number of this fiber.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.sequence
    }

    /// Returns the scheduler time at which this fiber was created.
    #[must_use]
    pub const fn started_at(self) -> Time {
        self.started_at
    }

    /// Returns true if this is [`FiberId::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.sequence == 0
    }

    /// Creates a fiber id for tests.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(sequence: u64) -> Self {
        Self::new(sequence, Time::ZERO)
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "FiberId(none)")
        } else {
            write!(f, "FiberId({}@{:?})", self.sequence, self.started_at)
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "F-")
        } else {
            write!(f, "F{}", self.sequence)
        }
    }
}

/// Monotonic source of fiber sequence numbers.
///
/// Cloning shares the underlying counter.
#[derive(Debug, Clone, Default)]
pub struct SequenceNumber {
    next: Arc<AtomicU64>,
}

impl SequenceNumber {
    /// Creates a counter whose first allocated number is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next sequence number.
    pub fn increment(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the most recently allocated number (0 if none).
    #[must_use]
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// A logical timestamp.
///
/// Under a wall clock this is the time elapsed since the clock was created;
/// under a virtual clock it only moves when the scheduler is advanced.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The zero instant.
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a time from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a time from seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the time as nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds (truncated).
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds a duration, saturating on overflow.
    #[must_use]
    pub fn saturating_add(self, delay: Duration) -> Self {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// Returns the duration elapsed since `earlier`, or zero if `earlier` is later.
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub for Time {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        self.duration_since(rhs)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}
