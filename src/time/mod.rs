//! Time: clocks and the timer-queue scheduler.
//!
//! # Virtual vs Wall Time
//!
//! A [`Scheduler`] reads time from a [`TimeSource`]. Under a [`WallClock`]
//! driving the scheduler waits for deadlines; under a [`VirtualClock`] it
//! jumps straight to them, which makes time-dependent programs deterministic
//! in tests.
//!
//! # Example
//!
//! ```
//! use fiberfx::time::Scheduler;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::virtual_time();
//! scheduler.set_timer(|now| assert_eq!(now.as_millis(), 10), Duration::from_millis(10));
//! scheduler.run_until_idle();
//! ```

mod clock;
mod scheduler;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use scheduler::{Scheduler, Task, TimerHandle};
