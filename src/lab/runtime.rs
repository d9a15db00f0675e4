//! Lab runtime for deterministic execution.
//!
//! The lab runtime executes fibers with:
//! - Virtual time (controlled advancement)
//! - Deterministic ordering (timers fire by deadline, then insertion order)
//! - A leak check on teardown

use super::config::LabConfig;
use crate::error::RunError;
use crate::fx::Fx;
use crate::runtime::{Fiber, Runtime};
use crate::time::Scheduler;
use crate::types::{Data, Exit, Time};
use std::time::Duration;

/// The deterministic lab runtime.
///
/// Nothing happens until the lab is driven: [`run`](Self::run) drives until
/// its fiber finishes, [`advance`](Self::advance) moves virtual time, and
/// [`run_until_idle`](Self::run_until_idle) jumps time from deadline to
/// deadline until no timers are left.
#[derive(Debug, Clone)]
pub struct LabRuntime {
    runtime: Runtime,
    config: LabConfig,
}

impl LabRuntime {
    /// Creates a new lab runtime with the given configuration.
    #[must_use]
    pub fn new(config: LabConfig) -> Self {
        Self {
            runtime: Runtime::with_config(config.runtime_config()),
            config,
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.scheduler().now()
    }

    /// Returns the number of scheduler tasks run so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.scheduler().executed()
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub const fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Returns the underlying runtime.
    #[must_use]
    pub const fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Returns the virtual-time scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        self.runtime.scheduler()
    }

    /// Returns true if no timers are pending and no root fiber is alive.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.scheduler().pending() == 0 && self.runtime.root_count() == 0
    }

    /// Advances virtual time by `by`, firing timers as their deadlines pass.
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        self.scheduler().advance(by)
    }

    /// Advances time to the given absolute time.
    pub fn advance_to(&self, time: Time) -> usize {
        self.advance(time.duration_since(self.now()))
    }

    /// Runs tasks ready now, without moving time.
    pub fn run_ready(&self) -> usize {
        self.scheduler().run_ready()
    }

    /// Runs until no timers are left, jumping time to each deadline.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let ran = self.scheduler().run_until_idle();
        tracing::trace!(ran, now = %self.now(), "lab idle");
        ran
    }

    /// Starts `fx` as a root fiber without driving.
    pub fn run_fiber<A: Data, E: Data>(&self, fx: Fx<A, E>) -> Fiber<A, E> {
        self.runtime.run_fiber(fx)
    }

    /// Runs `fx` to completion and returns its exit.
    pub fn run_exit<A: Data, E: Data>(&self, fx: Fx<A, E>) -> Exit<A, E> {
        self.runtime.run_exit(fx)
    }

    /// Runs `fx` to completion and returns its value.
    pub fn run<A: Data, E: Data>(&self, fx: Fx<A, E>) -> Result<A, RunError<E>> {
        self.runtime.run(fx)
    }
}

impl Default for LabRuntime {
    fn default() -> Self {
        Self::new(LabConfig::default())
    }
}

/// Convenience function for running a test with the lab runtime.
///
/// After `f` returns the lab is driven until idle; with
/// [`LabConfig::panic_on_leak`] set, any root fiber still alive then fails
/// the test.
pub fn test<F, R>(config: LabConfig, f: F) -> R
where
    F: FnOnce(&LabRuntime) -> R,
{
    let lab = LabRuntime::new(config);
    let result = f(&lab);

    lab.run_until_idle();
    let leaked = lab.runtime().root_count();
    if leaked > 0 {
        tracing::warn!(leaked, "root fibers alive after lab test");
    }
    assert!(
        !config.panic_on_leak || leaked == 0,
        "Lab runtime leaked {leaked} root fiber(s)"
    );

    result
}
