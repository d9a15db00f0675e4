//! Runtime builder and the runtime entry point.

use crate::error::{ConfigError, RunError};
use crate::fiber_ref::FiberRefs;
use crate::fx::{Env, Fx};
use crate::runtime::config::{ClockKind, RuntimeConfig};
use crate::runtime::context::{FiberContext, Platform};
use crate::runtime::env_config;
use crate::runtime::fiber::{Fiber, FiberRuntime};
use crate::scope::{FinalizationStrategy, Scope};
use crate::time::Scheduler;
use crate::types::{Cause, Data, Exit, FiberId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for constructing a runtime with custom configuration.
///
/// Values set here win over environment variables and config files, no
/// matter the order in which the builder methods are called.
#[derive(Clone, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    max_op_count: Option<usize>,
    max_trace_count: Option<usize>,
    default_concurrency: Option<usize>,
    finalization: Option<FinalizationStrategy>,
    clock: Option<ClockKind>,
    env: Env,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many synchronous steps a fiber may take before yielding.
    #[must_use]
    pub fn max_op_count(mut self, n: usize) -> Self {
        self.max_op_count = Some(n);
        self
    }

    /// Set how many trace frames each fiber keeps.
    #[must_use]
    pub fn max_trace_count(mut self, n: usize) -> Self {
        self.max_trace_count = Some(n);
        self
    }

    /// Set the concurrency level of root fibers.
    #[must_use]
    pub fn default_concurrency(mut self, level: usize) -> Self {
        self.default_concurrency = Some(level);
        self
    }

    /// Set how scopes run their finalizers.
    #[must_use]
    pub fn finalization(mut self, strategy: FinalizationStrategy) -> Self {
        self.finalization = Some(strategy);
        self
    }

    /// Set the scheduler's time source.
    #[must_use]
    pub fn clock(mut self, clock: ClockKind) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Run on virtual time.
    #[must_use]
    pub fn virtual_time(self) -> Self {
        self.clock(ClockKind::Virtual)
    }

    /// Set the environment every root fiber starts with.
    #[must_use]
    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    /// Apply `FIBERFX_*` environment variables.
    ///
    /// Environment values override config-file values but not values set
    /// with builder methods.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Create a builder from a TOML config file.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let toml = env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &toml)?;
        Ok(builder)
    }

    /// Create a builder from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let toml = env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &toml)?;
        Ok(builder)
    }

    /// Resolve the final configuration without building a runtime.
    #[must_use]
    pub fn resolved_config(&self) -> RuntimeConfig {
        let mut config = self.config.clone();
        if let Some(n) = self.max_op_count {
            config.max_op_count = n;
        }
        if let Some(n) = self.max_trace_count {
            config.max_trace_count = n;
        }
        if let Some(level) = self.default_concurrency {
            config.default_concurrency = level;
        }
        if let Some(strategy) = self.finalization {
            config.finalization = strategy;
        }
        if let Some(clock) = self.clock {
            config.clock = clock;
        }
        config.normalize();
        config
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime, ConfigError> {
        let config = self.resolved_config();
        Ok(Runtime::from_parts(config, self.env))
    }
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.resolved_config())
            .finish_non_exhaustive()
    }
}

type Roots = Arc<Mutex<HashMap<FiberId, Arc<FiberRuntime>>>>;

/// Runs effect programs as root fibers on one scheduler.
///
/// Cloning shares the scheduler and the set of live root fibers.
#[derive(Clone)]
pub struct Runtime {
    platform: Platform,
    config: RuntimeConfig,
    env: Env,
    roots: Roots,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Creates a runtime from an explicit configuration.
    #[must_use]
    pub fn with_config(mut config: RuntimeConfig) -> Self {
        config.normalize();
        Self::from_parts(config, Env::new())
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    fn from_parts(config: RuntimeConfig, env: Env) -> Self {
        let scheduler = match config.clock {
            ClockKind::Wall => Scheduler::wall(),
            ClockKind::Virtual => Scheduler::virtual_time(),
        };
        let platform = Platform::new(scheduler)
            .with_max_op_count(config.max_op_count)
            .with_max_trace_count(config.max_trace_count)
            .with_finalization(config.finalization);
        tracing::debug!(
            max_op_count = config.max_op_count,
            max_trace_count = config.max_trace_count,
            clock = %config.clock,
            finalization = %config.finalization,
            "runtime created"
        );
        Self {
            platform,
            config,
            env,
            roots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the scheduler driving this runtime's fibers.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        self.platform.scheduler()
    }

    /// Returns the platform shared by this runtime's fibers.
    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the number of root fibers that have not finished.
    #[must_use]
    pub fn root_count(&self) -> usize {
        self.roots.lock().len()
    }

    /// Starts `fx` as a root fiber without driving the scheduler.
    ///
    /// The fiber makes progress whenever the scheduler runs, for example
    /// from [`run`](Self::run) or [`Scheduler::run_until_idle`].
    pub fn run_fiber<A: Data, E: Data>(&self, fx: Fx<A, E>) -> Fiber<A, E> {
        let id = self.platform.next_fiber_id();
        let context = FiberContext::root(
            id,
            self.platform.clone(),
            FiberRefs::new(),
            self.config.default_concurrency,
        );
        let scope = Scope::new(id, self.platform.finalization());
        let fiber = FiberRuntime::new(context, scope, fx.into_node(), self.env.clone(), Vec::new());

        self.roots.lock().insert(id, Arc::clone(&fiber));
        let roots = Arc::downgrade(&self.roots);
        fiber.done().observe(move |_| {
            if let Some(roots) = roots.upgrade() {
                roots.lock().remove(&id);
            }
        });

        fiber.start();
        Fiber::new(fiber)
    }

    /// Runs `fx` to completion and returns its exit.
    ///
    /// Drives the scheduler on the calling thread. If the fiber is left
    /// waiting on something nothing can complete (possible only on virtual
    /// time), the exit is a defect.
    pub fn run_exit<A: Data, E: Data>(&self, fx: Fx<A, E>) -> Exit<A, E> {
        let fiber = self.run_fiber(fx);
        if !self.scheduler().drive_until(|| fiber.is_done()) {
            tracing::warn!(fiber_id = %fiber.id(), "fiber stalled with no pending timers");
            return Exit::Failure(Cause::die("fiber is suspended and no task can resume it"));
        }
        fiber
            .poll()
            .unwrap_or_else(|| Exit::Failure(Cause::die("fiber finished without an exit")))
    }

    /// Runs `fx` to completion and returns its value.
    pub fn run<A: Data, E: Data>(&self, fx: Fx<A, E>) -> Result<A, RunError<E>> {
        match self.run_exit(fx) {
            Exit::Success(value) => Ok(value),
            Exit::Failure(cause) => Err(RunError::from_cause(&cause)),
        }
    }

    /// Interrupts every root fiber still running and drives the scheduler
    /// until they have finished.
    ///
    /// Returns the number of fibers interrupted.
    pub fn shutdown(&self) -> usize {
        let roots: Vec<Arc<FiberRuntime>> = self.roots.lock().values().cloned().collect();
        for root in &roots {
            root.interrupt_as(FiberId::NONE);
        }
        let drained = self.scheduler().drive_until(|| self.roots.lock().is_empty());
        tracing::debug!(interrupted = roots.len(), drained, "runtime shut down");
        roots.len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("roots", &self.root_count())
            .finish_non_exhaustive()
    }
}
