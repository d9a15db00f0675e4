#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use fiberfx::lab::{LabConfig, LabRuntime};
use fiberfx::types::{AnyExit, Exit, Value};
use fiberfx::{AsyncCallback, AsyncRegistration, Fx};
use parking_lot::Mutex;
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "FIBERFX_PROPTEST_SEED";
const PROPTEST_MAX_SHRINK_ITERS_ENV: &str = "FIBERFX_PROPTEST_MAX_SHRINK_ITERS";

/// Configuration for property tests with optional deterministic seed support.
#[derive(Debug, Clone)]
pub struct PropertyTestConfig {
    /// Fixed seed for reproducibility (overrides CI default when set).
    pub seed: Option<u64>,
    /// Number of successful cases required.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl PropertyTestConfig {
    /// Build a config with defaults for property tests.
    #[must_use]
    pub fn new(cases: u32) -> Self {
        Self {
            seed: read_proptest_seed(),
            cases,
            max_shrink_iters: read_max_shrink_iters()
                .unwrap_or(ProptestConfig::default().max_shrink_iters),
        }
    }

    /// Convert into a ProptestConfig, applying deterministic seed rules.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        let mut config = ProptestConfig::with_cases(self.cases);

        // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
        if matches!(config.rng_seed, RngSeed::Random) {
            if let Some(seed) = self.seed {
                config.rng_seed = RngSeed::Fixed(seed);
            }
        }

        config.max_shrink_iters = self.max_shrink_iters;
        config
    }
}

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    PropertyTestConfig::new(cases).to_proptest_config()
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }

    // If CI is set and no explicit seed is provided, use a fixed seed.
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }

    None
}

fn read_max_shrink_iters() -> Option<u32> {
    std::env::var(PROPTEST_MAX_SHRINK_ITERS_ENV)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Create a virtual-time lab runtime for testing.
#[must_use]
pub fn test_lab() -> LabRuntime {
    LabRuntime::new(LabConfig::new())
}

/// Create a lab runtime with a custom configuration.
#[must_use]
pub fn test_lab_with(config: LabConfig) -> LabRuntime {
    LabRuntime::new(config)
}

/// Erases a value the way the runtime hands values to finalizers.
#[must_use]
pub fn value<T: std::any::Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// Records the exits handed to finalizers.
#[derive(Clone, Default)]
pub struct ExitLog {
    exits: Arc<Mutex<Vec<AnyExit>>>,
}

impl ExitLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A finalizer that records its exit.
    pub fn finalizer(&self) -> impl Fn(AnyExit) -> Fx<(), Infallible> + Send + Sync + 'static {
        let exits = Arc::clone(&self.exits);
        move |exit| {
            let exits = Arc::clone(&exits);
            Fx::from_lazy(move || exits.lock().push(exit.clone()))
        }
    }

    /// Number of recorded exits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exits.lock().len()
    }

    /// Number of recorded exits that are interruptions.
    #[must_use]
    pub fn interrupted(&self) -> usize {
        self.exits.lock().iter().filter(|e| e.is_interrupted()).count()
    }

    /// A copy of the recorded exits.
    #[must_use]
    pub fn exits(&self) -> Vec<AnyExit> {
        self.exits.lock().clone()
    }
}

/// A shared counter usable from inside programs.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A program that increments the counter.
    #[must_use]
    pub fn bump(&self) -> Fx<(), Infallible> {
        let inner = Arc::clone(&self.0);
        Fx::from_lazy(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// An async program whose callback is completed by the test.
///
/// Returns the program and a slot that receives the callback once the
/// program registers. The canceler bumps `cancels`.
pub fn manual_async<A, E>(
    cancels: &Counter,
) -> (Fx<A, E>, Arc<Mutex<Option<AsyncCallback<A, E>>>>)
where
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let slot = Arc::new(Mutex::new(None));
    let registered = Arc::clone(&slot);
    let cancels = cancels.clone();
    let fx = Fx::async_(move |callback| {
        *registered.lock() = Some(callback);
        AsyncRegistration::pending_with(cancels.bump())
    });
    (fx, slot)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an exit is a success with a specific value.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            ::fiberfx::types::Exit::Success(v) => assert_eq!(v, $expected),
            other => panic!("expected Exit::Success({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an exit failed only through interruption.
#[macro_export]
macro_rules! assert_exit_interrupted {
    ($exit:expr) => {
        match $exit {
            ::fiberfx::types::Exit::Failure(cause) if cause.is_interrupted_only() => {}
            other => panic!("expected an interrupted exit, got {:?}", other),
        }
    };
}
