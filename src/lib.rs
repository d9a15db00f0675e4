//! fiberfx: a cooperative fiber runtime for effect programs.
//!
//! # Overview
//!
//! An effect program ([`Fx`]) is an immutable description of a computation
//! that may succeed with a value, fail with a typed error, die with a defect
//! or be interrupted. A [`Runtime`] interprets programs on lightweight
//! fibers that are scheduled cooperatively on a single timer queue.
//!
//! # Core Guarantees
//!
//! - **Structured concurrency**: every fiber belongs to a [`Scope`]; closing a
//!   scope interrupts its fibers and closes its child scopes first
//! - **Finalizers run exactly once**: whether a program succeeds, fails or is
//!   interrupted, and no matter how many parties close the scope
//! - **Typed causes**: failures are a [`Cause`] tree that keeps every
//!   concurrent or sequential failure, never just the first
//! - **Fair scheduling**: a fiber yields after a bounded number of steps
//! - **Deterministic testing**: [`LabRuntime`] runs on virtual time
//!
//! # Example
//!
//! ```
//! use fiberfx::{Fx, Runtime};
//!
//! let runtime = Runtime::builder().virtual_time().build().expect("config");
//! let program = Fx::<u32, String>::succeed(1)
//!     .zip(Fx::succeed(2))
//!     .map(|(a, b)| a + b);
//! assert_eq!(runtime.run(program), Ok(3));
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: Core types (fiber ids, time, causes, exits, status)
//! - [`fx`]: Effect programs and the service environment
//! - [`runtime`]: Fiber runtime, interpreter, builder and configuration
//! - [`scope`]: Scopes and finalization strategies
//! - [`sync`]: Single-assignment futures and semaphores
//! - [`fiber_ref`]: Fiber-local references with fork/join policies
//! - [`time`]: Clocks and the timer scheduler
//! - [`trace`]: Bounded execution traces
//! - [`lab`]: Virtual-time lab runtime for testing
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::type_complexity)]
#![allow(clippy::needless_pass_by_value)]

pub mod error;
pub mod fiber_ref;
pub mod fx;
pub mod lab;
pub mod runtime;
pub mod scope;
pub mod sync;
pub mod time;
pub mod trace;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{ConfigError, RunError};
pub use fiber_ref::{FiberRef, FiberRefs};
pub use fx::{AsyncCallback, AsyncRegistration, Env, ForkParams, Fx};
pub use lab::{LabConfig, LabRuntime};
pub use runtime::{Fiber, FiberContext, ObserverHandle, Runtime, RuntimeBuilder, RuntimeConfig};
pub use scope::{FinalizationStrategy, Scope};
pub use sync::{Future, Semaphore};
pub use time::Scheduler;
pub use trace::{Trace, TraceFrame};
pub use types::{Cause, Defect, Exit, FiberId, FiberStatus, Time};
