//! Fiber runtime and interpreter.
//!
//! This module contains the machinery that runs effect programs:
//!
//! - [`config`]: Runtime configuration types
//! - [`env_config`]: `FIBERFX_*` environment variables and TOML config files
//! - `builder`: [`RuntimeBuilder`] and [`Runtime`]
//! - `context`: [`FiberContext`] and the shared [`Platform`]
//! - `fiber`: the fiber run loop and the [`Fiber`] handle
//! - `state`: per-fiber mutable state (op budget, interrupt status, semaphores)
//! - `interpreter`: the trampoline step over an explicit frame stack
//! - `processors`: fork, race, zip and async instructions
//!
//! # Runtime Builder
//!
//! Each builder method consumes `self` and returns an updated builder.
//!
//! ```
//! use fiberfx::fx::Fx;
//! use fiberfx::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new()
//!     .max_op_count(512)
//!     .virtual_time()
//!     .build()
//!     .expect("valid config");
//! assert_eq!(runtime.run(Fx::<u8, String>::succeed(7)), Ok(7));
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! use fiberfx::runtime::RuntimeBuilder;
//!
//! // Requires the `config-file` feature.
//! let runtime = RuntimeBuilder::from_toml("config/runtime.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```
//!
//! # Scheduling
//!
//! Fibers run cooperatively on the runtime's [`Scheduler`](crate::time::Scheduler).
//! A fiber runs until it suspends or spends its op budget
//! (`max_op_count`), then yields through a zero-delay timer. Nothing runs
//! unless something drives the scheduler: [`Runtime::run`] does so on the
//! calling thread until its fiber finishes.

mod builder;
pub mod config;
mod context;
pub(crate) mod continuation;
pub mod env_config;
pub(crate) mod fiber;
pub(crate) mod interpreter;
pub(crate) mod processors;
pub(crate) mod state;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::{ClockKind, RuntimeConfig};
pub use context::{FiberContext, Platform};
pub use fiber::{Fiber, ObserverHandle};
