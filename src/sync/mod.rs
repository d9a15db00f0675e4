//! Synchronization primitives for fibers.
//!
//! # Primitives
//!
//! - [`Future`]: single-resolution cell fibers can suspend on
//! - [`Semaphore`]: counting semaphore with FIFO hand-off and cancel-safe
//!   permits
//!
//! # Cancel Safety
//!
//! - Interrupted while waiting: the wait is abandoned, nothing is held
//! - Interrupted while holding a permit acquired with
//!   [`Semaphore::with_permit`]: the permit is released by a scope finalizer

pub mod future;
mod semaphore;

pub use future::{Future, ObserverKey, Settled};
pub use semaphore::{Permit, Semaphore, TryAcquireError};
