//! Terminal result of a fiber.
//!
//! An [`Exit`] is either `Success(A)` or `Failure(Cause<E>)`. It is what
//! observers and joiners receive once a fiber is done, and what a scope
//! publishes when it closes.

use super::cause::{Cause, Defect};
use crate::types::FiberId;
use core::fmt;

/// The terminal success-or-failure result of a fiber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<A, E> {
    /// The fiber produced a value.
    Success(A),
    /// The fiber failed.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// Creates a successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// Creates an exit failing with a typed error.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// Creates an exit failing with a defect.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Failure(Cause::Die(Defect::new(message)))
    }

    /// Creates an exit interrupted by `id`.
    #[must_use]
    pub const fn interrupt(id: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(id))
    }

    /// Returns true if this exit is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this exit is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if this exit failed only because of interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Failure(cause) if cause.is_interrupted_only())
    }

    /// Returns the success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(a) => Some(a),
            Self::Failure(_) => None,
        }
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// Converts into a standard `Result`.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(cause) => Err(cause),
        }
    }

    /// Maps the success value.
    pub fn map<B, F: FnOnce(A) -> B>(self, f: F) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Maps the typed failures of the cause.
    pub fn map_err<F, G: FnMut(E) -> F>(self, g: G) -> Exit<A, F> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(cause) => Exit::Failure(cause.map(g)),
        }
    }

    /// Appends `next` to the failure cause sequentially.
    ///
    /// A success followed by a failure becomes that failure.
    #[must_use]
    pub fn then_cause(self, next: Option<Cause<E>>) -> Self {
        match (self, next) {
            (exit, None) => exit,
            (Self::Success(_), Some(next)) => Self::Failure(next),
            (Self::Failure(cause), Some(next)) => Self::Failure(cause.then(next)),
        }
    }

    /// Returns the success value or panics.
    ///
    /// # Panics
    ///
    /// Panics if the exit is a failure.
    #[track_caller]
    pub fn unwrap(self) -> A
    where
        E: fmt::Debug,
    {
        match self {
            Self::Success(a) => a,
            Self::Failure(cause) => panic!("called `Exit::unwrap()` on a failure: {cause:?}"),
        }
    }
}

impl<A, E> From<Result<A, E>> for Exit<A, E> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Self::Success(a),
            Err(e) => Self::fail(e),
        }
    }
}
