//! Type-erased values flowing through the interpreter.
//!
//! The interpreter is untyped: every value and typed error is an
//! `Arc<dyn Any + Send + Sync>`. The typed [`Fx`](crate::fx::Fx) facade wraps
//! values on the way in and downcasts them on the way out. A downcast that
//! fails is an internal defect, never a user-visible `Fail`.

use super::{Cause, Defect, Exit};
use std::any::{type_name, Any};
use std::sync::Arc;

/// Bound for values and errors carried by effect programs.
pub trait Data: Any + Clone + Send + Sync {}

impl<T: Any + Clone + Send + Sync> Data for T {}

/// An erased value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// A cause whose typed failures are erased.
pub type AnyCause = Cause<Value>;

/// An exit whose value and typed failures are erased.
pub type AnyExit = Exit<Value, Value>;

/// Erases a value.
pub(crate) fn erase<A: Data>(value: A) -> Value {
    Arc::new(value)
}

/// The erased unit value.
pub(crate) fn unit() -> Value {
    Arc::new(())
}

/// Recovers a typed value, cloning only if the value is still shared.
pub(crate) fn downcast<A: Data>(value: Value) -> Result<A, Defect> {
    value
        .downcast::<A>()
        .map(|arc| Arc::try_unwrap(arc).unwrap_or_else(|shared| (*shared).clone()))
        .map_err(|_| Defect::new(format!("value is not a `{}`", type_name::<A>())))
}

/// Recovers a typed cause from an erased one.
pub(crate) fn downcast_cause<E: Data>(cause: AnyCause) -> Cause<E> {
    cause.try_map(downcast::<E>)
}

/// Erases the typed failures of a cause.
pub(crate) fn erase_cause<E: Data>(cause: Cause<E>) -> AnyCause {
    cause.map(erase)
}

/// Recovers a typed exit from an erased one.
pub(crate) fn downcast_exit<A: Data, E: Data>(exit: AnyExit) -> Exit<A, E> {
    match exit {
        Exit::Success(value) => match downcast::<A>(value) {
            Ok(a) => Exit::Success(a),
            Err(defect) => Exit::Failure(Cause::Die(defect)),
        },
        Exit::Failure(cause) => Exit::Failure(downcast_cause(cause)),
    }
}

/// Erases a typed exit.
pub(crate) fn erase_exit<A: Data, E: Data>(exit: Exit<A, E>) -> AnyExit {
    match exit {
        Exit::Success(a) => Exit::Success(erase(a)),
        Exit::Failure(cause) => Exit::Failure(erase_cause(cause)),
    }
}
