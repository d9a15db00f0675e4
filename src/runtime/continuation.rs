//! Continuations and stack frames of the fiber trampoline.
//!
//! A fiber's progress is a [`Machine`]: the continuation to process next and
//! an explicit stack of frames waiting for a value or a failure. The
//! interpreter turns one continuation into a [`Decision`] per step, so no
//! host recursion ever grows with the length of a program.

use crate::fx::instruction::{Awaitable, Cont, Finalizer, Node, Recover};
use crate::scope::FinalizerHandle;
use crate::types::{AnyCause, AnyExit, Exit, Value};
use std::fmt;
use std::sync::Arc;

/// What the interpreter processes next.
pub(crate) enum Continuation {
    /// The program a fiber was started with.
    Initial(Arc<Node>),
    /// A program node to interpret.
    Instruction(Arc<Node>),
    /// A value to hand to the next frame.
    Value(Value),
    /// A failure to unwind with.
    Failure(AnyCause),
    /// Leave the program and close the fiber's scope.
    ///
    /// `Some(exit)` closes with the program's exit; `None` finishes a close
    /// requested by someone else.
    Exit(Option<AnyExit>),
}

impl Continuation {
    pub(crate) fn from_exit(exit: AnyExit) -> Self {
        match exit {
            Exit::Success(value) => Self::Value(value),
            Exit::Failure(cause) => Self::Failure(cause),
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial(node) => f.debug_tuple("Initial").field(node).finish(),
            Self::Instruction(node) => f.debug_tuple("Instruction").field(node).finish(),
            Self::Value(_) => f.write_str("Value"),
            Self::Failure(_) => f.write_str("Failure"),
            Self::Exit(exit) => f.debug_tuple("Exit").field(&exit.is_some()).finish(),
        }
    }
}

/// Which fiber-state stack a `Pop` frame restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Restore {
    InterruptStatus,
    Concurrency,
    Env,
    Trace,
}

/// A frame on the fiber stack.
pub(crate) enum Frame {
    /// Continue with the value; skipped by failures.
    Map(Cont),
    /// Continue with the value, or recover from the failure.
    Fold(Recover, Cont),
    /// Run the finalizer with the exit passing through, unless the scope
    /// already claimed it.
    Finalizer(Option<FinalizerHandle>, Finalizer),
    /// Pop one fiber-state stack.
    Pop(Restore),
    /// Resume with the exit saved before a finalizer ran.
    ScopeExit(AnyExit),
    /// Deregister a scope finalizer that is no longer needed.
    Release(FinalizerHandle),
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map(_) => f.write_str("Map"),
            Self::Fold(..) => f.write_str("Fold"),
            Self::Finalizer(handle, _) => f
                .debug_tuple("Finalizer")
                .field(&handle.is_some())
                .finish(),
            Self::Pop(restore) => f.debug_tuple("Pop").field(restore).finish(),
            Self::ScopeExit(_) => f.write_str("ScopeExit"),
            Self::Release(handle) => f.debug_tuple("Release").field(handle).finish(),
        }
    }
}

/// The resumable progress of one fiber.
#[derive(Debug)]
pub(crate) struct Machine {
    pub(crate) cont: Continuation,
    pub(crate) stack: Vec<Frame>,
    /// The program was abandoned; only the scope close is left to run.
    pub(crate) exiting: bool,
}

impl Machine {
    pub(crate) fn new(program: Arc<Node>) -> Self {
        Self {
            cont: Continuation::Initial(program),
            stack: Vec::new(),
            exiting: false,
        }
    }
}

/// What the run loop does after one step.
pub(crate) enum Decision {
    /// Keep stepping.
    Continue,
    /// Yield to the scheduler and resume with the current continuation.
    Suspend,
    /// Suspend until `awaitable` settles.
    ///
    /// `release` deregisters a canceler once the resumed program completes.
    Await {
        awaitable: Arc<dyn Awaitable>,
        release: Option<FinalizerHandle>,
    },
    /// The fiber terminated.
    Done(AnyExit),
}

impl fmt::Debug for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Suspend => f.write_str("Suspend"),
            Self::Await { release, .. } => f
                .debug_struct("Await")
                .field("release", &release.is_some())
                .finish_non_exhaustive(),
            Self::Done(exit) => f.debug_tuple("Done").field(&exit.is_success()).finish(),
        }
    }
}
