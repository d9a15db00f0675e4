//! The instruction set interpreted by the fiber run loop.
//!
//! A program is a tree of reference-counted [`Node`]s. Nodes are immutable,
//! so a program can be cloned cheaply and run any number of times. Values and
//! typed errors are erased here; [`Fx`](super::Fx) restores the types.

use super::env::Env;
use crate::fiber_ref::FiberRefs;
use crate::runtime::fiber::FiberRuntime;
use crate::scope::Scope;
use crate::sync::Future;
use crate::trace::TraceFrame;
use crate::types::value::{erase, unit};
use crate::types::{AnyCause, AnyExit, Cause, Defect, Exit, Value};
use std::fmt;
use std::sync::Arc;

/// Synchronous thunk producing an exit.
pub(crate) type Thunk = Arc<dyn Fn() -> AnyExit + Send + Sync>;
/// Produces a program on demand.
pub(crate) type Lazy = Arc<dyn Fn() -> Arc<Node> + Send + Sync>;
/// Continues a program with a produced value.
pub(crate) type Cont = Arc<dyn Fn(Value) -> Arc<Node> + Send + Sync>;
/// Recovers from a failure cause.
pub(crate) type Recover = Arc<dyn Fn(AnyCause) -> Arc<Node> + Send + Sync>;
/// Builds a program from the service environment.
pub(crate) type Accessor = Arc<dyn Fn(&Env) -> Arc<Node> + Send + Sync>;
/// Cleanup program run with the exit that triggered it.
pub(crate) type Finalizer = Arc<dyn Fn(AnyExit) -> Arc<Node> + Send + Sync>;
/// Registers an asynchronous callback.
///
/// The callback is the future the fiber will wait on; resolving it with a
/// program resumes the fiber with that program.
pub(crate) type Register = Arc<dyn Fn(Future<Arc<Node>>) -> Registration + Send + Sync>;

/// Result of an asynchronous registration.
pub(crate) enum Registration {
    /// Continue synchronously with this program.
    Ready(Arc<Node>),
    /// Suspend; the optional canceler runs if the fiber is interrupted first.
    Pending(Option<Arc<Node>>),
}

/// Something a fiber can suspend on.
pub(crate) trait Awaitable: Send + Sync {
    /// Returns the program to resume with if already settled; otherwise
    /// arranges for `wake` to be called with it exactly once.
    fn subscribe(&self, wake: Box<dyn FnOnce(Arc<Node>) + Send>) -> Option<Arc<Node>>;
}

/// Optional overrides for a forked fiber.
#[derive(Debug, Clone, Default)]
pub struct ForkParams {
    pub(crate) scope: Option<Scope>,
    pub(crate) fiber_refs: Option<FiberRefs>,
    pub(crate) concurrency: Option<usize>,
}

impl ForkParams {
    /// No overrides: the child forks the parent's scope and fiber refs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forks the child's scope from `scope` instead of the parent's scope.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Gives the child these fiber refs instead of a fork of the parent's.
    #[must_use]
    pub fn fiber_refs(mut self, refs: FiberRefs) -> Self {
        self.fiber_refs = Some(refs);
        self
    }

    /// Sets the concurrency level the child uses for its own forks.
    #[must_use]
    pub fn concurrency(mut self, level: usize) -> Self {
        self.concurrency = Some(level);
        self
    }
}

/// One node of an effect program.
pub(crate) enum Node {
    Succeed(Value),
    Fail(AnyCause),
    FromLazy(Thunk),
    Defer(Lazy),
    FlatMap(Arc<Node>, Cont),
    Fold(Arc<Node>, Recover, Cont),
    Access(Accessor),
    Provide(Arc<Node>, Env),
    Async(Register),
    Ensuring(Arc<Node>, Finalizer),
    Fork(Arc<Node>, ForkParams),
    GetFiberContext,
    GetFiberScope,
    GetTrace,
    Join(Arc<FiberRuntime>),
    RaceAll(Vec<Arc<Node>>),
    ZipAll(Vec<Arc<Node>>),
    SetInterruptStatus(Arc<Node>, bool),
    WithConcurrency(Arc<Node>, usize),
    AddTrace(Arc<Node>, TraceFrame),
    Wait(Arc<dyn Awaitable>),
    YieldNow,
}

impl Node {
    pub(crate) fn succeed(value: Value) -> Arc<Self> {
        Arc::new(Self::Succeed(value))
    }

    pub(crate) fn unit() -> Arc<Self> {
        Self::succeed(unit())
    }

    pub(crate) fn fail(cause: AnyCause) -> Arc<Self> {
        Arc::new(Self::Fail(cause))
    }

    pub(crate) fn die(defect: Defect) -> Arc<Self> {
        Self::fail(Cause::Die(defect))
    }

    pub(crate) fn from_exit(exit: AnyExit) -> Arc<Self> {
        match exit {
            Exit::Success(value) => Self::succeed(value),
            Exit::Failure(cause) => Self::fail(cause),
        }
    }

    pub(crate) fn defer<F>(f: F) -> Arc<Self>
    where
        F: Fn() -> Arc<Self> + Send + Sync + 'static,
    {
        Arc::new(Self::Defer(Arc::new(f)))
    }

    pub(crate) fn flat_map<F>(self: &Arc<Self>, f: F) -> Arc<Self>
    where
        F: Fn(Value) -> Arc<Self> + Send + Sync + 'static,
    {
        Arc::new(Self::FlatMap(Arc::clone(self), Arc::new(f)))
    }

    /// Runs `self`, then `next`, discarding the first value.
    pub(crate) fn then(self: &Arc<Self>, next: Arc<Self>) -> Arc<Self> {
        self.flat_map(move |_| Arc::clone(&next))
    }

    /// Captures the exit of `self` as a value; never fails.
    pub(crate) fn exit(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Fold(
            Arc::clone(self),
            Arc::new(|cause| Self::succeed(erase::<AnyExit>(Exit::Failure(cause)))),
            Arc::new(|value| Self::succeed(erase::<AnyExit>(Exit::Success(value)))),
        ))
    }

    pub(crate) fn uninterruptible(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self::SetInterruptStatus(Arc::clone(self), false))
    }

    /// Short name used in logs.
    pub(crate) fn tag(&self) -> &'static str {
        match self {
            Self::Succeed(_) => "Succeed",
            Self::Fail(_) => "Fail",
            Self::FromLazy(_) => "FromLazy",
            Self::Defer(_) => "Defer",
            Self::FlatMap(..) => "FlatMap",
            Self::Fold(..) => "Fold",
            Self::Access(_) => "Access",
            Self::Provide(..) => "Provide",
            Self::Async(_) => "Async",
            Self::Ensuring(..) => "Ensuring",
            Self::Fork(..) => "Fork",
            Self::GetFiberContext => "GetFiberContext",
            Self::GetFiberScope => "GetFiberScope",
            Self::GetTrace => "GetTrace",
            Self::Join(_) => "Join",
            Self::RaceAll(_) => "RaceAll",
            Self::ZipAll(_) => "ZipAll",
            Self::SetInterruptStatus(..) => "SetInterruptStatus",
            Self::WithConcurrency(..) => "WithConcurrency",
            Self::AddTrace(..) => "AddTrace",
            Self::Wait(_) => "Wait",
            Self::YieldNow => "YieldNow",
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
