//! Effect programs.
//!
//! An [`Fx<A, E>`] describes a computation that succeeds with an `A`, fails
//! with a [`Cause<E>`], or is interrupted. Nothing happens until a
//! [`Runtime`](crate::runtime::Runtime) interprets it. Programs are immutable
//! and cheap to clone, so the same program can be run many times.
//!
//! # Example
//!
//! ```
//! use fiberfx::fx::Fx;
//! use fiberfx::runtime::Runtime;
//!
//! let program: Fx<u32, String> = Fx::succeed(20)
//!     .flat_map(|n| if n > 10 { Fx::succeed(n * 2) } else { Fx::fail("small".into()) })
//!     .map(|n| n + 2);
//!
//! let runtime = Runtime::new();
//! assert_eq!(runtime.run(program).ok(), Some(42));
//! ```

pub mod env;
pub(crate) mod instruction;

pub use env::Env;
pub use instruction::ForkParams;

use crate::runtime::fiber::FiberRuntime;
use crate::runtime::{Fiber, FiberContext};
use crate::scope::Scope;
use crate::sync::Future;
use crate::trace::{Trace, TraceFrame};
use crate::types::value::{downcast, downcast_exit, erase, erase_cause, erase_exit};
use crate::types::{AnyCause, AnyExit, Cause, Data, Defect, Exit, FiberId, Value};
use instruction::{Node, Registration};
use std::any::type_name;
use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// A description of a computation producing `A` or failing with `E`.
pub struct Fx<A, E = Infallible> {
    node: Arc<Node>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Fx<A, E> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Fx<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fx").field(&self.node.tag()).finish()
    }
}

/// Continues with the typed value, or dies if the value has another type.
fn typed<A: Data>(value: Value, k: impl FnOnce(A) -> Arc<Node>) -> Arc<Node> {
    match downcast::<A>(value) {
        Ok(a) => k(a),
        Err(defect) => Node::die(defect),
    }
}

fn erase_all<A: Data, E: Data, I>(programs: I) -> Vec<Arc<Node>>
where
    I: IntoIterator<Item = Fx<A, E>>,
{
    programs.into_iter().map(Fx::into_node).collect()
}

impl<A: Data, E: Data> Fx<A, E> {
    pub(crate) fn from_node(node: Arc<Node>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Arc<Node> {
        self.node
    }

    /// A program that succeeds with `value`.
    #[must_use]
    pub fn succeed(value: A) -> Self {
        Self::from_node(Node::succeed(erase(value)))
    }

    /// A program that fails with the typed error `error`.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self::from_node(Node::fail(Cause::Fail(erase(error))))
    }

    /// A program that fails with `cause`.
    #[must_use]
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_node(Node::fail(erase_cause(cause)))
    }

    /// A program that dies with a defect.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::from_node(Node::die(Defect::new(message)))
    }

    /// A program that ends with `exit`.
    #[must_use]
    pub fn from_exit(exit: Exit<A, E>) -> Self {
        Self::from_node(Node::from_exit(erase_exit(exit)))
    }

    /// Runs `f` each time the program runs. A panic becomes a defect.
    #[must_use]
    pub fn from_lazy<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::FromLazy(Arc::new(move || {
            Exit::Success(erase(f()))
        }))))
    }

    /// Runs a fallible `f` each time the program runs.
    #[must_use]
    pub fn try_lazy<F>(f: F) -> Self
    where
        F: Fn() -> Result<A, E> + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::FromLazy(Arc::new(move || {
            erase_exit(Exit::from(f()))
        }))))
    }

    /// Builds the program to run each time it runs.
    #[must_use]
    pub fn defer<F>(f: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::from_node(Node::defer(move || f().node))
    }

    /// Transforms the success value.
    #[must_use]
    pub fn map<B: Data, F>(self, f: F) -> Fx<B, E>
    where
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        Fx::from_node(
            self.node
                .flat_map(move |value| typed::<A>(value, |a| Node::succeed(erase(f(a))))),
        )
    }

    /// Continues with the program built from the success value.
    #[must_use]
    pub fn flat_map<B: Data, F>(self, f: F) -> Fx<B, E>
    where
        F: Fn(A) -> Fx<B, E> + Send + Sync + 'static,
    {
        Fx::from_node(
            self.node
                .flat_map(move |value| typed::<A>(value, |a| f(a).node)),
        )
    }

    /// Runs `self`, then `next`, keeping the value of `next`.
    #[must_use]
    pub fn then<B: Data>(self, next: Fx<B, E>) -> Fx<B, E> {
        Fx::from_node(self.node.then(next.node))
    }

    /// Discards the success value.
    #[must_use]
    pub fn as_unit(self) -> Fx<(), E> {
        self.map(|_| ())
    }

    /// Handles both outcomes.
    #[must_use]
    pub fn fold_cause<B: Data, E2: Data, F, S>(self, on_failure: F, on_success: S) -> Fx<B, E2>
    where
        F: Fn(Cause<E>) -> Fx<B, E2> + Send + Sync + 'static,
        S: Fn(A) -> Fx<B, E2> + Send + Sync + 'static,
    {
        Fx::from_node(Arc::new(Node::Fold(
            self.node,
            Arc::new(move |cause: AnyCause| {
                on_failure(cause.try_map(downcast::<E>)).node
            }),
            Arc::new(move |value| typed::<A>(value, |a| on_success(a).node)),
        )))
    }

    /// Recovers from any failure cause, including defects and interruptions.
    #[must_use]
    pub fn catch_cause<E2: Data, F>(self, f: F) -> Fx<A, E2>
    where
        F: Fn(Cause<E>) -> Fx<A, E2> + Send + Sync + 'static,
    {
        Fx::from_node(Arc::new(Node::Fold(
            self.node,
            Arc::new(move |cause: AnyCause| f(cause.try_map(downcast::<E>)).node),
            Arc::new(Node::succeed),
        )))
    }

    /// Recovers from the first typed failure.
    ///
    /// Causes without a typed failure (defects, interruptions) pass through.
    #[must_use]
    pub fn catch<E2: Data, F>(self, f: F) -> Fx<A, E2>
    where
        F: Fn(E) -> Fx<A, E2> + Send + Sync + 'static,
    {
        Fx::from_node(Arc::new(Node::Fold(
            self.node,
            Arc::new(move |cause: AnyCause| {
                let first = cause
                    .first_failure()
                    .map(|error| downcast::<E>(Arc::clone(error)));
                match first {
                    Some(Ok(error)) => f(error).node,
                    Some(Err(defect)) => Node::die(defect),
                    None => Node::fail(cause),
                }
            }),
            Arc::new(Node::succeed),
        )))
    }

    /// Transforms every typed failure.
    #[must_use]
    pub fn map_error<E2: Data, F>(self, f: F) -> Fx<A, E2>
    where
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        Fx::from_node(Arc::new(Node::Fold(
            self.node,
            Arc::new(move |cause: AnyCause| {
                Node::fail(cause.try_map(|error| downcast::<E>(error).map(|e| erase(f(e)))))
            }),
            Arc::new(Node::succeed),
        )))
    }

    /// Captures the outcome as a value; never fails.
    #[must_use]
    pub fn exit(self) -> Fx<Exit<A, E>, Infallible> {
        Fx::from_node(self.node.exit().flat_map(|value| {
            typed::<AnyExit>(value, |exit| Node::succeed(erase(downcast_exit::<A, E>(exit))))
        }))
    }

    /// Runs `finalizer` after `self` on every exit path.
    ///
    /// The finalizer is registered on the fiber's scope while `self` runs, so
    /// it also runs if the fiber is interrupted. It runs uninterruptibly,
    /// exactly once, with the exit that ended `self` (or the exit that closed
    /// the scope). A failing finalizer appends its cause to the outcome.
    #[must_use]
    pub fn ensuring<F>(self, finalizer: F) -> Self
    where
        F: Fn(AnyExit) -> Fx<(), Infallible> + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::Ensuring(
            self.node,
            Arc::new(move |exit| finalizer(exit).node),
        )))
    }

    /// Starts `self` in a child fiber whose scope is forked from the
    /// current fiber's scope.
    #[must_use]
    pub fn fork(self) -> Fx<Fiber<A, E>, Infallible> {
        self.fork_with(ForkParams::new())
    }

    /// Starts `self` in a child fiber with explicit overrides.
    #[must_use]
    pub fn fork_with(self, params: ForkParams) -> Fx<Fiber<A, E>, Infallible> {
        Fx::from_node(Arc::new(Node::Fork(self.node, params)).flat_map(|value| {
            typed::<Arc<FiberRuntime>>(value, |runtime| {
                Node::succeed(erase(Fiber::<A, E>::new(runtime)))
            })
        }))
    }

    /// Starts `self` in a child fiber that outlives the current one.
    ///
    /// The child's scope is forked from a fresh detached scope, so closing
    /// the current fiber's scope does not interrupt it.
    #[must_use]
    pub fn fork_daemon(self) -> Fx<Fiber<A, E>, Infallible> {
        Fx::get_fiber_scope().flat_map(move |scope| {
            let detached = Scope::new(FiberId::NONE, scope.strategy());
            self.clone().fork_with(ForkParams::new().scope(detached))
        })
    }

    /// Runs every program concurrently and ends with the first exit.
    ///
    /// The losers are interrupted and awaited before the race completes. An
    /// empty race dies.
    #[must_use]
    pub fn race_all<I>(programs: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::from_node(Arc::new(Node::RaceAll(erase_all(programs))))
    }

    /// Races `self` against `other`.
    #[must_use]
    pub fn race(self, other: Self) -> Self {
        Self::race_all([self, other])
    }

    /// Runs every program concurrently (bounded by the current concurrency
    /// level) and collects the values in input order.
    ///
    /// The first failure interrupts the rest.
    #[must_use]
    pub fn zip_all<I>(programs: I) -> Fx<Vec<A>, E>
    where
        I: IntoIterator<Item = Self>,
    {
        Fx::from_node(
            Arc::new(Node::ZipAll(erase_all(programs))).flat_map(|values| {
                typed::<Vec<Value>>(values, |values| {
                    match values.into_iter().map(downcast::<A>).collect::<Result<Vec<A>, _>>() {
                        Ok(values) => Node::succeed(erase(values)),
                        Err(defect) => Node::die(defect),
                    }
                })
            }),
        )
    }

    /// Runs `self` and `other` concurrently and pairs their values.
    #[must_use]
    pub fn zip<B: Data>(self, other: Fx<B, E>) -> Fx<(A, B), E> {
        Fx::from_node(
            Arc::new(Node::ZipAll(vec![self.node, other.node])).flat_map(|values| {
                typed::<Vec<Value>>(values, |mut values| {
                    let pair = match (values.pop(), values.pop()) {
                        (Some(b), Some(a)) => downcast::<A>(a).and_then(|a| Ok((a, downcast::<B>(b)?))),
                        _ => Err(Defect::new("zip produced fewer than two values")),
                    };
                    match pair {
                        Ok(pair) => Node::succeed(erase(pair)),
                        Err(defect) => Node::die(defect),
                    }
                })
            }),
        )
    }

    /// Bounds how many children forked inside `self` run at once.
    #[must_use]
    pub fn with_concurrency(self, level: usize) -> Self {
        Self::from_node(Arc::new(Node::WithConcurrency(self.node, level.max(1))))
    }

    /// Masks interruption while `self` runs.
    ///
    /// An interrupt requested meanwhile takes effect when the mask is lifted.
    #[must_use]
    pub fn uninterruptible(self) -> Self {
        Self::from_node(self.node.uninterruptible())
    }

    /// Makes `self` interruptible, even inside a masked region.
    #[must_use]
    pub fn interruptible(self) -> Self {
        Self::from_node(Arc::new(Node::SetInterruptStatus(self.node, true)))
    }

    /// Bridges a callback-based source.
    ///
    /// `register` runs each time the program runs. It either finishes
    /// synchronously with [`AsyncRegistration::Ready`], or returns
    /// [`AsyncRegistration::Pending`] and completes the callback later, from
    /// any thread. The optional canceler runs exactly once if the fiber is
    /// interrupted first; it is dropped once the resumed program completes.
    #[must_use]
    pub fn async_<F>(register: F) -> Self
    where
        F: Fn(AsyncCallback<A, E>) -> AsyncRegistration<A, E> + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::Async(Arc::new(move |future| {
            let callback = AsyncCallback {
                future,
                _marker: PhantomData,
            };
            match register(callback) {
                AsyncRegistration::Ready(fx) => Registration::Ready(fx.node),
                AsyncRegistration::Pending(canceler) => {
                    Registration::Pending(canceler.map(|fx| fx.node))
                }
            }
        }))))
    }

    /// Suspends until `future` resolves, then runs the program it holds.
    ///
    /// An interrupted future fails the waiter with that interruption.
    #[must_use]
    pub fn wait(future: &Future<Self>) -> Self {
        Self::from_node(Arc::new(Node::Wait(future.awaitable(Self::into_node))))
    }

    /// Succeeds with `Some` if `self` completes within `duration`, else
    /// interrupts it and succeeds with `None`.
    #[must_use]
    pub fn timeout(self, duration: Duration) -> Fx<Option<A>, E> {
        self.map(Some)
            .race(Fx::sleep(duration).map(|()| None).widen())
    }

    /// Builds a program from the service environment.
    #[must_use]
    pub fn access<F>(f: F) -> Self
    where
        F: Fn(&Env) -> Self + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::Access(Arc::new(move |env| f(env).node))))
    }

    /// Reads the service of type `A`; dies if it was never provided.
    #[must_use]
    pub fn service() -> Self {
        Self::access(|env| match env.get::<A>() {
            Some(service) => Self::succeed(service),
            None => Self::die(format!("service `{}` not found", type_name::<A>())),
        })
    }

    /// Runs `self` with `env` layered over the current environment.
    #[must_use]
    pub fn provide(self, env: Env) -> Self {
        Self::from_node(Arc::new(Node::Provide(self.node, env)))
    }

    /// Runs `self` with one extra service.
    #[must_use]
    pub fn provide_service<S: Data>(self, service: S) -> Self {
        self.provide(Env::new().with(service))
    }

    /// Pushes a label onto the fiber trace while `self` runs.
    #[must_use]
    pub fn traced(self, label: impl Into<Cow<'static, str>>) -> Self {
        Self::from_node(Arc::new(Node::AddTrace(self.node, TraceFrame::label(label))))
    }

    /// Pushes the caller's source location onto the fiber trace while `self`
    /// runs.
    #[must_use]
    #[track_caller]
    pub fn located(self) -> Self {
        let frame = TraceFrame::here();
        Self::from_node(Arc::new(Node::AddTrace(self.node, frame)))
    }
}

impl<A: Data> Fx<A, Infallible> {
    /// Widens a program that cannot fail to any error type.
    #[must_use]
    pub fn widen<E: Data>(self) -> Fx<A, E> {
        Fx::from_node(self.node)
    }
}

impl Fx<(), Infallible> {
    /// A program that succeeds with `()`.
    #[must_use]
    pub fn unit() -> Self {
        Self::from_node(Node::unit())
    }

    /// Suspends the fiber for `duration` of scheduler time.
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        Fx::get_fiber_context().flat_map(move |cx| {
            Fx::async_(move |callback| {
                let handle = cx.scheduler().set_timer(
                    move |_| {
                        callback.succeed(());
                    },
                    duration,
                );
                AsyncRegistration::pending_with(Fx::from_lazy(move || {
                    handle.cancel();
                }))
            })
        })
    }

    /// Gives other fibers a chance to run.
    #[must_use]
    pub fn yield_now() -> Self {
        Self::from_node(Arc::new(Node::YieldNow))
    }
}

impl Fx<FiberContext, Infallible> {
    /// Reads the current fiber's context.
    #[must_use]
    pub fn get_fiber_context() -> Self {
        Self::from_node(Arc::new(Node::GetFiberContext))
    }
}

impl Fx<Scope, Infallible> {
    /// Reads the current fiber's scope.
    #[must_use]
    pub fn get_fiber_scope() -> Self {
        Self::from_node(Arc::new(Node::GetFiberScope))
    }
}

impl Fx<Trace, Infallible> {
    /// Reads a bounded snapshot of the current fiber's trace.
    #[must_use]
    pub fn get_trace() -> Self {
        Self::from_node(Arc::new(Node::GetTrace))
    }
}

/// One-shot completion handle passed to [`Fx::async_`].
///
/// Only the first completion has any effect.
pub struct AsyncCallback<A, E> {
    future: Future<Arc<Node>>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for AsyncCallback<A, E> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: Data, E: Data> AsyncCallback<A, E> {
    /// Resumes the fiber with `fx`. Returns false if already completed.
    pub fn complete(&self, fx: Fx<A, E>) -> bool {
        self.future.resolve(fx.node)
    }

    /// Resumes the fiber with a value.
    pub fn succeed(&self, value: A) -> bool {
        self.complete(Fx::succeed(value))
    }

    /// Resumes the fiber with a typed failure.
    pub fn fail(&self, error: E) -> bool {
        self.complete(Fx::fail(error))
    }

    /// Returns true until the callback is completed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.future.is_pending()
    }
}

impl<A, E> fmt::Debug for AsyncCallback<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncCallback").field(&self.future).finish()
    }
}

/// What an [`Fx::async_`] registration decided.
pub enum AsyncRegistration<A, E> {
    /// Finish synchronously with this program.
    Ready(Fx<A, E>),
    /// Suspend until the callback completes; the canceler runs on
    /// interruption.
    Pending(Option<Fx<(), Infallible>>),
}

impl<A, E> AsyncRegistration<A, E> {
    /// Suspend without a canceler.
    #[must_use]
    pub fn pending() -> Self {
        Self::Pending(None)
    }

    /// Suspend, running `canceler` if the fiber is interrupted first.
    #[must_use]
    pub fn pending_with(canceler: Fx<(), Infallible>) -> Self {
        Self::Pending(Some(canceler))
    }
}

impl<A, E> fmt::Debug for AsyncRegistration<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(fx) => f.debug_tuple("Ready").field(fx).finish(),
            Self::Pending(canceler) => f
                .debug_tuple("Pending")
                .field(&canceler.is_some())
                .finish(),
        }
    }
}
