//! Fiber runtime: the run loop and the typed [`Fiber`] handle.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted ──start()──► Suspended ──resume──► Running ──► Done
//!                             ▲                    │
//!                             └──── yield/await ───┘
//! ```
//!
//! A fiber only ever runs from a scheduler task. Every suspension hands out
//! a fresh resume token; a resume carrying a stale token is ignored, so a
//! wake-up and an interrupt racing for the same suspension resume the fiber
//! once.
//!
//! # Interruption
//!
//! Interrupting a fiber closes its scope. A hook on the scope marks the fiber
//! as terminating (and wakes it if suspended); the run loop then drops the
//! remaining program, finishes the close and publishes the scope's final
//! exit. While interruption is masked the loop keeps going and re-checks
//! when the mask is lifted.

use super::context::FiberContext;
use super::continuation::{Continuation, Decision, Frame, Machine};
use super::interpreter;
use super::state::FiberState;
use crate::fx::instruction::Node;
use crate::fx::{Env, Fx};
use crate::scope::finalizer::into_exit;
use crate::scope::Scope;
use crate::sync::{Future, ObserverKey, Settled};
use crate::trace::{Trace, TraceFrame};
use crate::types::value::{downcast_exit, erase};
use crate::types::{AnyExit, Cause, Data, Defect, Exit, FiberId, FiberStatus};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Phase {
    NotStarted,
    Running,
    Suspended(u64),
    Done(AnyExit),
}

struct Slot {
    phase: Phase,
    machine: Option<Machine>,
    next_token: u64,
}

impl Slot {
    fn park(&mut self, machine: Machine) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.phase = Phase::Suspended(token);
        self.machine = Some(machine);
        token
    }
}

enum Resume {
    /// Continue with the saved continuation.
    Continue,
    /// An awaited value arrived; continue with this program.
    Node(Arc<Node>),
    /// The scope was closed while the fiber was suspended.
    Terminate,
}

/// One fiber: its identity, state and run loop.
pub(crate) struct FiberRuntime {
    id: FiberId,
    context: FiberContext,
    scope: Scope,
    state: FiberState,
    slot: Mutex<Slot>,
    done: Future<AnyExit>,
    terminating: AtomicBool,
}

impl FiberRuntime {
    /// Creates a fiber that will run `program` once started.
    pub(crate) fn new(
        context: FiberContext,
        scope: Scope,
        program: Arc<Node>,
        env: Env,
        trace: Vec<TraceFrame>,
    ) -> Arc<Self> {
        let fiber = Arc::new(Self {
            id: context.fiber_id(),
            state: FiberState::new(&context, env, trace),
            context,
            scope: scope.clone(),
            slot: Mutex::new(Slot {
                phase: Phase::NotStarted,
                machine: Some(Machine::new(program)),
                next_token: 0,
            }),
            done: Future::new(),
            terminating: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&fiber);
        scope.on_close(Box::new(move |_: &AnyExit| {
            if let Some(fiber) = weak.upgrade() {
                fiber.scope_closing();
            }
        }));
        fiber
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn context(&self) -> &FiberContext {
        &self.context
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn state(&self) -> &FiberState {
        &self.state
    }

    pub(crate) fn done(&self) -> &Future<AnyExit> {
        &self.done
    }

    /// Returns the published exit.
    pub(crate) fn exit(&self) -> Option<AnyExit> {
        match self.done.poll() {
            Some(Settled::Resolved(exit)) => Some(exit),
            Some(Settled::Interrupted(by)) => Some(Exit::interrupt(by)),
            None => None,
        }
    }

    /// Suspends the caller until this fiber is done; yields its exit.
    pub(crate) fn await_done_node(&self) -> Arc<Node> {
        Arc::new(Node::Wait(
            self.done
                .awaitable(|exit| Node::succeed(erase::<AnyExit>(exit))),
        ))
    }

    /// Returns a bounded snapshot of the trace.
    pub(crate) fn trace(&self) -> Trace {
        self.state
            .trace(self.context.platform().max_trace_count())
    }

    pub(crate) fn status(&self) -> FiberStatus {
        let phase = self.slot.lock().phase.clone();
        match phase {
            Phase::NotStarted => FiberStatus::NotStarted,
            Phase::Running => FiberStatus::Running {
                interruptible: self.state.interruptible(),
            },
            Phase::Suspended(_) => FiberStatus::Suspended {
                interruptible: self.state.interruptible(),
            },
            Phase::Done(exit) => FiberStatus::Done(exit),
        }
    }

    /// Schedules the first run. Returns false if already started.
    pub(crate) fn start(self: &Arc<Self>) -> bool {
        let token = {
            let mut slot = self.slot.lock();
            if !matches!(slot.phase, Phase::NotStarted) {
                return false;
            }
            let Some(machine) = slot.machine.take() else {
                return false;
            };
            slot.park(machine)
        };
        tracing::trace!(fiber_id = %self.id, "fiber started");
        self.schedule(token, Resume::Continue);
        true
    }

    /// Interrupts the fiber on behalf of `by`.
    ///
    /// Takes effect immediately if the fiber is interruptible; otherwise it
    /// is deferred until interruption is unmasked.
    pub(crate) fn interrupt_as(&self, by: FiberId) {
        if !self.done.is_pending() {
            return;
        }
        if self.state.record_interrupt(by) {
            tracing::debug!(fiber_id = %self.id, by = %by, "interrupting fiber");
            self.scope.request_close(Exit::interrupt(by));
        } else {
            tracing::debug!(fiber_id = %self.id, by = %by, "interrupt deferred while masked");
        }
    }

    /// True once the scope is closing and nothing masks the interruption.
    pub(crate) fn should_abandon(&self) -> bool {
        self.terminating.load(Ordering::Acquire) && self.state.interruptible()
    }

    fn scope_closing(self: &Arc<Self>) {
        self.terminating.store(true, Ordering::Release);
        let token = match self.slot.lock().phase {
            Phase::Suspended(token) => Some(token),
            Phase::NotStarted | Phase::Running | Phase::Done(_) => None,
        };
        if let Some(token) = token {
            self.schedule(token, Resume::Terminate);
        }
    }

    fn schedule(self: &Arc<Self>, token: u64, resume: Resume) {
        let fiber = Arc::clone(self);
        self.context
            .scheduler()
            .set_timer(move |_| fiber.resume(token, resume), Duration::ZERO);
    }

    fn resume(self: &Arc<Self>, token: u64, resume: Resume) {
        let mut machine = {
            let mut slot = self.slot.lock();
            if !matches!(slot.phase, Phase::Suspended(t) if t == token) {
                return;
            }
            if matches!(resume, Resume::Terminate) {
                let exiting = slot.machine.as_ref().map_or(true, |m| m.exiting);
                if exiting || !self.state.interruptible() {
                    return;
                }
            }
            let Some(machine) = slot.machine.take() else {
                return;
            };
            slot.phase = Phase::Running;
            machine
        };
        if let Resume::Node(node) = resume {
            machine.cont = Continuation::Instruction(node);
        }
        self.run(machine);
    }

    /// Parks the machine and returns the token that resumes it.
    fn park(self: &Arc<Self>, machine: Machine) -> u64 {
        let exiting = machine.exiting;
        let token = self.slot.lock().park(machine);
        // A close that landed while running found no suspension to wake.
        if !exiting && self.terminating.load(Ordering::Acquire) {
            self.schedule(token, Resume::Terminate);
        }
        token
    }

    fn unpark(&self, token: u64) -> Option<Machine> {
        let mut slot = self.slot.lock();
        if !matches!(slot.phase, Phase::Suspended(t) if t == token) {
            return None;
        }
        slot.phase = Phase::Running;
        slot.machine.take()
    }

    fn run(self: &Arc<Self>, mut machine: Machine) {
        let max_ops = self.context.platform().max_op_count();
        loop {
            if !machine.exiting && self.should_abandon() {
                tracing::trace!(fiber_id = %self.id, "scope closed, abandoning program");
                machine.stack.clear();
                machine.cont = Continuation::Exit(None);
            }

            let decision =
                match catch_unwind(AssertUnwindSafe(|| interpreter::step(self, &mut machine, max_ops))) {
                    Ok(decision) => decision,
                    Err(payload) => {
                        let defect = Defect::from_panic(&*payload);
                        tracing::debug!(fiber_id = %self.id, %defect, "caught panic");
                        machine.cont = Continuation::Failure(Cause::Die(defect).traced(self.trace()));
                        Decision::Continue
                    }
                };

            match decision {
                Decision::Continue => {}
                Decision::Suspend => {
                    let token = self.park(machine);
                    self.schedule(token, Resume::Continue);
                    return;
                }
                Decision::Await { awaitable, release } => {
                    if let Some(handle) = release {
                        machine.stack.push(Frame::Release(handle));
                    }
                    self.state.reset_ops();
                    let token = self.park(machine);
                    let fiber = Arc::clone(self);
                    let wake = Box::new(move |node| fiber.schedule(token, Resume::Node(node)));
                    let Some(node) = awaitable.subscribe(wake) else {
                        return;
                    };
                    let Some(mut resumed) = self.unpark(token) else {
                        return;
                    };
                    resumed.cont = Continuation::Instruction(node);
                    machine = resumed;
                }
                Decision::Done(exit) => {
                    {
                        let mut slot = self.slot.lock();
                        slot.phase = Phase::Done(exit.clone());
                        slot.machine = None;
                    }
                    tracing::trace!(
                        fiber_id = %self.id,
                        success = exit.is_success(),
                        "fiber done"
                    );
                    self.done.resolve(exit);
                    return;
                }
            }
        }
    }
}

impl fmt::Debug for FiberRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRuntime")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// A handle to a running fiber producing `A` or failing with `E`.
///
/// Cloning shares the fiber.
pub struct Fiber<A, E = Infallible> {
    runtime: Arc<FiberRuntime>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.runtime.id)
            .field("status", &self.runtime.status())
            .finish()
    }
}

/// Removes an observer added with [`Fiber::add_observer`].
///
/// Dropping the handle leaves the observer registered.
pub struct ObserverHandle {
    done: Future<AnyExit>,
    key: Option<ObserverKey>,
}

impl ObserverHandle {
    /// Deregisters the observer. Returns false if it already ran.
    pub fn remove(self) -> bool {
        self.key.is_some_and(|key| self.done.remove_observer(key))
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<A: Data, E: Data> Fiber<A, E> {
    pub(crate) fn new(runtime: Arc<FiberRuntime>) -> Self {
        Self {
            runtime,
            _marker: PhantomData,
        }
    }

    /// Returns the fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.runtime.id
    }

    /// Returns where the fiber is in its lifecycle.
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.runtime.status()
    }

    /// Returns true once the exit is published.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !self.runtime.done.is_pending()
    }

    /// Returns the exit, if published.
    #[must_use]
    pub fn poll(&self) -> Option<Exit<A, E>> {
        self.runtime.exit().map(downcast_exit)
    }

    /// Calls `observer` with the exit once it is published (immediately if
    /// it already is). The returned handle deregisters the observer.
    pub fn add_observer<F>(&self, observer: F) -> ObserverHandle
    where
        F: FnOnce(Exit<A, E>) + Send + 'static,
    {
        let key = self.runtime.done.add_observer(move |settled| {
            let exit = match settled {
                Settled::Resolved(exit) => exit,
                Settled::Interrupted(by) => Exit::interrupt(by),
            };
            observer(downcast_exit(exit));
        });
        ObserverHandle {
            done: self.runtime.done.clone(),
            key,
        }
    }

    /// Requests interruption on behalf of `by` without waiting.
    pub fn interrupt_as(&self, by: FiberId) {
        self.runtime.interrupt_as(by);
    }

    /// Returns a bounded snapshot of the fiber's trace.
    #[must_use]
    pub fn trace(&self) -> Trace {
        self.runtime.trace()
    }

    /// Returns the fiber's context.
    #[must_use]
    pub fn context(&self) -> &FiberContext {
        &self.runtime.context
    }

    /// Waits for the fiber, merges its fiber refs into the joining fiber and
    /// ends with its exit.
    #[must_use]
    pub fn join(&self) -> Fx<A, E> {
        Fx::from_node(Arc::new(Node::Join(Arc::clone(&self.runtime))))
    }

    /// Waits for the fiber and yields its exit; never fails.
    #[must_use]
    pub fn await_exit(&self) -> Fx<Exit<A, E>, Infallible> {
        Fx::from_node(self.runtime.await_done_node().flat_map(|exit| {
            Node::succeed(erase(downcast_exit::<A, E>(into_exit(exit))))
        }))
    }

    /// Interrupts the fiber on behalf of the current fiber and waits for it
    /// to finish.
    #[must_use]
    pub fn interrupt(&self) -> Fx<Exit<A, E>, Infallible> {
        let this = self.clone();
        Fx::get_fiber_context().flat_map(move |cx| {
            this.interrupt_as(cx.fiber_id());
            this.await_exit()
        })
    }
}
