//! The trampoline step.
//!
//! [`step`] consumes the fiber's current continuation and either produces
//! the next one (`Continue`) or tells the run loop to yield, suspend on an
//! awaitable, or publish the fiber's exit. Values and failures unwind the
//! explicit frame stack:
//!
//! | Frame | on value | on failure |
//! |-------|----------|------------|
//! | `Map` | continue with it | skipped |
//! | `Fold` | continue with it | recover |
//! | `Finalizer` | run the finalizer, then resume | run the finalizer, then resume |
//! | `Pop` | restore a state stack | restore a state stack |
//! | `ScopeExit` | resume with the saved exit | append to the saved exit |
//! | `Release` | deregister a canceler | deregister a canceler |
//!
//! An empty stack ends the program: the fiber closes its scope with the exit
//! and publishes whatever the scope publishes.

use super::continuation::{Continuation, Decision, Frame, Machine, Restore};
use super::fiber::FiberRuntime;
use super::processors::{asynchronous, fork, race, zip};
use crate::fx::instruction::{Finalizer, Node};
use crate::scope::finalizer::into_exit;
use crate::scope::FinalizerHandle;
use crate::sync::Semaphore;
use crate::types::value::{erase, unit};
use crate::types::{AnyCause, AnyExit, Exit, Value};
use std::sync::Arc;

/// Advances `machine` by one continuation.
pub(crate) fn step(fiber: &Arc<FiberRuntime>, machine: &mut Machine, max_ops: usize) -> Decision {
    let cont = std::mem::replace(&mut machine.cont, Continuation::Exit(None));
    match cont {
        Continuation::Initial(program) => {
            tracing::trace!(fiber_id = %fiber.id(), program = program.tag(), "fiber running");
            machine.cont = Continuation::Instruction(program);
            Decision::Continue
        }
        Continuation::Exit(exit) => {
            begin_exit(fiber, machine, exit);
            Decision::Continue
        }
        cont => {
            if fiber.state().tick(max_ops) {
                tracing::trace!(fiber_id = %fiber.id(), "op budget spent, yielding");
                machine.cont = cont;
                return Decision::Suspend;
            }
            match cont {
                Continuation::Instruction(node) => instruction(fiber, machine, &node),
                Continuation::Value(value) => unwind_value(fiber, machine, value),
                Continuation::Failure(cause) => unwind_failure(fiber, machine, cause),
                Continuation::Initial(_) | Continuation::Exit(_) => Decision::Continue,
            }
        }
    }
}

/// Abandons the stack and continues with the scope close.
fn begin_exit(fiber: &Arc<FiberRuntime>, machine: &mut Machine, exit: Option<AnyExit>) {
    machine.exiting = true;
    machine.stack.clear();
    let state = fiber.state();
    state.unwind_to_base();
    state.push_interrupt_status(false);
    let scope = fiber.scope();
    let close = match exit {
        Some(exit) => scope.close_or_wait_node(exit),
        None => scope.await_close_node(),
    };
    machine.cont = Continuation::Instruction(close);
}

fn instruction(fiber: &Arc<FiberRuntime>, machine: &mut Machine, node: &Arc<Node>) -> Decision {
    let state = fiber.state();
    machine.cont = match &**node {
        Node::Succeed(value) => Continuation::Value(Arc::clone(value)),
        Node::Fail(cause) => Continuation::Failure(cause.clone()),
        Node::FromLazy(thunk) => Continuation::from_exit(thunk()),
        Node::Defer(lazy) => Continuation::Instruction(lazy()),
        Node::FlatMap(inner, k) => {
            machine.stack.push(Frame::Map(Arc::clone(k)));
            Continuation::Instruction(Arc::clone(inner))
        }
        Node::Fold(inner, recover, k) => {
            machine
                .stack
                .push(Frame::Fold(Arc::clone(recover), Arc::clone(k)));
            Continuation::Instruction(Arc::clone(inner))
        }
        Node::Access(f) => Continuation::Instruction(f(&state.env())),
        Node::Provide(inner, env) => {
            state.push_env(state.env().union(env));
            machine.stack.push(Frame::Pop(Restore::Env));
            Continuation::Instruction(Arc::clone(inner))
        }
        Node::Async(register) => return asynchronous::asynchronous(fiber, machine, register),
        Node::Ensuring(inner, finalizer) => {
            let handle = fiber.scope().add_finalizer(Arc::clone(finalizer));
            machine
                .stack
                .push(Frame::Finalizer(handle, Arc::clone(finalizer)));
            Continuation::Instruction(Arc::clone(inner))
        }
        Node::Fork(program, params) => {
            let child = fork::fork_child(fiber, Arc::clone(program), params.clone());
            Continuation::Value(erase(child))
        }
        Node::GetFiberContext => Continuation::Value(erase(fiber.context().clone())),
        Node::GetFiberScope => Continuation::Value(erase(fiber.scope().clone())),
        Node::GetTrace => Continuation::Value(erase(fiber.trace())),
        Node::Join(child) => Continuation::Instruction(fork::join(fiber, child)),
        Node::RaceAll(candidates) => Continuation::Instruction(race::race_all(fiber, candidates)),
        Node::ZipAll(programs) => Continuation::Instruction(zip::zip_all(fiber, programs)),
        Node::SetInterruptStatus(inner, interruptible) => {
            state.push_interrupt_status(*interruptible);
            machine.stack.push(Frame::Pop(Restore::InterruptStatus));
            if *interruptible {
                let _ = apply_deferred_interrupts(fiber);
            }
            Continuation::Instruction(Arc::clone(inner))
        }
        Node::WithConcurrency(inner, level) => {
            state.push_concurrency(Semaphore::new(*level));
            machine.stack.push(Frame::Pop(Restore::Concurrency));
            Continuation::Instruction(Arc::clone(inner))
        }
        Node::AddTrace(inner, frame) => {
            state.push_trace(frame.clone());
            machine.stack.push(Frame::Pop(Restore::Trace));
            Continuation::Instruction(Arc::clone(inner))
        }
        Node::Wait(awaitable) => {
            return Decision::Await {
                awaitable: Arc::clone(awaitable),
                release: None,
            }
        }
        Node::YieldNow => {
            machine.cont = Continuation::Value(unit());
            return Decision::Suspend;
        }
    };
    Decision::Continue
}

/// Closes the scope on behalf of interrupts recorded while masked, if the
/// fiber is interruptible again. Returns true if it did.
fn apply_deferred_interrupts(fiber: &Arc<FiberRuntime>) -> bool {
    let Some(cause) = fiber
        .state()
        .take_pending_if_interruptible()
        .and_then(AnyCause::interrupts)
    else {
        return false;
    };
    tracing::debug!(fiber_id = %fiber.id(), "applying deferred interrupt");
    fiber.scope().request_close(Exit::Failure(cause))
}

/// Pops one state stack. Returns true if unmasking exposed a pending close,
/// in which case unwinding must stop so that the remaining finalizer frames
/// stay registered with the scope.
fn restore(fiber: &Arc<FiberRuntime>, restore: Restore) -> bool {
    let state = fiber.state();
    match restore {
        Restore::InterruptStatus => {
            state.pop_interrupt_status();
            let _ = apply_deferred_interrupts(fiber);
            return fiber.should_abandon();
        }
        Restore::Concurrency => state.pop_concurrency(),
        Restore::Env => state.pop_env(),
        Restore::Trace => state.pop_trace(),
    }
    false
}

/// Runs a finalizer frame with `exit`, uninterruptibly, unless the scope
/// already claimed it. Returns false if there is nothing to run.
fn enter_finalizer(
    fiber: &Arc<FiberRuntime>,
    machine: &mut Machine,
    handle: Option<FinalizerHandle>,
    finalizer: &Finalizer,
    exit: AnyExit,
) -> bool {
    if !handle.map_or(true, |handle| handle.cancel()) {
        return false;
    }
    machine.stack.push(Frame::ScopeExit(exit.clone()));
    fiber.state().push_interrupt_status(false);
    machine.stack.push(Frame::Pop(Restore::InterruptStatus));
    machine.cont = Continuation::Instruction(finalizer(exit));
    true
}

/// Ends the program with `exit`, or publishes it if the scope is already
/// closed.
fn finish(machine: &mut Machine, exit: AnyExit) -> Decision {
    if machine.exiting {
        Decision::Done(exit)
    } else {
        machine.cont = Continuation::Exit(Some(exit));
        Decision::Continue
    }
}

fn unwind_value(fiber: &Arc<FiberRuntime>, machine: &mut Machine, value: Value) -> Decision {
    loop {
        let Some(frame) = machine.stack.pop() else {
            let exit = if machine.exiting {
                into_exit(value)
            } else {
                Exit::Success(value)
            };
            return finish(machine, exit);
        };
        match frame {
            Frame::Map(k) | Frame::Fold(_, k) => {
                machine.cont = Continuation::Instruction(k(value));
                return Decision::Continue;
            }
            Frame::Pop(kind) => {
                if restore(fiber, kind) {
                    machine.cont = Continuation::Value(value);
                    return Decision::Continue;
                }
            }
            Frame::Release(handle) => {
                handle.cancel();
            }
            Frame::Finalizer(handle, finalizer) => {
                let exit = Exit::Success(Arc::clone(&value));
                if enter_finalizer(fiber, machine, handle, &finalizer, exit) {
                    return Decision::Continue;
                }
            }
            Frame::ScopeExit(saved) => {
                machine.cont = Continuation::from_exit(saved);
                return Decision::Continue;
            }
        }
    }
}

fn unwind_failure(fiber: &Arc<FiberRuntime>, machine: &mut Machine, cause: AnyCause) -> Decision {
    loop {
        let Some(frame) = machine.stack.pop() else {
            return finish(machine, Exit::Failure(cause));
        };
        match frame {
            Frame::Map(_) => {}
            Frame::Fold(recover, _) => {
                machine.cont = Continuation::Instruction(recover(cause));
                return Decision::Continue;
            }
            Frame::Pop(kind) => {
                if restore(fiber, kind) {
                    machine.cont = Continuation::Failure(cause);
                    return Decision::Continue;
                }
            }
            Frame::Release(handle) => {
                handle.cancel();
            }
            Frame::Finalizer(handle, finalizer) => {
                let exit = Exit::Failure(cause.clone());
                if enter_finalizer(fiber, machine, handle, &finalizer, exit) {
                    return Decision::Continue;
                }
            }
            Frame::ScopeExit(saved) => {
                machine.cont = Continuation::from_exit(saved.then_cause(Some(cause)));
                return Decision::Continue;
            }
        }
    }
}
