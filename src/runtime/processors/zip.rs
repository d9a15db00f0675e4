//! ZipAll: all values in input order, or fail fast.

use super::await_exits;
use super::fork::fork_child;
use crate::fx::instruction::Node;
use crate::fx::ForkParams;
use crate::runtime::fiber::FiberRuntime;
use crate::sync::{Future, Settled};
use crate::types::value::{downcast, erase};
use crate::types::{AnyExit, Defect, Exit, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Forks every program into a fresh arena scope, bounded by the calling
/// fiber's current semaphore, and builds the program that collects them.
///
/// On success the values come back in input order and every member's fiber
/// refs are merged into the calling fiber. The first failure interrupts the
/// other members, waits for them, and fails with the first cause followed
/// (`Then`, in input order) by every other member's failure.
pub(crate) fn zip_all(fiber: &Arc<FiberRuntime>, programs: &[Arc<Node>]) -> Arc<Node> {
    if programs.is_empty() {
        return Node::succeed(erase(Vec::<Value>::new()));
    }
    let me = fiber.id();
    let arena = fiber.scope().fork(me);
    let members: Vec<Arc<FiberRuntime>> = programs
        .iter()
        .map(|program| {
            fork_child(
                fiber,
                Arc::clone(program),
                ForkParams::new().scope(arena.clone()),
            )
        })
        .collect();

    // Some((index, exit)) on the first failure, None once all succeeded.
    let settled: Future<Option<(usize, AnyExit)>> = Future::new();
    let remaining = Arc::new(AtomicUsize::new(members.len()));
    for (index, member) in members.iter().enumerate() {
        let settled = settled.clone();
        let remaining = Arc::clone(&remaining);
        member.done().observe(move |outcome| {
            let Settled::Resolved(exit) = outcome else {
                return;
            };
            if exit.is_failure() {
                settled.resolve(Some((index, exit)));
            } else if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                settled.resolve(None);
            }
        });
    }

    let refs = fiber.context().fiber_refs().clone();
    Arc::new(Node::Wait(settled.awaitable(|s| Node::succeed(erase(s))))).flat_map(
        move |outcome| {
            let close = arena.close_or_wait_node(Exit::interrupt(me));
            match downcast::<Option<(usize, AnyExit)>>(outcome) {
                Err(defect) => Node::die(defect),
                Ok(None) => {
                    let mut values = Vec::with_capacity(members.len());
                    for member in &members {
                        match member.exit() {
                            Some(Exit::Success(value)) => {
                                refs.join(member.context().fiber_refs());
                                values.push(value);
                            }
                            _ => return Node::die(Defect::new("zip member ended without a value")),
                        }
                    }
                    close.then(Node::succeed(erase(values)))
                }
                Ok(Some((index, exit))) => {
                    let Exit::Failure(first) = exit else {
                        return Node::die(Defect::new("zip failure without a cause"));
                    };
                    let others: Vec<Arc<FiberRuntime>> = members
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != index)
                        .map(|(_, other)| Arc::clone(other))
                        .collect();
                    for other in &others {
                        other.interrupt_as(me);
                    }
                    tracing::trace!(fiber_id = %me, failed = index, "zip failing fast");
                    await_exits(others).flat_map(move |exits| {
                        let exits = downcast::<Vec<AnyExit>>(exits).unwrap_or_default();
                        let cause = first.clone().then_all(exits.into_iter().filter_map(
                            |e| match e {
                                Exit::Failure(c) => Some(c),
                                Exit::Success(_) => None,
                            },
                        ));
                        close.then(Node::fail(cause))
                    })
                }
            }
        },
    )
}
