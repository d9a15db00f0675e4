//! RaceAll: first exit wins, losers are interrupted and drained.

use super::await_exits;
use super::fork::fork_child;
use crate::fx::instruction::Node;
use crate::fx::ForkParams;
use crate::runtime::fiber::FiberRuntime;
use crate::sync::{Future, Settled};
use crate::types::value::{downcast, erase};
use crate::types::{AnyCause, AnyExit, CauseLeaf, Defect, Exit, FiberId};
use std::sync::Arc;

/// True if every leaf of `cause` is an interruption by `by`.
fn interrupted_only_by(cause: &AnyCause, by: FiberId) -> bool {
    cause
        .leaves()
        .iter()
        .all(|leaf| matches!(leaf, CauseLeaf::Interrupt(id) if *id == by))
}

/// Forks every candidate into a fresh arena scope and builds the program
/// that waits for the first exit.
///
/// Losers are interrupted (attributed to the racing fiber) and awaited before
/// the race ends. A failing winner keeps any loser failure that is more than
/// the interruption the race itself caused, appended with `Then`. The
/// winner's fiber refs are merged into the racing fiber.
pub(crate) fn race_all(fiber: &Arc<FiberRuntime>, candidates: &[Arc<Node>]) -> Arc<Node> {
    if candidates.is_empty() {
        return Node::die(Defect::new("race of zero programs"));
    }
    let me = fiber.id();
    let arena = fiber.scope().fork(me);
    let contestants: Vec<Arc<FiberRuntime>> = candidates
        .iter()
        .map(|candidate| {
            fork_child(
                fiber,
                Arc::clone(candidate),
                ForkParams::new().scope(arena.clone()),
            )
        })
        .collect();

    let winner: Future<(usize, AnyExit)> = Future::new();
    for (index, contestant) in contestants.iter().enumerate() {
        let winner = winner.clone();
        contestant.done().observe(move |settled| {
            if let Settled::Resolved(exit) = settled {
                winner.resolve((index, exit));
            }
        });
    }

    let refs = fiber.context().fiber_refs().clone();
    Arc::new(Node::Wait(winner.awaitable(|won| Node::succeed(erase(won))))).flat_map(
        move |won| {
            let (index, exit) = match downcast::<(usize, AnyExit)>(won) {
                Ok(won) => won,
                Err(defect) => return Node::die(defect),
            };
            let losers: Vec<Arc<FiberRuntime>> = contestants
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != index)
                .map(|(_, loser)| Arc::clone(loser))
                .collect();
            for loser in &losers {
                loser.interrupt_as(me);
            }
            tracing::trace!(fiber_id = %me, winner = index, losers = losers.len(), "race decided");

            let winner_refs = contestants
                .get(index)
                .map(|winner| winner.context().fiber_refs().clone());
            let refs = refs.clone();
            let arena = arena.clone();
            await_exits(losers).flat_map(move |exits| {
                let exits = downcast::<Vec<AnyExit>>(exits).unwrap_or_default();
                let outcome = match exit.clone() {
                    Exit::Success(value) => Exit::Success(value),
                    Exit::Failure(cause) => {
                        Exit::Failure(cause.then_all(exits.into_iter().filter_map(|e| match e {
                            Exit::Failure(c) if !interrupted_only_by(&c, me) => Some(c),
                            _ => None,
                        })))
                    }
                };
                if let Some(winner_refs) = &winner_refs {
                    refs.join(winner_refs);
                }
                arena
                    .close_or_wait_node(Exit::interrupt(me))
                    .then(Node::from_exit(outcome))
            })
        },
    )
}
