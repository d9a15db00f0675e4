//! Handlers for the instructions that create or suspend on other fibers.
//!
//! Fork, RaceAll and ZipAll build child [`FiberRuntime`]s, which run the same
//! interpreter that called them. Each handler performs its immediate effect
//! (forking, registering) when the instruction is stepped and returns the
//! program the calling fiber continues with.

pub(crate) mod asynchronous;
pub(crate) mod fork;
pub(crate) mod race;
pub(crate) mod zip;

use super::fiber::FiberRuntime;
use crate::fx::instruction::Node;
use crate::scope::finalizer::into_exit;
use crate::types::value::{downcast, erase};
use crate::types::AnyExit;
use std::sync::Arc;

/// Waits for every fiber in order and yields their exits as a
/// `Vec<AnyExit>`.
pub(crate) fn await_exits(fibers: Vec<Arc<FiberRuntime>>) -> Arc<Node> {
    fibers
        .into_iter()
        .fold(Node::succeed(erase(Vec::<AnyExit>::new())), |acc, fiber| {
            acc.flat_map(move |exits| {
                let exits = downcast::<Vec<AnyExit>>(exits).unwrap_or_default();
                fiber.await_done_node().flat_map(move |exit| {
                    let mut exits = exits.clone();
                    exits.push(into_exit(exit));
                    Node::succeed(erase(exits))
                })
            })
        })
}
