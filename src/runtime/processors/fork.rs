//! Fork and Join.

use crate::fx::instruction::Node;
use crate::fx::ForkParams;
use crate::runtime::fiber::FiberRuntime;
use crate::scope::finalizer::into_exit;
use crate::trace::TraceFrame;
use std::sync::Arc;

/// Starts `program` in a child of `parent`.
///
/// The child gets a scope forked from the parent's scope (or from the scope
/// in `params`), a fork of the parent's fiber refs, the parent's current
/// environment and trace, and runs holding a permit of the parent's current
/// semaphore.
pub(crate) fn fork_child(
    parent: &Arc<FiberRuntime>,
    program: Arc<Node>,
    params: ForkParams,
) -> Arc<FiberRuntime> {
    let context = parent.context();
    let platform = context.platform();
    let id = platform.next_fiber_id();

    let scope = params.scope.as_ref().unwrap_or(parent.scope()).fork(id);
    let fiber_refs = params
        .fiber_refs
        .unwrap_or_else(|| context.fiber_refs().fork());
    let child_context = context.child(id, fiber_refs, params.concurrency);

    let state = parent.state();
    let body = state.semaphore().with_permit_node(program);
    let mut trace = state.frames(platform.max_trace_count());
    trace.push(TraceFrame::Fork(parent.id()));

    let child = FiberRuntime::new(child_context, scope, body, state.env(), trace);
    tracing::trace!(parent = %parent.id(), fiber_id = %id, "fiber forked");
    child.start();
    child
}

/// Waits for `child`, merges its fiber refs into the joiner's and ends with
/// the child's exit.
pub(crate) fn join(joiner: &Arc<FiberRuntime>, child: &Arc<FiberRuntime>) -> Arc<Node> {
    let ours = joiner.context().fiber_refs().clone();
    let theirs = child.context().fiber_refs().clone();
    child.await_done_node().flat_map(move |exit| {
        ours.join(&theirs);
        Node::from_exit(into_exit(exit))
    })
}
