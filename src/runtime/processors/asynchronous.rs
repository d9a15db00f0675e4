//! Async: suspend on a callback completed from outside the fiber.

use crate::fx::instruction::{Register, Registration};
use crate::runtime::continuation::{Continuation, Decision, Machine};
use crate::runtime::fiber::FiberRuntime;
use crate::sync::Future;
use crate::types::AnyExit;
use std::sync::Arc;

/// Runs `register` with a fresh callback.
///
/// A ready registration continues synchronously. A pending one registers its
/// canceler as a finalizer on the fiber's scope, so interrupting the fiber
/// runs it exactly once; the handle is released again once the resumed
/// program completes.
pub(crate) fn asynchronous(
    fiber: &Arc<FiberRuntime>,
    machine: &mut Machine,
    register: &Register,
) -> Decision {
    let callback = Future::new();
    match register(callback.clone()) {
        Registration::Ready(node) => {
            machine.cont = Continuation::Instruction(node);
            Decision::Continue
        }
        Registration::Pending(canceler) => {
            let release = canceler.and_then(|canceler| {
                fiber
                    .scope()
                    .add_finalizer(Arc::new(move |_: AnyExit| Arc::clone(&canceler)))
            });
            Decision::Await {
                awaitable: callback.awaitable(|node| node),
                release,
            }
        }
    }
}
