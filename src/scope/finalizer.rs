//! Finalizers and how a closing scope runs them.
//!
//! Finalizers are cleanup programs invoked with the exit that closed their
//! scope. A closing scope runs them uninterruptibly with its
//! [`FinalizationStrategy`] and appends every finalizer failure to the
//! triggering exit with `Then`, so cleanup failures are never dropped.

use super::ScopeInner;
use crate::fx::instruction::{Finalizer, Node};
use crate::fx::Fx;
use crate::types::value::{downcast, erase};
use crate::types::{AnyExit, Cause, Exit, Value};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

/// How a closing scope runs its finalizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinalizationStrategy {
    /// One at a time, last registered first.
    #[default]
    Sequential,
    /// All at once, each in its own fiber.
    Concurrent,
    /// Concurrently, at most `n` at a time.
    ConcurrentN(usize),
}

impl fmt::Display for FinalizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Concurrent => write!(f, "concurrent"),
            Self::ConcurrentN(n) => write!(f, "concurrent:{n}"),
        }
    }
}

impl FromStr for FinalizationStrategy {
    type Err = String;

    /// Parses `sequential`, `concurrent` or `concurrent:N` (N >= 1).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" => Ok(Self::Concurrent),
            other => {
                let n = other
                    .strip_prefix("concurrent:")
                    .ok_or_else(|| format!("unknown finalization strategy {other:?}"))?;
                match n.parse::<usize>() {
                    Ok(n) if n > 0 => Ok(Self::ConcurrentN(n)),
                    _ => Err(format!("expected a positive bound, got {n:?}")),
                }
            }
        }
    }
}

/// Deregistration capability returned by [`Scope::ensuring`](super::Scope::ensuring).
///
/// Dropping the handle leaves the finalizer registered.
#[derive(Clone)]
pub struct FinalizerHandle {
    pub(super) scope: Weak<ScopeInner>,
    pub(super) key: u64,
}

impl FinalizerHandle {
    pub(crate) fn take(&self) -> Option<Finalizer> {
        self.scope
            .upgrade()
            .and_then(|scope| scope.take_finalizer(self.key))
    }

    /// Removes the finalizer without running it.
    ///
    /// Returns true if it was still registered; once this returns true the
    /// scope will never run it.
    pub fn cancel(&self) -> bool {
        self.take().is_some()
    }

    /// Removes the finalizer and runs it now with `exit`.
    ///
    /// Yields false without running anything if the finalizer was already
    /// cancelled, released, or claimed by a closing scope.
    #[must_use]
    pub fn release(&self, exit: AnyExit) -> Fx<bool, Infallible> {
        let handle = self.clone();
        let node = Node::defer(move || match handle.take() {
            Some(finalizer) => finalizer(exit.clone()).then(Node::succeed(erase(true))),
            None => Node::succeed(erase(false)),
        });
        Fx::from_node(node.uninterruptible())
    }
}

impl fmt::Debug for FinalizerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerHandle")
            .field("key", &self.key)
            .finish()
    }
}

/// Appends the failure of one finalizer run to the accumulated exit.
fn combine(acc: &Value, outcome: &Value) -> AnyExit {
    let acc = into_exit(Arc::clone(acc));
    match into_exit(Arc::clone(outcome)) {
        Exit::Success(_) => acc,
        Exit::Failure(cause) => acc.then_cause(Some(cause)),
    }
}

pub(crate) fn into_exit(value: Value) -> AnyExit {
    downcast::<AnyExit>(value).unwrap_or_else(|defect| Exit::Failure(Cause::Die(defect)))
}

/// Builds the program that runs `finalizers` (last registered first) for
/// `exit`. It yields the final exit as a value and never fails.
pub(crate) fn run_finalizers(
    exit: AnyExit,
    finalizers: Vec<Finalizer>,
    strategy: FinalizationStrategy,
) -> Arc<Node> {
    let start: Value = erase(exit.clone());
    if finalizers.is_empty() {
        return Node::succeed(start);
    }

    let runs: Vec<Arc<Node>> = finalizers
        .into_iter()
        .rev()
        .map(|finalizer| {
            let exit = exit.clone();
            Node::defer(move || finalizer(exit.clone())).exit()
        })
        .collect();

    let program = match strategy {
        FinalizationStrategy::Sequential => runs.into_iter().fold(Node::succeed(start), |acc, run| {
            acc.flat_map(move |acc_value| {
                run.flat_map(move |outcome| Node::succeed(erase(combine(&acc_value, &outcome))))
            })
        }),
        FinalizationStrategy::Concurrent | FinalizationStrategy::ConcurrentN(_) => {
            // Finalizers never queue on the closing fiber's semaphore: its
            // permits may be held by the very children being closed.
            let level = match strategy {
                FinalizationStrategy::ConcurrentN(n) => n.max(1),
                _ => usize::MAX,
            };
            let zipped = Arc::new(Node::WithConcurrency(Arc::new(Node::ZipAll(runs)), level));
            zipped.flat_map(move |outcomes| {
                let outcomes = downcast::<Vec<Value>>(outcomes).unwrap_or_default();
                let exit = outcomes
                    .iter()
                    .fold(Arc::clone(&start), |acc, outcome| erase(combine(&acc, outcome)));
                Node::succeed(exit)
            })
        }
    };
    program.uninterruptible()
}
