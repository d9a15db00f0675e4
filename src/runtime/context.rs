//! Immutable per-fiber context and the platform it shares with its runtime.
//!
//! A [`Platform`] carries the limits and services every fiber of a runtime
//! shares: the yield threshold, the trace bound, the fiber id sequence and
//! the scheduler. A [`FiberContext`] pins one fiber to a platform together
//! with its fiber refs, default concurrency level and a weak link to the
//! context of the fiber that forked it.

use super::config::{DEFAULT_MAX_OP_COUNT, DEFAULT_MAX_TRACE_COUNT};
use crate::fiber_ref::FiberRefs;
use crate::scope::FinalizationStrategy;
use crate::time::Scheduler;
use crate::types::{FiberId, SequenceNumber};
use std::fmt;
use std::sync::{Arc, Weak};

/// Limits and services shared by every fiber of a runtime.
///
/// Cloning shares the sequence counter and the scheduler.
#[derive(Clone)]
pub struct Platform {
    max_op_count: usize,
    max_trace_count: usize,
    sequence: SequenceNumber,
    scheduler: Scheduler,
    finalization: FinalizationStrategy,
}

impl Platform {
    /// Creates a platform over `scheduler` with default limits.
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            max_op_count: DEFAULT_MAX_OP_COUNT,
            max_trace_count: DEFAULT_MAX_TRACE_COUNT,
            sequence: SequenceNumber::new(),
            scheduler,
            finalization: FinalizationStrategy::Sequential,
        }
    }

    /// Sets the number of synchronous steps a fiber takes before yielding.
    #[must_use]
    pub fn with_max_op_count(mut self, max_op_count: usize) -> Self {
        self.max_op_count = max_op_count.max(1);
        self
    }

    /// Sets the number of trace frames kept per fiber.
    #[must_use]
    pub fn with_max_trace_count(mut self, max_trace_count: usize) -> Self {
        self.max_trace_count = max_trace_count;
        self
    }

    /// Shares an existing fiber id sequence.
    #[must_use]
    pub fn with_sequence(mut self, sequence: SequenceNumber) -> Self {
        self.sequence = sequence;
        self
    }

    /// Sets the strategy of root scopes.
    #[must_use]
    pub fn with_finalization(mut self, finalization: FinalizationStrategy) -> Self {
        self.finalization = finalization;
        self
    }

    /// Returns the cooperative yield threshold.
    #[must_use]
    pub fn max_op_count(&self) -> usize {
        self.max_op_count
    }

    /// Returns the per-fiber trace bound.
    #[must_use]
    pub fn max_trace_count(&self) -> usize {
        self.max_trace_count
    }

    /// Returns the fiber id sequence.
    #[must_use]
    pub fn sequence(&self) -> &SequenceNumber {
        &self.sequence
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the strategy of root scopes.
    #[must_use]
    pub fn finalization(&self) -> FinalizationStrategy {
        self.finalization
    }

    /// Allocates the id of a new fiber, stamped with the scheduler time.
    #[must_use]
    pub fn next_fiber_id(&self) -> FiberId {
        FiberId::new(self.sequence.increment(), self.scheduler.now())
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("max_op_count", &self.max_op_count)
            .field("max_trace_count", &self.max_trace_count)
            .field("allocated", &self.sequence.current())
            .field("finalization", &self.finalization)
            .finish_non_exhaustive()
    }
}

struct ContextInner {
    fiber_id: FiberId,
    platform: Platform,
    fiber_refs: FiberRefs,
    concurrency_level: usize,
    interrupt_status: bool,
    parent: Option<Weak<ContextInner>>,
}

/// The immutable context of one fiber.
///
/// Cloning shares the context.
#[derive(Clone)]
pub struct FiberContext {
    inner: Arc<ContextInner>,
}

impl FiberContext {
    /// Creates the context of a root fiber.
    #[must_use]
    pub fn root(
        fiber_id: FiberId,
        platform: Platform,
        fiber_refs: FiberRefs,
        concurrency_level: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                fiber_id,
                platform,
                fiber_refs,
                concurrency_level: concurrency_level.max(1),
                interrupt_status: true,
                parent: None,
            }),
        }
    }

    /// Creates the context of a child fiber.
    ///
    /// The child shares the platform and inherits the concurrency level
    /// unless `concurrency_level` overrides it.
    #[must_use]
    pub fn child(
        &self,
        fiber_id: FiberId,
        fiber_refs: FiberRefs,
        concurrency_level: Option<usize>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                fiber_id,
                platform: self.inner.platform.clone(),
                fiber_refs,
                concurrency_level: concurrency_level
                    .unwrap_or(self.inner.concurrency_level)
                    .max(1),
                interrupt_status: self.inner.interrupt_status,
                parent: Some(Arc::downgrade(&self.inner)),
            }),
        }
    }

    /// Returns the fiber this context belongs to.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.inner.fiber_id
    }

    /// Returns the platform.
    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    /// Returns the scheduler the fiber runs on.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        self.inner.platform.scheduler()
    }

    /// Returns the fiber's fiber-local values.
    #[must_use]
    pub fn fiber_refs(&self) -> &FiberRefs {
        &self.inner.fiber_refs
    }

    /// Returns how many children this fiber may run at once.
    #[must_use]
    pub fn concurrency_level(&self) -> usize {
        self.inner.concurrency_level
    }

    /// Returns the interrupt status the fiber starts with.
    #[must_use]
    pub fn interrupt_status(&self) -> bool {
        self.inner.interrupt_status
    }

    /// Returns the context of the forking fiber, while it is alive.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }
}

impl fmt::Debug for FiberContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberContext")
            .field("fiber_id", &self.inner.fiber_id)
            .field("concurrency_level", &self.inner.concurrency_level)
            .field("parent", &self.parent().map(|p| p.fiber_id()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Time;
    use std::time::Duration;

    #[test]
    fn fiber_ids_are_sequential_and_stamped() {
        let platform = Platform::new(Scheduler::virtual_time());
        let first = platform.next_fiber_id();
        platform.scheduler().advance(Duration::from_millis(4));
        let second = platform.next_fiber_id();

        assert_eq!(first.sequence(), 1);
        assert_eq!(second.sequence(), 2);
        assert_eq!(second.started_at(), Time::from_millis(4));
    }

    #[test]
    fn shared_sequence_never_repeats() {
        let sequence = SequenceNumber::new();
        let a = Platform::new(Scheduler::virtual_time()).with_sequence(sequence.clone());
        let b = Platform::new(Scheduler::virtual_time()).with_sequence(sequence);
        assert_ne!(a.next_fiber_id(), b.next_fiber_id());
    }

    #[test]
    fn child_inherits_and_links_parent() {
        let platform = Platform::new(Scheduler::virtual_time()).with_max_op_count(0);
        assert_eq!(platform.max_op_count(), 1);

        let root = FiberContext::root(FiberId::new_for_test(1), platform, FiberRefs::new(), 4);
        let child = root.child(FiberId::new_for_test(2), root.fiber_refs().fork(), None);
        let narrowed = root.child(FiberId::new_for_test(3), FiberRefs::new(), Some(1));

        assert_eq!(child.concurrency_level(), 4);
        assert_eq!(narrowed.concurrency_level(), 1);
        assert!(child.interrupt_status());
        assert_eq!(child.parent().map(|p| p.fiber_id()), Some(root.fiber_id()));

        drop(root);
        assert!(child.parent().is_none());
    }
}
