//! Mutable per-fiber interpreter state.
//!
//! The interpreter keeps four stacks per fiber (concurrency semaphores,
//! interrupt status, service environments and trace frames) plus the
//! cooperative op counter and the set of interrupts deferred by a masked
//! region. Each stack is pushed by an instruction and popped by the matching
//! `Pop` frame; the bottom element set at fiber creation is never popped.
//!
//! Everything sits behind one `parking_lot::Mutex` so another fiber calling
//! `interrupt_as` reads a consistent interrupt status.

use super::context::FiberContext;
use crate::fx::Env;
use crate::sync::Semaphore;
use crate::trace::{Trace, TraceFrame};
use crate::types::FiberId;
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeSet;

struct StateInner {
    op_count: usize,
    concurrency: SmallVec<[Semaphore; 2]>,
    interrupt_status: SmallVec<[bool; 4]>,
    interrupted_by: BTreeSet<FiberId>,
    env: SmallVec<[Env; 2]>,
    trace: Vec<TraceFrame>,
    /// Frames inherited at fork; never popped.
    trace_base: usize,
}

/// Stacks and counters of one fiber.
pub(crate) struct FiberState {
    inner: Mutex<StateInner>,
}

impl FiberState {
    pub(crate) fn new(context: &FiberContext, env: Env, trace: Vec<TraceFrame>) -> Self {
        let trace_base = trace.len();
        Self {
            inner: Mutex::new(StateInner {
                op_count: 0,
                concurrency: smallvec![Semaphore::new(context.concurrency_level())],
                interrupt_status: smallvec![context.interrupt_status()],
                interrupted_by: BTreeSet::new(),
                env: smallvec![env],
                trace,
                trace_base,
            }),
        }
    }

    /// Counts one synchronous step.
    ///
    /// Returns true (and resets the counter) when `max` steps have run since
    /// the last yield, in which case the step must not run yet.
    pub(crate) fn tick(&self, max: usize) -> bool {
        let mut inner = self.inner.lock();
        if inner.op_count >= max {
            inner.op_count = 0;
            true
        } else {
            inner.op_count += 1;
            false
        }
    }

    pub(crate) fn reset_ops(&self) {
        self.inner.lock().op_count = 0;
    }

    pub(crate) fn op_count(&self) -> usize {
        self.inner.lock().op_count
    }

    pub(crate) fn interruptible(&self) -> bool {
        self.inner
            .lock()
            .interrupt_status
            .last()
            .copied()
            .unwrap_or(true)
    }

    pub(crate) fn push_interrupt_status(&self, interruptible: bool) {
        self.inner.lock().interrupt_status.push(interruptible);
    }

    pub(crate) fn pop_interrupt_status(&self) {
        let mut inner = self.inner.lock();
        if inner.interrupt_status.len() > 1 {
            inner.interrupt_status.pop();
        }
    }

    /// Records an interrupt by `by`.
    ///
    /// Returns true if the fiber is interruptible and the interrupt must take
    /// effect now; otherwise the id is kept until interruption is unmasked.
    pub(crate) fn record_interrupt(&self, by: FiberId) -> bool {
        let mut inner = self.inner.lock();
        if inner.interrupt_status.last().copied().unwrap_or(true) {
            true
        } else {
            inner.interrupted_by.insert(by);
            false
        }
    }

    /// Drains the deferred interrupts if the fiber is now interruptible.
    pub(crate) fn take_pending_if_interruptible(&self) -> Option<Vec<FiberId>> {
        let mut inner = self.inner.lock();
        let interruptible = inner.interrupt_status.last().copied().unwrap_or(true);
        if !interruptible || inner.interrupted_by.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut inner.interrupted_by).into_iter().collect())
    }

    pub(crate) fn pending_interrupts(&self) -> usize {
        self.inner.lock().interrupted_by.len()
    }

    /// Returns the semaphore bounding the fiber's forks.
    pub(crate) fn semaphore(&self) -> Semaphore {
        let inner = self.inner.lock();
        inner
            .concurrency
            .last()
            .cloned()
            .unwrap_or_else(Semaphore::unbounded)
    }

    pub(crate) fn push_concurrency(&self, semaphore: Semaphore) {
        self.inner.lock().concurrency.push(semaphore);
    }

    pub(crate) fn pop_concurrency(&self) {
        let mut inner = self.inner.lock();
        if inner.concurrency.len() > 1 {
            inner.concurrency.pop();
        }
    }

    pub(crate) fn env(&self) -> Env {
        self.inner.lock().env.last().cloned().unwrap_or_default()
    }

    pub(crate) fn push_env(&self, env: Env) {
        self.inner.lock().env.push(env);
    }

    pub(crate) fn pop_env(&self) {
        let mut inner = self.inner.lock();
        if inner.env.len() > 1 {
            inner.env.pop();
        }
    }

    pub(crate) fn push_trace(&self, frame: TraceFrame) {
        self.inner.lock().trace.push(frame);
    }

    pub(crate) fn pop_trace(&self) {
        let mut inner = self.inner.lock();
        if inner.trace.len() > inner.trace_base {
            inner.trace.pop();
        }
    }

    /// Returns the newest `max` frames.
    pub(crate) fn trace(&self, max: usize) -> Trace {
        Trace::from_frames(self.frames(max), max)
    }

    /// Returns the newest `max` frames, oldest first.
    pub(crate) fn frames(&self, max: usize) -> Vec<TraceFrame> {
        let inner = self.inner.lock();
        let skip = inner.trace.len().saturating_sub(max);
        inner.trace[skip..].to_vec()
    }

    /// Drops everything pushed above the creation-time bottom of each stack.
    ///
    /// Used when the fiber abandons its continuation to exit; deferred
    /// interrupts are kept.
    pub(crate) fn unwind_to_base(&self) {
        let mut inner = self.inner.lock();
        inner.concurrency.truncate(1);
        inner.interrupt_status.truncate(1);
        inner.env.truncate(1);
        let base = inner.trace_base;
        inner.trace.truncate(base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber_ref::FiberRefs;
    use crate::runtime::context::Platform;
    use crate::time::Scheduler;

    fn state() -> FiberState {
        let platform = Platform::new(Scheduler::virtual_time());
        let context = FiberContext::root(FiberId::new_for_test(1), platform, FiberRefs::new(), 2);
        FiberState::new(&context, Env::new(), vec![TraceFrame::label("root")])
    }

    #[test]
    fn tick_yields_once_per_threshold() {
        let state = state();
        let yields = (0..10).filter(|_| state.tick(3)).count();
        // Steps 1-3 run, the 4th yields, and so on.
        assert_eq!(yields, 2);
        state.reset_ops();
        assert_eq!(state.op_count(), 0);
    }

    #[test]
    fn masked_interrupts_are_deferred_until_unmasked() {
        let state = state();
        let by = FiberId::new_for_test(9);
        assert!(state.record_interrupt(by));

        state.push_interrupt_status(false);
        assert!(!state.record_interrupt(by));
        assert_eq!(state.pending_interrupts(), 1);
        assert!(state.take_pending_if_interruptible().is_none());

        state.pop_interrupt_status();
        assert_eq!(state.take_pending_if_interruptible(), Some(vec![by]));
        assert_eq!(state.pending_interrupts(), 0);
    }

    #[test]
    fn bottom_of_each_stack_survives_pops() {
        let state = state();
        state.pop_interrupt_status();
        state.pop_concurrency();
        state.pop_env();
        state.pop_trace();
        assert!(state.interruptible());
        assert_eq!(state.semaphore().max_permits(), 2);
        assert_eq!(state.frames(10), vec![TraceFrame::label("root")]);
    }

    #[test]
    fn trace_keeps_newest_frames() {
        let state = state();
        state.push_trace(TraceFrame::label("a"));
        state.push_trace(TraceFrame::label("b"));
        let trace = state.trace(2);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.last(), Some(&TraceFrame::label("b")));

        state.unwind_to_base();
        assert_eq!(state.frames(10).len(), 1);
    }
}
