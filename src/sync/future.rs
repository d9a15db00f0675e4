//! Single-resolution synchronization cell.
//!
//! A [`Future`] starts `Pending` and transitions exactly once, either to
//! `Resolved(value)` or to `Interrupted(id)`. Every observer registered while
//! pending is invoked exactly once when the transition happens; an observer
//! registered afterwards is invoked synchronously with the settled value.
//!
//! Observers run after the internal lock has been released, so an observer
//! may freely touch the future again. A panicking observer is logged and does
//! not keep the remaining observers from running.
//!
//! Fibers suspend on a `Future<Fx<A, E>>` with [`Fx::wait`](crate::fx::Fx::wait):
//! the resolved program runs in the waiting fiber.

use crate::fx::instruction::{Awaitable, Node};
use crate::types::{Cause, FiberId};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// The settled value of a [`Future`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T> {
    /// The future was resolved with a value.
    Resolved(T),
    /// The future was interrupted by the given fiber.
    Interrupted(FiberId),
}

type Observer<T> = Box<dyn FnOnce(Settled<T>) + Send>;

/// Identifies an observer registered on a pending [`Future`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverKey(u64);

enum FutureState<T> {
    Pending {
        observers: Vec<(ObserverKey, Observer<T>)>,
        next_key: u64,
    },
    Settled(Settled<T>),
}

impl<T> FutureState<T> {
    const fn pending() -> Self {
        Self::Pending {
            observers: Vec::new(),
            next_key: 0,
        }
    }
}

fn notify<T>(observer: Observer<T>, settled: Settled<T>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(settled))) {
        let defect = crate::types::Defect::from_panic(&*payload);
        tracing::error!(%defect, "future observer panicked");
    }
}

/// A cell that settles exactly once.
///
/// Cloning shares the cell.
pub struct Future<T> {
    state: Arc<Mutex<FutureState<T>>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Creates a pending future.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FutureState::pending())),
        }
    }

    /// Creates a future that is already resolved.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(FutureState::Settled(Settled::Resolved(value)))),
        }
    }

    /// Resolves the future. Returns false if it had already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Settled::Resolved(value))
    }

    /// Interrupts the future on behalf of `id`. Returns false if it had
    /// already settled.
    pub fn interrupt(&self, id: FiberId) -> bool {
        self.settle(Settled::Interrupted(id))
    }

    fn settle(&self, settled: Settled<T>) -> bool {
        let observers = {
            let mut state = self.state.lock();
            match &mut *state {
                FutureState::Settled(_) => return false,
                FutureState::Pending { observers, .. } => {
                    let observers = std::mem::take(observers);
                    *state = FutureState::Settled(settled.clone());
                    observers
                }
            }
        };
        for (_, observer) in observers {
            notify(observer, settled.clone());
        }
        true
    }

    /// Returns the settled value, if any.
    #[must_use]
    pub fn poll(&self) -> Option<Settled<T>> {
        match &*self.state.lock() {
            FutureState::Pending { .. } => None,
            FutureState::Settled(settled) => Some(settled.clone()),
        }
    }

    /// Returns true while the future has not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.lock(), FutureState::Pending { .. })
    }

    /// Registers an observer.
    ///
    /// If the future has already settled the observer is invoked before this
    /// call returns.
    pub fn observe<F>(&self, observer: F)
    where
        F: FnOnce(Settled<T>) + Send + 'static,
    {
        let _ = self.add_observer(observer);
    }

    /// Registers an observer and returns the key that removes it again.
    ///
    /// Returns `None` if the future had already settled, in which case the
    /// observer ran before this call returned.
    pub fn add_observer<F>(&self, observer: F) -> Option<ObserverKey>
    where
        F: FnOnce(Settled<T>) + Send + 'static,
    {
        let settled = {
            let mut state = self.state.lock();
            match &mut *state {
                FutureState::Pending {
                    observers,
                    next_key,
                } => {
                    let key = ObserverKey(*next_key);
                    *next_key += 1;
                    observers.push((key, Box::new(observer)));
                    return Some(key);
                }
                FutureState::Settled(settled) => settled.clone(),
            }
        };
        notify(Box::new(observer), settled);
        None
    }

    /// Removes a pending observer. Returns false if it already ran or was
    /// removed.
    pub fn remove_observer(&self, key: ObserverKey) -> bool {
        let removed = {
            let mut state = self.state.lock();
            match &mut *state {
                FutureState::Pending { observers, .. } => observers
                    .iter()
                    .position(|(k, _)| *k == key)
                    .map(|index| observers.remove(index)),
                FutureState::Settled(_) => None,
            }
        };
        removed.is_some()
    }

    /// Returns the number of observers waiting for the future.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        match &*self.state.lock() {
            FutureState::Pending { observers, .. } => observers.len(),
            FutureState::Settled(_) => 0,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Future<T> {
    /// Views the future as something a fiber can suspend on, converting the
    /// resolved value into the program the fiber resumes with.
    pub(crate) fn awaitable(&self, resume: fn(T) -> Arc<Node>) -> Arc<dyn Awaitable> {
        Arc::new(Resumable {
            future: self.clone(),
            resume,
        })
    }
}

impl<T: Clone + Send + 'static> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            FutureState::Pending { observers, .. } => {
                format!("Pending({} observers)", observers.len())
            }
            FutureState::Settled(Settled::Resolved(_)) => "Resolved".to_string(),
            FutureState::Settled(Settled::Interrupted(id)) => format!("Interrupted({id})"),
        };
        f.debug_tuple("Future").field(&state).finish()
    }
}

struct Resumable<T> {
    future: Future<T>,
    resume: fn(T) -> Arc<Node>,
}

impl<T: Clone + Send + Sync + 'static> Awaitable for Resumable<T> {
    fn subscribe(&self, wake: Box<dyn FnOnce(Arc<Node>) + Send>) -> Option<Arc<Node>> {
        let resume = self.resume;
        let settle = move |settled: Settled<T>| match settled {
            Settled::Resolved(value) => resume(value),
            Settled::Interrupted(id) => Arc::new(Node::Fail(Cause::Interrupt(id))),
        };
        if let Some(settled) = self.future.poll() {
            return Some(settle(settled));
        }
        self.future.observe(move |settled| wake(settle(settled)));
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolves_exactly_once() {
        let future = Future::new();
        assert!(future.resolve(1));
        assert!(!future.resolve(2));
        assert!(!future.interrupt(FiberId::new_for_test(1)));
        assert_eq!(future.poll(), Some(Settled::Resolved(1)));
    }

    #[test]
    fn pending_observers_run_once_on_resolution() {
        let future = Future::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            future.observe(move |settled| {
                assert_eq!(settled, Settled::Resolved("done"));
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(future.observer_count(), 3);

        future.resolve("done");
        future.resolve("again");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(future.observer_count(), 0);
    }

    #[test]
    fn late_observer_runs_synchronously() {
        let future = Future::resolved(7);
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        future.observe(move |settled| *sink.lock() = Some(settled));
        assert_eq!(*seen.lock(), Some(Settled::Resolved(7)));
    }

    #[test]
    fn interruption_is_a_settlement() {
        let future: Future<()> = Future::new();
        let id = FiberId::new_for_test(9);
        assert!(future.interrupt(id));
        assert!(!future.is_pending());
        assert_eq!(future.poll(), Some(Settled::Interrupted(id)));
    }

    #[test]
    fn observer_may_reenter_the_future() {
        let future = Future::new();
        let inner = future.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        future.observe(move |_| {
            assert!(!inner.is_pending());
            sink.fetch_add(1, Ordering::SeqCst);
        });
        future.resolve(());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_observer_does_not_skip_later_observers() {
        crate::test_utils::init_test_logging();
        let future = Future::new();
        let calls = Arc::new(AtomicUsize::new(0));
        future.observe(|_| panic!("observer failed"));
        let sink = Arc::clone(&calls);
        future.observe(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        assert!(future.resolve(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A late observer that panics is contained too.
        future.observe(|_| panic!("late observer failed"));
        assert_eq!(future.poll(), Some(Settled::Resolved(5)));
    }

    #[test]
    fn removed_observer_never_runs() {
        let future = Future::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&calls);
        let key = future
            .add_observer(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            })
            .expect("pending future keeps the observer");

        assert!(future.remove_observer(key));
        assert!(!future.remove_observer(key));
        assert_eq!(future.observer_count(), 0);
        future.resolve(());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(future.add_observer(|_| {}).is_none());
    }
}
