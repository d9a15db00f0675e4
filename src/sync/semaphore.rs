//! Counting semaphore with FIFO hand-off.
//!
//! A semaphore bounds how many fibers may run a guarded program at once.
//! Acquiring either takes a free permit or queues the fiber behind earlier
//! waiters. Releasing hands the permit directly to the oldest waiter instead
//! of returning it to the pool, so a newcomer can never overtake a waiter.
//!
//! # Cancel Safety
//!
//! Every acquisition is identified by a ticket and paired with a scope
//! finalizer that relinquishes the ticket:
//! - Interrupted while queued: the ticket leaves the queue
//! - Interrupted after the hand-off but before resuming: the permit is
//!   released again
//! - Completed: the permit is released exactly once
//!
//! # Example
//!
//! ```
//! use fiberfx::fx::Fx;
//! use fiberfx::sync::Semaphore;
//!
//! let semaphore = Semaphore::new(2);
//! let guarded: Fx<u32, ()> = semaphore.with_permit(Fx::succeed(7));
//! # let _ = guarded;
//! ```

use super::Future;
use crate::fx::instruction::Node;
use crate::fx::Fx;
use crate::types::value::erase;
use crate::types::{AnyExit, Data};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// Error returned when no permit is immediately available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no semaphore permits available")]
pub struct TryAcquireError;

struct Waiter {
    ticket: u64,
    grant: Future<Arc<Node>>,
}

struct SemaphoreState {
    /// Number of available permits.
    permits: usize,
    /// Queue of waiters, oldest first.
    waiters: VecDeque<Waiter>,
    /// Tickets currently holding a permit.
    holders: HashSet<u64>,
    next_ticket: u64,
}

impl SemaphoreState {
    /// Gives a freed permit to the oldest waiter, or back to the pool.
    fn hand_off(&mut self) -> Option<Future<Arc<Node>>> {
        if let Some(waiter) = self.waiters.pop_front() {
            self.holders.insert(waiter.ticket);
            Some(waiter.grant)
        } else {
            self.permits += 1;
            None
        }
    }
}

struct SemaphoreInner {
    state: Mutex<SemaphoreState>,
    max_permits: usize,
}

/// A counting semaphore for limiting concurrent execution.
///
/// Cloning shares the permits.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

impl Semaphore {
    /// Creates a new semaphore with the given number of permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(SemaphoreInner {
                state: Mutex::new(SemaphoreState {
                    permits,
                    waiters: VecDeque::new(),
                    holders: HashSet::new(),
                    next_ticket: 0,
                }),
                max_permits: permits,
            }),
        }
    }

    /// Creates a semaphore that never makes anyone wait.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Returns the number of currently available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.inner.state.lock().permits
    }

    /// Returns the maximum number of permits (initial count).
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.inner.max_permits
    }

    /// Returns the number of queued acquirers.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    fn ticket(&self) -> u64 {
        let mut state = self.inner.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        ticket
    }

    /// Takes a permit for `ticket`, suspending behind earlier waiters.
    fn acquire_node(&self, ticket: u64) -> Arc<Node> {
        let semaphore = self.clone();
        Node::defer(move || {
            let mut state = semaphore.inner.state.lock();
            if state.holders.contains(&ticket) {
                return Node::unit();
            }
            if state.waiters.is_empty() && state.permits > 0 {
                state.permits -= 1;
                state.holders.insert(ticket);
                return Node::unit();
            }
            let grant = Future::new();
            state.waiters.push_back(Waiter {
                ticket,
                grant: grant.clone(),
            });
            tracing::trace!(ticket, waiters = state.waiters.len(), "semaphore wait");
            Arc::new(Node::Wait(grant.awaitable(|node| node)))
        })
    }

    /// Gives up whatever `ticket` holds: its queue slot or its permit.
    ///
    /// Idempotent: a ticket that holds nothing is ignored.
    fn relinquish(&self, ticket: u64) {
        let grant = {
            let mut state = self.inner.state.lock();
            if let Some(pos) = state.waiters.iter().position(|w| w.ticket == ticket) {
                state.waiters.remove(pos);
                None
            } else if state.holders.remove(&ticket) {
                state.hand_off()
            } else {
                None
            }
        };
        if let Some(grant) = grant {
            grant.resolve(Node::unit());
        }
    }

    /// Runs `node` holding a permit, released through a scope finalizer on
    /// every exit path.
    pub(crate) fn with_permit_node(&self, node: Arc<Node>) -> Arc<Node> {
        let semaphore = self.clone();
        Node::defer(move || {
            let ticket = semaphore.ticket();
            let releaser = semaphore.clone();
            Arc::new(Node::Ensuring(
                semaphore.acquire_node(ticket).then(Arc::clone(&node)),
                Arc::new(move |_: AnyExit| {
                    releaser.relinquish(ticket);
                    Node::unit()
                }),
            ))
        })
    }

    /// Runs `fx` while holding one permit.
    #[must_use]
    pub fn with_permit<A: Data, E: Data>(&self, fx: Fx<A, E>) -> Fx<A, E> {
        Fx::from_node(self.with_permit_node(fx.into_node()))
    }

    /// Acquires a permit, suspending until one is handed over.
    ///
    /// The caller must [`release`](Permit::release) it. Interruption while
    /// waiting gives the queue slot up.
    #[must_use]
    pub fn acquire(&self) -> Fx<Permit, Infallible> {
        let semaphore = self.clone();
        Fx::from_node(Node::defer(move || {
            let ticket = semaphore.ticket();
            let releaser = semaphore.clone();
            let permit = Permit {
                semaphore: semaphore.clone(),
                ticket,
            };
            Arc::new(Node::Ensuring(
                semaphore.acquire_node(ticket),
                Arc::new(move |exit: AnyExit| {
                    if exit.is_failure() {
                        releaser.relinquish(ticket);
                    }
                    Node::unit()
                }),
            ))
            .then(Node::succeed(erase(permit)))
        }))
    }

    /// Tries to acquire a permit without waiting.
    ///
    /// Fails while anyone is queued, even if a permit is free.
    pub fn try_acquire(&self) -> Result<Permit, TryAcquireError> {
        let mut state = self.inner.state.lock();
        if !state.waiters.is_empty() || state.permits == 0 {
            return Err(TryAcquireError);
        }
        state.permits -= 1;
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.holders.insert(ticket);
        Ok(Permit {
            semaphore: self.clone(),
            ticket,
        })
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Semaphore")
            .field("permits", &state.permits)
            .field("max_permits", &self.inner.max_permits)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// A held permit.
///
/// Releasing is idempotent: only the first [`release`](Self::release) of a
/// permit (or of any of its clones) returns it.
#[derive(Clone)]
pub struct Permit {
    semaphore: Semaphore,
    ticket: u64,
}

impl Permit {
    /// Returns the permit to the semaphore.
    pub fn release(&self) {
        self.semaphore.relinquish(self.ticket);
    }

    /// Returns true while the permit has not been released.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.semaphore
            .inner
            .state
            .lock()
            .holders
            .contains(&self.ticket)
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("ticket", &self.ticket)
            .field("held", &self.is_held())
            .finish()
    }
}
