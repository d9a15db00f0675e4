//! Timer-queue scheduler.
//!
//! Every fiber resumption is a task in this queue: cooperative yields are
//! zero-delay timers, sleeps are timers with a delay. The scheduler does not
//! own a thread. It is driven explicitly by [`Scheduler::run_ready`],
//! [`Scheduler::advance`], [`Scheduler::run_until_idle`] and
//! [`Scheduler::drive_until`], so the same queue serves production wall-clock
//! time and deterministic virtual time.
//!
//! Tasks never run while the queue lock is held, so a task may schedule
//! further tasks freely.

use super::clock::{TimeSource, VirtualClock, WallClock};
use crate::types::Time;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// A scheduled callback. Receives the scheduler time at which it ran.
pub type Task = Box<dyn FnOnce(Time) + Send>;

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    /// Insertion order; breaks deadline ties FIFO.
    id: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Heap of deadlines plus the tasks still live.
///
/// Cancelling removes the task only; its heap entry is skipped lazily.
#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    tasks: HashMap<u64, Task>,
    next_id: u64,
}

impl TimerQueue {
    fn insert(&mut self, deadline: Time, task: Task) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(TimerEntry { deadline, id });
        self.tasks.insert(id, task);
        id
    }

    fn peek_deadline(&mut self) -> Option<Time> {
        while let Some(entry) = self.heap.peek() {
            if self.tasks.contains_key(&entry.id) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    fn pop_due(&mut self, now: Time) -> Option<Task> {
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            let entry = self.heap.pop()?;
            if let Some(task) = self.tasks.remove(&entry.id) {
                return Some(task);
            }
        }
        None
    }
}

struct Shared {
    clock: Arc<dyn TimeSource>,
    queue: Mutex<TimerQueue>,
    wakeup: Condvar,
    executed: AtomicU64,
}

/// A forkable timer queue over a [`TimeSource`].
///
/// Cloning shares the queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                queue: Mutex::new(TimerQueue::default()),
                wakeup: Condvar::new(),
                executed: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a scheduler over wall-clock time.
    #[must_use]
    pub fn wall() -> Self {
        Self::new(Arc::new(WallClock::new()))
    }

    /// Creates a scheduler over virtual time starting at zero.
    #[must_use]
    pub fn virtual_time() -> Self {
        Self::new(Arc::new(VirtualClock::new()))
    }

    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.shared.clock.now()
    }

    /// Returns true if this scheduler runs on virtual time.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.shared.clock.is_virtual()
    }

    /// Schedules `task` to run once `delay` has elapsed.
    pub fn set_timer<F>(&self, task: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce(Time) + Send + 'static,
    {
        let deadline = self.now().saturating_add(delay);
        let id = self.shared.queue.lock().insert(deadline, Box::new(task));
        self.shared.wakeup.notify_all();
        TimerHandle {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Creates an independent scheduler with its own queue.
    ///
    /// A virtual clock is forked at the current time, so the child's time can
    /// be advanced without moving the parent's.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self::new(self.shared.clock.fork())
    }

    /// Returns the number of live (not yet run, not cancelled) tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Returns the total number of tasks run so far.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.shared.executed.load(AtomicOrdering::Relaxed)
    }

    /// Returns the earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.shared.queue.lock().peek_deadline()
    }

    /// Runs every task whose deadline has passed, including tasks scheduled
    /// as zero-delay timers by the tasks it runs.
    ///
    /// Returns the number of tasks run.
    pub fn run_ready(&self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.now();
            let task = self.shared.queue.lock().pop_due(now);
            let Some(task) = task else {
                break;
            };
            task(now);
            self.shared.executed.fetch_add(1, AtomicOrdering::Relaxed);
            ran += 1;
        }
        ran
    }

    /// Moves time forward by `by`, running timers in deadline order as their
    /// deadlines are reached.
    ///
    /// Under a wall clock this blocks until the time has actually passed.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().saturating_add(by);
        let mut ran = self.run_ready();
        while let Some(deadline) = self.next_deadline().filter(|d| *d <= target) {
            self.park(Some(deadline));
            ran += self.run_ready();
        }
        self.park(Some(target));
        ran + self.run_ready()
    }

    /// Runs tasks, jumping (or waiting) to each next deadline, until the queue
    /// is empty.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            ran += self.run_ready();
            match self.next_deadline() {
                Some(deadline) => self.park(Some(deadline)),
                None => break,
            }
        }
        ran
    }

    /// Runs tasks until `done` returns true.
    ///
    /// Returns false if `done` never became true and no further progress is
    /// possible: the queue is empty and time is virtual. Under a wall clock
    /// an empty queue blocks until another thread schedules a task.
    pub fn drive_until<F>(&self, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        loop {
            self.run_ready();
            if done() {
                return true;
            }
            let next = self.next_deadline();
            if next.is_none() && self.is_virtual() {
                return false;
            }
            self.park(next);
        }
    }

    /// Waits until `deadline` (or forever when `None`), returning early when
    /// a task becomes due.
    fn park(&self, deadline: Option<Time>) {
        if let Some(deadline) = deadline {
            if self.shared.clock.advance_to(deadline) {
                return;
            }
        } else if self.is_virtual() {
            return;
        }

        let mut queue = self.shared.queue.lock();
        let now = self.now();
        if queue.peek_deadline().is_some_and(|d| d <= now) {
            return;
        }
        let wake_at = match (deadline, queue.peek_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match wake_at {
            Some(at) if at > now => {
                self.shared.wakeup.wait_for(&mut queue, at - now);
            }
            Some(_) => {}
            None => self.shared.wakeup.wait(&mut queue),
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("clock", &self.shared.clock)
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Cancellation capability for a scheduled task.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    shared: Weak<Shared>,
}

impl TimerHandle {
    /// Cancels the task. Returns true if it had not run yet.
    pub fn cancel(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.queue.lock().tasks.remove(&self.id).is_some())
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}
