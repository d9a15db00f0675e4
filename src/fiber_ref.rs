//! Fiber-local state propagated along fork and join.
//!
//! Every fiber owns a [`FiberRefs`] map. Forking gives the child a copy (each
//! ref's fork function decides what the child starts with) and joining a child
//! merges back the refs the child actually wrote, using each ref's join
//! function. The default policy copies the value on fork and lets the child's
//! value win on join.
//!
//! # Example
//!
//! ```
//! use fiberfx::fiber_ref::FiberRef;
//! use fiberfx::fx::Fx;
//! use fiberfx::runtime::Runtime;
//!
//! let requests = FiberRef::make(0_u32);
//! let program = requests
//!     .update(|n| n + 1)
//!     .then(requests.get());
//! let runtime = Runtime::new();
//! assert_eq!(runtime.run(program).ok(), Some(1));
//! ```

use crate::fx::Fx;
use crate::types::value::erase;
use crate::types::{Data, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_REF_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one [`FiberRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberRefId(u64);

impl FiberRefId {
    fn next() -> Self {
        Self(NEXT_REF_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type ForkFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
type JoinFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

#[derive(Clone)]
struct Policy {
    fork: ForkFn,
    join: JoinFn,
}

#[derive(Clone)]
struct Entry {
    value: Value,
    /// Written by this fiber since it was forked.
    touched: bool,
    policy: Policy,
}

/// The fiber-local values of one fiber.
///
/// Cloning shares the map; use [`fork`](Self::fork) for an independent copy.
#[derive(Clone, Default)]
pub struct FiberRefs {
    entries: Arc<Mutex<HashMap<FiberRefId, Entry>>>,
}

impl FiberRefs {
    /// Creates an empty map; every ref reads its initial value.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an independent copy for a child fiber.
    ///
    /// Each value passes through its ref's fork function and starts
    /// untouched.
    #[must_use]
    pub fn fork(&self) -> Self {
        let entries = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| {
                let value = (entry.policy.fork)(&entry.value);
                (
                    *id,
                    Entry {
                        value,
                        touched: false,
                        policy: entry.policy.clone(),
                    },
                )
            })
            .collect();
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Merges the refs `child` wrote into this map.
    ///
    /// Refs the child never wrote keep their current value here.
    pub fn join(&self, child: &Self) {
        if Arc::ptr_eq(&self.entries, &child.entries) {
            return;
        }
        let written: Vec<(FiberRefId, Entry)> = child
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.touched)
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        if written.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        for (id, theirs) in written {
            match entries.get_mut(&id) {
                Some(ours) => {
                    ours.value = (ours.policy.join)(&ours.value, &theirs.value);
                    ours.touched = true;
                }
                None => {
                    entries.insert(id, theirs);
                }
            }
        }
    }

    /// Returns the number of refs with a value in this map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no ref has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn read(&self, id: FiberRefId) -> Option<Value> {
        self.entries.lock().get(&id).map(|entry| Arc::clone(&entry.value))
    }

    fn write(&self, id: FiberRefId, value: Value, policy: &Policy) {
        self.entries.lock().insert(
            id,
            Entry {
                value,
                touched: true,
                policy: policy.clone(),
            },
        );
    }
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRefs")
            .field("len", &self.len())
            .finish()
    }
}

/// A typed fiber-local variable.
#[derive(Clone)]
pub struct FiberRef<A> {
    id: FiberRefId,
    initial: A,
    policy: Policy,
}

impl<A: Data> FiberRef<A> {
    /// Creates a ref that copies on fork and lets the child win on join.
    #[must_use]
    pub fn make(initial: A) -> Self {
        Self::with_policy(initial, A::clone, |_, child: &A| child.clone())
    }

    /// Creates a ref with custom fork and join functions.
    ///
    /// `join` receives the parent's value and the child's value.
    #[must_use]
    pub fn with_policy<F, J>(initial: A, fork: F, join: J) -> Self
    where
        F: Fn(&A) -> A + Send + Sync + 'static,
        J: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        let policy = Policy {
            fork: Arc::new(move |value| match value.downcast_ref::<A>() {
                Some(a) => erase(fork(a)),
                None => Arc::clone(value),
            }),
            join: Arc::new(move |ours, theirs| {
                match (ours.downcast_ref::<A>(), theirs.downcast_ref::<A>()) {
                    (Some(ours), Some(theirs)) => erase(join(ours, theirs)),
                    _ => Arc::clone(theirs),
                }
            }),
        };
        Self {
            id: FiberRefId::next(),
            initial,
            policy,
        }
    }

    /// Returns this ref's identity.
    #[must_use]
    pub fn id(&self) -> FiberRefId {
        self.id
    }

    /// Reads the value from `refs`, falling back to the initial value.
    #[must_use]
    pub fn get_in(&self, refs: &FiberRefs) -> A {
        refs.read(self.id)
            .and_then(|value| value.downcast_ref::<A>().cloned())
            .unwrap_or_else(|| self.initial.clone())
    }

    /// Writes the value into `refs`.
    pub fn set_in(&self, refs: &FiberRefs, value: A) {
        refs.write(self.id, erase(value), &self.policy);
    }

    /// Reads the current fiber's value.
    #[must_use]
    pub fn get(&self) -> Fx<A, Infallible> {
        let this = self.clone();
        Fx::get_fiber_context().map(move |cx| this.get_in(cx.fiber_refs()))
    }

    /// Replaces the current fiber's value.
    #[must_use]
    pub fn set(&self, value: A) -> Fx<(), Infallible> {
        let this = self.clone();
        Fx::get_fiber_context().map(move |cx| this.set_in(cx.fiber_refs(), value.clone()))
    }

    /// Applies `f` to the current fiber's value.
    #[must_use]
    pub fn update<F>(&self, f: F) -> Fx<(), Infallible>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        let this = self.clone();
        Fx::get_fiber_context().map(move |cx| {
            let refs = cx.fiber_refs();
            this.set_in(refs, f(this.get_in(refs)));
        })
    }

    /// Runs `fx` with the ref set to `value`, restoring the previous value
    /// afterwards on every exit path.
    #[must_use]
    pub fn locally<B: Data, E: Data>(&self, value: A, fx: Fx<B, E>) -> Fx<B, E> {
        let this = self.clone();
        self.get().widen().flat_map(move |previous| {
            let restore = this.clone();
            this.set(value.clone())
                .widen()
                .then(fx.clone())
                .ensuring(move |_| restore.set(previous.clone()))
        })
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRef").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_ref_reads_initial() {
        let refs = FiberRefs::new();
        let r = FiberRef::make(String::from("init"));
        assert_eq!(r.get_in(&refs), "init");
        assert!(refs.is_empty());
    }

    #[test]
    fn fork_is_independent() {
        let parent = FiberRefs::new();
        let r = FiberRef::make(1_u32);
        r.set_in(&parent, 2);

        let child = parent.fork();
        r.set_in(&child, 3);
        assert_eq!(r.get_in(&parent), 2);
        assert_eq!(r.get_in(&child), 3);
    }

    #[test]
    fn join_child_wins_for_touched_refs_only() {
        let parent = FiberRefs::new();
        let written = FiberRef::make(0_u32);
        let untouched = FiberRef::make(0_u32);
        written.set_in(&parent, 1);
        untouched.set_in(&parent, 1);

        let child = parent.fork();
        written.set_in(&child, 7);
        untouched.set_in(&parent, 5);

        parent.join(&child);
        assert_eq!(written.get_in(&parent), 7);
        assert_eq!(untouched.get_in(&parent), 5);
    }

    #[test]
    fn custom_policy_merges() {
        let parent = FiberRefs::new();
        let total = FiberRef::with_policy(0_u64, |_| 0, |ours, theirs| ours + theirs);
        total.set_in(&parent, 10);

        let a = parent.fork();
        let b = parent.fork();
        total.set_in(&a, 1);
        total.set_in(&b, 2);
        parent.join(&a);
        parent.join(&b);
        assert_eq!(total.get_in(&parent), 13);
    }

    #[test]
    fn join_adopts_refs_created_in_child() {
        let parent = FiberRefs::new();
        let child = parent.fork();
        let r = FiberRef::make('a');
        r.set_in(&child, 'z');
        parent.join(&child);
        assert_eq!(r.get_in(&parent), 'z');
    }
}
