//! Scopes: finalizer registries with one-shot close.
//!
//! A [`Scope`] is `Open` until the first close request, which moves it to
//! `Closing` and freezes its finalizer list. Exactly one party then claims and
//! runs the finalizers; every other closer and every waiter observes the same
//! final exit once the scope publishes `Closed`.
//!
//! Each fiber owns a scope. Interrupting a fiber closes its scope, and the
//! fiber's run loop notices the close and stops interpreting its program.
//! Forked scopes are closed (with an interrupt attributed to the parent's
//! owner) when their parent closes; a child closing first removes itself
//! from the parent.

pub mod finalizer;

pub use finalizer::{FinalizationStrategy, FinalizerHandle};

use crate::fx::instruction::{Finalizer, Node};
use crate::fx::Fx;
use crate::sync::Future;
use crate::types::value::erase;
use crate::types::{AnyExit, Exit, FiberId};
use finalizer::run_finalizers;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Invoked synchronously when a scope leaves `Open`.
pub(crate) type CloseHook = Box<dyn FnOnce(&AnyExit) + Send>;

enum ScopeState {
    Open {
        finalizers: BTreeMap<u64, Finalizer>,
        hooks: Vec<CloseHook>,
        next_key: u64,
    },
    Closing {
        exit: AnyExit,
        /// `None` once a closer has claimed the finalizers.
        pending: Option<Vec<Finalizer>>,
    },
    Closed(AnyExit),
}

pub(crate) struct ScopeInner {
    id: u64,
    owner: FiberId,
    strategy: FinalizationStrategy,
    state: Mutex<ScopeState>,
    closed: Future<AnyExit>,
    parent: Mutex<Option<FinalizerHandle>>,
}

impl ScopeInner {
    pub(crate) fn take_finalizer(&self, key: u64) -> Option<Finalizer> {
        match &mut *self.state.lock() {
            ScopeState::Open { finalizers, .. } => finalizers.remove(&key),
            ScopeState::Closing { .. } | ScopeState::Closed(_) => None,
        }
    }
}

/// A finalizer registry tied to a fiber's resource lifetime.
///
/// Cloning shares the scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates a detached, open scope owned by `owner`.
    #[must_use]
    pub fn new(owner: FiberId, strategy: FinalizationStrategy) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                owner,
                strategy,
                state: Mutex::new(ScopeState::Open {
                    finalizers: BTreeMap::new(),
                    hooks: Vec::new(),
                    next_key: 0,
                }),
                closed: Future::new(),
                parent: Mutex::new(None),
            }),
        }
    }

    /// Returns the fiber this scope belongs to.
    #[must_use]
    pub fn owner(&self) -> FiberId {
        self.inner.owner
    }

    /// Returns the strategy used to run finalizers.
    #[must_use]
    pub fn strategy(&self) -> FinalizationStrategy {
        self.inner.strategy
    }

    /// Returns true until the first close request.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(&*self.inner.state.lock(), ScopeState::Open { .. })
    }

    /// Returns true once every finalizer has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.inner.state.lock(), ScopeState::Closed(_))
    }

    /// Returns the published exit of a closed scope.
    #[must_use]
    pub fn exit(&self) -> Option<AnyExit> {
        match &*self.inner.state.lock() {
            ScopeState::Closed(exit) => Some(exit.clone()),
            ScopeState::Open { .. } | ScopeState::Closing { .. } => None,
        }
    }

    /// Returns the number of registered finalizers.
    #[must_use]
    pub fn finalizer_count(&self) -> usize {
        match &*self.inner.state.lock() {
            ScopeState::Open { finalizers, .. } => finalizers.len(),
            ScopeState::Closing { .. } | ScopeState::Closed(_) => 0,
        }
    }

    /// Registers a finalizer.
    ///
    /// Returns `None` if the scope is no longer open.
    pub fn ensuring<F>(&self, finalizer: F) -> Option<FinalizerHandle>
    where
        F: Fn(AnyExit) -> Fx<(), Infallible> + Send + Sync + 'static,
    {
        self.add_finalizer(Arc::new(move |exit| finalizer(exit).into_node()))
    }

    pub(crate) fn add_finalizer(&self, finalizer: Finalizer) -> Option<FinalizerHandle> {
        let mut state = self.inner.state.lock();
        let ScopeState::Open {
            finalizers,
            next_key,
            ..
        } = &mut *state
        else {
            return None;
        };
        let key = *next_key;
        *next_key += 1;
        finalizers.insert(key, finalizer);
        Some(FinalizerHandle {
            scope: Arc::downgrade(&self.inner),
            key,
        })
    }

    /// Registers a hook run synchronously when the scope leaves `Open`.
    ///
    /// If the scope is already closing the hook runs immediately.
    pub(crate) fn on_close(&self, hook: CloseHook) {
        let exit = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                ScopeState::Open { hooks, .. } => {
                    hooks.push(hook);
                    return;
                }
                ScopeState::Closing { exit, .. } | ScopeState::Closed(exit) => exit.clone(),
            }
        };
        hook(&exit);
    }

    /// Moves the scope out of `Open`. Returns false if it was not open.
    ///
    /// Finalizers are not run here; they are claimed by the next
    /// [`close`](Self::close), [`close_or_wait`](Self::close_or_wait) or by
    /// the owning fiber when it exits.
    pub(crate) fn request_close(&self, exit: AnyExit) -> bool {
        let hooks = {
            let mut state = self.inner.state.lock();
            let ScopeState::Open {
                finalizers, hooks, ..
            } = &mut *state
            else {
                return false;
            };
            let finalizers: Vec<Finalizer> = std::mem::take(finalizers).into_values().collect();
            let hooks = std::mem::take(hooks);
            *state = ScopeState::Closing {
                exit: exit.clone(),
                pending: Some(finalizers),
            };
            hooks
        };
        if let Some(parent) = self.inner.parent.lock().take() {
            parent.cancel();
        }
        tracing::debug!(
            scope = self.inner.id,
            owner = %self.inner.owner,
            interrupted = exit.is_interrupted(),
            "scope closing"
        );
        for hook in hooks {
            hook(&exit);
        }
        true
    }

    fn claim(&self) -> Option<(AnyExit, Vec<Finalizer>)> {
        match &mut *self.inner.state.lock() {
            ScopeState::Closing { exit, pending } => {
                pending.take().map(|finalizers| (exit.clone(), finalizers))
            }
            ScopeState::Open { .. } | ScopeState::Closed(_) => None,
        }
    }

    fn publish(&self, exit: AnyExit) {
        *self.inner.state.lock() = ScopeState::Closed(exit.clone());
        tracing::trace!(scope = self.inner.id, owner = %self.inner.owner, "scope closed");
        self.inner.closed.resolve(exit);
    }

    /// Runs the finalizers if nobody has claimed them yet, then publishes.
    fn finish_node(&self) -> Arc<Node> {
        let scope = self.clone();
        Node::defer(move || match scope.claim() {
            None => Node::unit(),
            Some((exit, finalizers)) => {
                let scope = scope.clone();
                run_finalizers(exit, finalizers, scope.strategy()).flat_map(move |final_exit| {
                    scope.publish(finalizer::into_exit(final_exit));
                    Node::unit()
                })
            }
        })
        .uninterruptible()
    }

    pub(crate) fn wait_node(&self) -> Arc<Node> {
        Arc::new(Node::Wait(
            self.inner
                .closed
                .awaitable(|exit| Node::succeed(erase::<AnyExit>(exit))),
        ))
    }

    fn close_node(&self, exit: AnyExit) -> Arc<Node> {
        let scope = self.clone();
        Node::defer(move || {
            let first = scope.request_close(exit.clone());
            scope
                .finish_node()
                .flat_map(move |_| Node::succeed(erase(first)))
        })
    }

    pub(crate) fn close_or_wait_node(&self, exit: AnyExit) -> Arc<Node> {
        self.close_node(exit).then(self.wait_node())
    }

    /// Finishes a close requested elsewhere and yields the final exit.
    pub(crate) fn await_close_node(&self) -> Arc<Node> {
        self.finish_node().then(self.wait_node())
    }

    /// Closes the scope with `exit`.
    ///
    /// Only the first caller transitions the scope; it yields true. Whoever
    /// claims the finalizers runs them uninterruptibly with the scope's
    /// strategy before `Closed` is published.
    #[must_use]
    pub fn close(&self, exit: AnyExit) -> Fx<bool, Infallible> {
        Fx::from_node(self.close_node(exit))
    }

    /// Waits for the scope to be closed and yields its final exit.
    #[must_use]
    pub fn wait(&self) -> Fx<AnyExit, Infallible> {
        Fx::from_node(self.wait_node())
    }

    /// Closes the scope (or joins a close in progress) and yields the final
    /// exit, which is the first close request's exit followed by any
    /// finalizer failures.
    #[must_use]
    pub fn close_or_wait(&self, exit: AnyExit) -> Fx<AnyExit, Infallible> {
        Fx::from_node(self.close_or_wait_node(exit))
    }

    /// Creates a child scope owned by `owner`.
    ///
    /// The child is closed with an interrupt attributed to this scope's owner
    /// when this scope closes. Forking a scope that is no longer open yields
    /// a detached child.
    #[must_use]
    pub fn fork(&self, owner: FiberId) -> Self {
        let child = Self::new(owner, self.inner.strategy);
        let closing = child.clone();
        let parent_owner = self.inner.owner;
        let handle = self.add_finalizer(Arc::new(move |_: AnyExit| {
            closing
                .close_or_wait_node(Exit::interrupt(parent_owner))
                .then(Node::unit())
        }));
        *child.inner.parent.lock() = handle;
        child
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            ScopeState::Open { finalizers, .. } => format!("Open({})", finalizers.len()),
            ScopeState::Closing { .. } => "Closing".to_string(),
            ScopeState::Closed(_) => "Closed".to_string(),
        };
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("state", &state)
            .finish()
    }
}
