//! The failure algebra.
//!
//! A [`Cause`] records everything that went wrong in a fiber:
//!
//! - `Fail(E)`: an expected, typed failure raised by the program
//! - `Die(Defect)`: an unexpected panic or programming error
//! - `Interrupt(FiberId)`: cooperative cancellation requested by a fiber
//! - `Then(a, b)`: `a` happened, then `b` happened while cleaning up
//! - `Both(a, b)`: `a` and `b` happened in parallel branches
//! - `Traced(c, trace)`: `c` annotated with the frames that produced it
//!
//! `Then` and `Both` are associative: only the left-to-right order of leaves
//! is significant, not the nesting.

use crate::trace::Trace;
use crate::types::FiberId;
use core::fmt;
use std::any::Any;
use std::collections::BTreeSet;

/// Payload of a `Die` cause.
///
/// Wraps a caught panic (or an internal invariant violation) so it can travel
/// across fiber boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Converts a payload caught by `catch_unwind` into a defect.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with a non-string payload".to_string());
        Self { message }
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)
    }
}

/// Why a fiber failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// Expected, typed failure.
    Fail(E),
    /// Unexpected defect.
    Die(Defect),
    /// Interrupted by the given fiber.
    Interrupt(FiberId),
    /// Sequential composition.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Parallel composition.
    Both(Box<Cause<E>>, Box<Cause<E>>),
    /// A cause annotated with a trace.
    Traced(Box<Cause<E>>, Trace),
}

/// A leaf of a cause, borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseLeaf<'a, E> {
    /// A typed failure.
    Fail(&'a E),
    /// A defect.
    Die(&'a Defect),
    /// An interruption.
    Interrupt(FiberId),
}

impl<E> Cause<E> {
    /// Creates a typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// Creates a defect from a message.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// Creates an interruption attributed to `id`.
    #[must_use]
    pub const fn interrupt(id: FiberId) -> Self {
        Self::Interrupt(id)
    }

    /// Combines parallel interruptions by every id in `ids` (in order).
    ///
    /// Returns `None` if `ids` is empty.
    pub fn interrupts<I>(ids: I) -> Option<Self>
    where
        I: IntoIterator<Item = FiberId>,
    {
        ids.into_iter()
            .map(Self::Interrupt)
            .reduce(|acc, next| acc.both(next))
    }

    /// Sequential composition: `self` happened, then `next`.
    #[must_use]
    pub fn then(self, next: Self) -> Self {
        Self::Then(Box::new(self), Box::new(next))
    }

    /// Parallel composition.
    #[must_use]
    pub fn both(self, other: Self) -> Self {
        Self::Both(Box::new(self), Box::new(other))
    }

    /// Sequentially appends every cause in `rest`.
    #[must_use]
    pub fn then_all<I>(self, rest: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        rest.into_iter().fold(self, Self::then)
    }

    /// Annotates the cause with `trace`.
    ///
    /// An empty trace, or a cause that is already traced at the top, is left
    /// unchanged so a failure keeps the trace of the point where it was raised.
    #[must_use]
    pub fn traced(self, trace: Trace) -> Self {
        if trace.is_empty() || matches!(self, Self::Traced(..)) {
            self
        } else {
            Self::Traced(Box::new(self), trace)
        }
    }

    /// Returns the leaves in left-to-right order.
    #[must_use]
    pub fn leaves(&self) -> Vec<CauseLeaf<'_, E>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<CauseLeaf<'a, E>>) {
        match self {
            Self::Fail(e) => out.push(CauseLeaf::Fail(e)),
            Self::Die(d) => out.push(CauseLeaf::Die(d)),
            Self::Interrupt(id) => out.push(CauseLeaf::Interrupt(*id)),
            Self::Then(a, b) | Self::Both(a, b) => {
                a.collect_leaves(out);
                b.collect_leaves(out);
            }
            Self::Traced(c, _) => c.collect_leaves(out),
        }
    }

    /// Returns every typed failure, in order.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                CauseLeaf::Fail(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Returns every defect, in order.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                CauseLeaf::Die(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Returns the ids of every fiber that interrupted.
    #[must_use]
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                CauseLeaf::Interrupt(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Returns the first typed failure, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&E> {
        self.failures().into_iter().next()
    }

    /// Returns true if the cause consists solely of interruptions.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        self.leaves()
            .iter()
            .all(|leaf| matches!(leaf, CauseLeaf::Interrupt(_)))
    }

    /// Returns true if the cause contains at least one defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        !self.defects().is_empty()
    }

    /// Returns every trace attached to the cause, outermost first.
    #[must_use]
    pub fn traces(&self) -> Vec<&Trace> {
        let mut out = Vec::new();
        self.collect_traces(&mut out);
        out
    }

    fn collect_traces<'a>(&'a self, out: &mut Vec<&'a Trace>) {
        match self {
            Self::Fail(_) | Self::Die(_) | Self::Interrupt(_) => {}
            Self::Then(a, b) | Self::Both(a, b) => {
                a.collect_traces(out);
                b.collect_traces(out);
            }
            Self::Traced(c, trace) => {
                out.push(trace);
                c.collect_traces(out);
            }
        }
    }

    /// Removes every trace annotation.
    #[must_use]
    pub fn strip_traces(self) -> Self {
        match self {
            Self::Then(a, b) => a.strip_traces().then(b.strip_traces()),
            Self::Both(a, b) => a.strip_traces().both(b.strip_traces()),
            Self::Traced(c, _) => c.strip_traces(),
            leaf => leaf,
        }
    }

    /// Maps the typed failures.
    pub fn map<F, G>(self, mut f: G) -> Cause<F>
    where
        G: FnMut(E) -> F,
    {
        self.map_with(&mut f)
    }

    fn map_with<F, G>(self, f: &mut G) -> Cause<F>
    where
        G: FnMut(E) -> F,
    {
        match self {
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(a, b) => a.map_with(f).then(b.map_with(f)),
            Self::Both(a, b) => a.map_with(f).both(b.map_with(f)),
            Self::Traced(c, t) => Cause::Traced(Box::new(c.map_with(f)), t),
        }
    }

    /// Maps the typed failures, turning a mapping error into a defect.
    pub fn try_map<F, G>(self, mut f: G) -> Cause<F>
    where
        G: FnMut(E) -> Result<F, Defect>,
    {
        self.try_map_with(&mut f)
    }

    fn try_map_with<F, G>(self, f: &mut G) -> Cause<F>
    where
        G: FnMut(E) -> Result<F, Defect>,
    {
        match self {
            Self::Fail(e) => match f(e) {
                Ok(mapped) => Cause::Fail(mapped),
                Err(defect) => Cause::Die(defect),
            },
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(a, b) => a.try_map_with(f).then(b.try_map_with(f)),
            Self::Both(a, b) => a.try_map_with(f).both(b.try_map_with(f)),
            Self::Traced(c, t) => Cause::Traced(Box::new(c.try_map_with(f)), t),
        }
    }
}

impl<E: fmt::Display> Cause<E> {
    /// Renders the cause with its traces, one leaf per line.
    #[must_use]
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        match self {
            Self::Fail(e) => out.push_str(&format!("{pad}Fail: {e}\n")),
            Self::Die(d) => out.push_str(&format!("{pad}Die: {}\n", d.message())),
            Self::Interrupt(id) => out.push_str(&format!("{pad}Interrupted by {id}\n")),
            Self::Then(a, b) => {
                out.push_str(&format!("{pad}Then\n"));
                a.render(out, depth + 1);
                b.render(out, depth + 1);
            }
            Self::Both(a, b) => {
                out.push_str(&format!("{pad}Both\n"));
                a.render(out, depth + 1);
                b.render(out, depth + 1);
            }
            Self::Traced(c, trace) => {
                c.render(out, depth);
                for frame in trace.iter().rev() {
                    out.push_str(&format!("{pad}    at {frame}\n"));
                }
            }
        }
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail(e) => write!(f, "{e}"),
            Self::Die(d) => write!(f, "{d}"),
            Self::Interrupt(id) => write!(f, "interrupted by {id}"),
            Self::Then(a, b) => write!(f, "({a} then {b})"),
            Self::Both(a, b) => write!(f, "({a} and {b})"),
            Self::Traced(c, _) => write!(f, "{c}"),
        }
    }
}
