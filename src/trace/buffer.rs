//! Bounded trace of execution frames.
//!
//! A [`Trace`] keeps the most recent frames only. When a push would exceed the
//! bound, the oldest frame is dropped, so memory per fiber stays bounded by
//! the platform's `max_trace_count`.

use crate::types::FiberId;
use core::fmt;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::panic::Location;

/// One frame of execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceFrame {
    /// A user-supplied label.
    Label(Cow<'static, str>),
    /// A source location captured with `#[track_caller]`.
    Location(&'static Location<'static>),
    /// The point at which the current fiber was forked from the given parent.
    Fork(FiberId),
}

impl TraceFrame {
    /// Creates a label frame.
    #[must_use]
    pub fn label(label: impl Into<Cow<'static, str>>) -> Self {
        Self::Label(label.into())
    }

    /// Creates a frame for the caller's source location.
    #[must_use]
    #[track_caller]
    pub fn here() -> Self {
        Self::Location(Location::caller())
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{label}"),
            Self::Location(loc) => write!(f, "{}:{}:{}", loc.file(), loc.line(), loc.column()),
            Self::Fork(parent) => write!(f, "forked from {parent}"),
        }
    }
}

/// An ordered, bounded sequence of frames (oldest first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    frames: VecDeque<TraceFrame>,
}

impl Trace {
    /// Creates an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a trace from frames (oldest first), keeping only the newest `max`.
    #[must_use]
    pub fn from_frames<I>(frames: I, max: usize) -> Self
    where
        I: IntoIterator<Item = TraceFrame>,
    {
        let mut trace = Self::new();
        for frame in frames {
            trace.push_bounded(frame, max);
        }
        trace
    }

    /// Appends a frame, dropping the oldest frames beyond `max`.
    pub fn push_bounded(&mut self, frame: TraceFrame, max: usize) {
        if max == 0 {
            return;
        }
        self.frames.push_back(frame);
        while self.frames.len() > max {
            self.frames.pop_front();
        }
    }

    /// Returns the number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the trace has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterates frames oldest to newest.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, TraceFrame> {
        self.frames.iter()
    }

    /// Returns the most recent frame.
    #[must_use]
    pub fn last(&self) -> Option<&TraceFrame> {
        self.frames.back()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in self.frames.iter().rev() {
            writeln!(f, "    at {frame}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_order() {
        let mut trace = Trace::new();
        trace.push_bounded(TraceFrame::label("a"), 4);
        trace.push_bounded(TraceFrame::label("b"), 4);

        let labels: Vec<_> = trace.iter().map(ToString::to_string).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn overflow_drops_oldest() {
        let trace = Trace::from_frames((1..=5).map(|i| TraceFrame::label(format!("f{i}"))), 3);

        let labels: Vec<_> = trace.iter().map(ToString::to_string).collect();
        assert_eq!(labels, vec!["f3", "f4", "f5"]);
        assert_eq!(trace.last(), Some(&TraceFrame::label("f5")));
    }

    #[test]
    fn zero_bound_keeps_nothing() {
        let trace = Trace::from_frames([TraceFrame::label("x")], 0);
        assert!(trace.is_empty());
    }

    #[test]
    fn here_captures_this_file() {
        let TraceFrame::Location(loc) = TraceFrame::here() else {
            panic!("expected a location frame");
        };
        assert!(loc.file().ends_with("buffer.rs"));
    }
}
