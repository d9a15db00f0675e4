//! Error types surfaced by the runtime.
//!
//! Inside a program every failure is a value: a [`Cause`] carried by an
//! [`Exit`](crate::types::Exit). Only two things leave the crate as Rust
//! errors:
//!
//! - [`RunError`]: the reduced cause returned by
//!   [`Runtime::run`](crate::runtime::Runtime::run)
//! - [`ConfigError`]: a rejected runtime configuration
//!
//! # Reduction
//!
//! A cause can hold many failures. [`RunError::from_cause`] keeps the most
//! actionable one: the first typed failure, else the first defect, else the
//! first interruption.

use crate::types::{Cause, CauseLeaf, Defect, FiberId};

/// The reduced failure of a program run with
/// [`Runtime::run`](crate::runtime::Runtime::run).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError<E> {
    /// The program failed with a typed error.
    #[error("program failed: {0:?}")]
    Failed(E),
    /// The program died with a defect.
    #[error("program died: {0}")]
    Died(Defect),
    /// The program was interrupted.
    #[error("program was interrupted by {0}")]
    Interrupted(FiberId),
}

impl<E: Clone> RunError<E> {
    /// Reduces a cause to its most actionable failure.
    #[must_use]
    pub fn from_cause(cause: &Cause<E>) -> Self {
        if let Some(error) = cause.first_failure() {
            return Self::Failed(error.clone());
        }
        if let Some(defect) = cause.defects().first() {
            return Self::Died((*defect).clone());
        }
        let by = cause
            .leaves()
            .into_iter()
            .find_map(|leaf| match leaf {
                CauseLeaf::Interrupt(id) => Some(id),
                CauseLeaf::Fail(_) | CauseLeaf::Die(_) => None,
            })
            .unwrap_or(FiberId::NONE);
        Self::Interrupted(by)
    }
}

impl<E> RunError<E> {
    /// Returns the typed error, if the program failed with one.
    #[must_use]
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Died(_) | Self::Interrupted(_) => None,
        }
    }

    /// Returns true if the program was interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Returns true if the program died.
    #[must_use]
    pub fn is_died(&self) -> bool {
        matches!(self, Self::Died(_))
    }
}

/// A runtime configuration value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv {
        /// The variable name.
        var: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A config file could not be read.
    #[error("failed to read config file {path}: {reason}")]
    Io {
        /// The file path.
        path: String,
        /// The I/O error message.
        reason: String,
    },
    /// A config file could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
