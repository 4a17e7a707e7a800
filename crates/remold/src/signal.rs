//! Control-flow signals, distinct from errors.
//!
//! `$break`, `$continue`, `$return`, and `$raw` are encoded as variants of a
//! typed interrupt that propagates through handler returns; the pipeline and
//! the loop/function handlers pattern-match it at every frame. `try/except`
//! never converts a signal into caught-error state, and a signal is
//! single-use: once the innermost loop or function consumes it, it is gone.

use serde_json::Value;
use strum::Display;

use crate::error::Error;

/// Identifies which signal escaped, for stray-signal reporting at the public
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SignalKind {
    /// `$break`
    #[strum(serialize = "$break")]
    Break,
    /// `$continue`
    #[strum(serialize = "$continue")]
    Continue,
    /// `$return`
    #[strum(serialize = "$return")]
    Return,
    /// `$raw` (a raw-value signal escaping the value pipeline)
    #[strum(serialize = "$raw")]
    Raw,
}

impl SignalKind {
    /// The scope a signal is valid inside, for out-of-context messages.
    #[must_use]
    pub fn scope(&self) -> &'static str {
        match self {
            Self::Break | Self::Continue => "a loop",
            Self::Return => "a function",
            Self::Raw => "a value context",
        }
    }
}

/// Non-local exit carried through handler results.
///
/// The first four variants are control flow, not failures; only `Error` is
/// catchable by `try/except` and `on_failure`.
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// Exit the innermost `foreach`/`while` loop.
    Break,
    /// Skip to the next iteration of the innermost loop.
    Continue,
    /// Exit the current function with a value.
    Return(Value),
    /// Stop value-pipeline stabilisation, yielding the value as-is.
    Raw(Value),
    /// A plain error, propagating toward the nearest `try` (or the caller).
    Error(Box<Error>),
}

/// Result alias threaded through every handler.
pub(crate) type Flow<T> = Result<T, Interrupt>;

impl Interrupt {
    /// The signal kind, for boundary reporting. `None` for errors.
    pub(crate) fn signal_kind(&self) -> Option<SignalKind> {
        match self {
            Self::Break => Some(SignalKind::Break),
            Self::Continue => Some(SignalKind::Continue),
            Self::Return(_) => Some(SignalKind::Return),
            Self::Raw(_) => Some(SignalKind::Raw),
            Self::Error(_) => None,
        }
    }

    /// Converts an interrupt escaping the public `apply` boundary into an
    /// error: plain errors pass through, signals become stray-signal errors
    /// carrying their payload.
    pub(crate) fn into_boundary_error(self) -> Error {
        match self {
            Self::Error(err) => *err,
            Self::Return(value) => Error::stray(SignalKind::Return, Some(value)),
            Self::Raw(value) => Error::stray(SignalKind::Raw, Some(value)),
            Self::Break => Error::stray(SignalKind::Break, None),
            Self::Continue => Error::stray(SignalKind::Continue, None),
        }
    }
}

impl From<Error> for Interrupt {
    fn from(err: Error) -> Self {
        Self::Error(Box::new(err))
    }
}

impl From<crate::error::ErrorKind> for Interrupt {
    fn from(kind: crate::error::ErrorKind) -> Self {
        Self::Error(Box::new(Error::new(kind)))
    }
}

impl From<crate::error::PointerError> for Interrupt {
    fn from(err: crate::error::PointerError) -> Self {
        Self::Error(Box::new(err.into()))
    }
}

impl From<crate::error::LimitError> for Interrupt {
    fn from(err: crate::error::LimitError) -> Self {
        Self::Error(Box::new(err.into()))
    }
}
