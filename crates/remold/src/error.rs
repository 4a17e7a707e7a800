//! Error taxonomy and language-level call-stack annotation.
//!
//! Errors are the *catchable* failure class: `try/except` handles every
//! variant here, and none of the control-flow signals (those live in the
//! signal module). Each error carries a single-line message
//! referring to the user's pointer, operand, or limit, plus — once it has
//! escaped a traced pipeline step — a frozen copy of the language-level call
//! stack for the outermost boundary to report.

use std::{fmt, time::Duration};

use serde_json::Value;

use crate::signal::SignalKind;

/// Addressing failures from the pointer resolver and processor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PointerError {
    /// A path segment did not exist.
    #[error("{path}: missing key '{segment}'")]
    NotFound { path: String, segment: String },
    /// An array index was outside the array.
    #[error("{path}: index {index} out of range")]
    OutOfRange { path: String, index: i64 },
    /// The walk hit a value of the wrong shape (e.g. indexing a scalar).
    #[error("{path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    /// A segment that should be an index was not one.
    #[error("{path}: invalid segment '{segment}'")]
    BadSegment { path: String, segment: String },
}

/// Resource-budget violations.
///
/// Every cap from the engine's [`Limits`](crate::resource::Limits) maps to a
/// variant carrying both the configured limit and the observed value, so the
/// message can name what was exceeded and by how much.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimitError {
    /// Cumulative handler executions in one `apply` exceeded the budget.
    #[error("operation limit exceeded: {count} > {limit}")]
    Operations { limit: usize, count: usize },
    /// A `while` loop ran past `max_loop_iterations`.
    #[error("loop iteration limit exceeded: {limit}")]
    LoopIterations { limit: usize },
    /// A `foreach` input was larger than `max_foreach_items`.
    #[error("foreach input of {len} items exceeds limit of {limit}")]
    ForeachItems { limit: usize, len: usize },
    /// `$func` call depth exceeded `max_function_recursion_depth`.
    #[error("function recursion depth exceeded: {depth} > {limit}")]
    FunctionDepth { limit: usize, depth: usize },
    /// The value pipeline did not stabilise within `value_max_depth`
    /// iterations (oscillating or truly cyclic expansion).
    #[error("value resolution did not stabilise within {limit} iterations")]
    ValueDepth { limit: usize },
    /// A regex operation ran past its wall-clock or backtracking budget.
    #[error("regex operation exceeded timeout of {limit:?}")]
    RegexTimeout { limit: Duration },
    /// An arithmetic result grew past its configured cap.
    #[error("numeric result {value} exceeds limit of {limit}")]
    NumberOverflow { limit: f64, value: f64 },
    /// An arithmetic operand was larger than allowed.
    #[error("numeric operand {value} exceeds limit of {limit}")]
    OperandTooLarge { limit: f64, value: f64 },
    /// A string operation would produce a result longer than allowed.
    #[error("string result of length {len} exceeds limit of {limit}")]
    StringLength { limit: usize, len: usize },
    /// A split would produce more pieces than allowed.
    #[error("split would create {len} items, exceeding limit of {limit}")]
    SplitResults { limit: usize, len: usize },
}

/// The conceptual error kind, per the failure taxonomy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    /// User-level error raised by `$raise`.
    #[error("{0}")]
    Domain(String),
    /// `assert` failure (missing path or `equals` mismatch).
    #[error("{0}")]
    Assertion(String),
    /// Addressing failure.
    #[error(transparent)]
    Pointer(#[from] PointerError),
    /// Resource-budget violation.
    #[error(transparent)]
    Limit(#[from] LimitError),
    /// Construct or operation schema violation, including operand type
    /// errors and cast failures.
    #[error("{0}")]
    Shape(String),
    /// The pipeline resolved no handler for a step.
    #[error("unhandled step: {0}")]
    UnhandledStep(String),
    /// A control-flow signal escaped to the public boundary
    /// (`$break`/`$continue` outside a loop, `$return` outside a function).
    #[error("{signal} used outside of {}", .signal.scope())]
    StraySignal {
        signal: SignalKind,
        /// Payload of an escaping `$return`.
        value: Option<Value>,
    },
}

/// An engine error: a kind plus the language call stack captured when it
/// first escaped a traced step.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    trace: Vec<String>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, trace: Vec::new() }
    }

    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Domain(message.into()))
    }

    pub(crate) fn assertion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Assertion(message.into()))
    }

    pub(crate) fn shape(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Shape(message.into()))
    }

    pub(crate) fn unhandled_step(step_repr: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnhandledStep(step_repr.into()))
    }

    pub(crate) fn stray(signal: SignalKind, value: Option<Value>) -> Self {
        Self::new(ErrorKind::StraySignal { signal, value })
    }

    /// The error's kind.
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Stable class-style name for the kind, exposed to `except` blocks as
    /// `&:/_error_type`.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ErrorKind::Domain(_) => "DomainError",
            ErrorKind::Assertion(_) => "AssertionError",
            ErrorKind::Pointer(_) => "PointerError",
            ErrorKind::Limit(_) => "LimitError",
            ErrorKind::Shape(_) => "ShapeError",
            ErrorKind::UnhandledStep(_) => "UnhandledStepError",
            ErrorKind::StraySignal { .. } => "ControlFlowSignal",
        }
    }

    /// The payload of an escaping `$return`, when this is a stray-signal
    /// error produced at the `apply` boundary.
    #[must_use]
    pub fn signal_value(&self) -> Option<&Value> {
        match &self.kind {
            ErrorKind::StraySignal { value, .. } => value.as_ref(),
            _ => None,
        }
    }

    /// The language-level call stack at the point of failure, innermost
    /// frame last. Empty when the error never crossed a traced step.
    #[must_use]
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Attaches the language call stack; a no-op when one is already
    /// attached (annotation happens exactly once, at the innermost traced
    /// frame).
    pub(crate) fn with_trace(mut self, frames: &[String]) -> Self {
        if self.trace.is_empty() {
            self.trace = frames.to_vec();
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<PointerError> for Error {
    fn from(err: PointerError) -> Self {
        Self::new(ErrorKind::Pointer(err))
    }
}

impl From<LimitError> for Error {
    fn from(err: LimitError) -> Self {
        Self::new(ErrorKind::Limit(err))
    }
}

/// Formats a captured language call stack for log output, innermost last.
pub(crate) fn format_trace(frames: &[String]) -> String {
    if frames.is_empty() {
        return "  (empty)".to_owned();
    }
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| format!("  #{:<3} {frame}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}
