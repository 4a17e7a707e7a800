//! Loop and function control flow: `$break`, `$continue`, `$return`.
//!
//! Each handler raises the matching interrupt; the innermost enclosing
//! `foreach`/`while` (or the function body, for `$return`) consumes it.
//! `try/except` never catches these, and `finally` still runs before they
//! propagate. One that escapes the whole program surfaces as a stray-signal
//! error at the `apply` boundary.

use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::Engine,
    signal::{Flow, Interrupt},
};

/// `$break` — exit the innermost loop. The payload is ignored; only the
/// key's presence matters. Changes made to the destination before the break
/// are preserved.
pub(crate) fn break_() -> Flow<()> {
    Err(Interrupt::Break)
}

/// `$continue` — skip to the next iteration of the innermost loop.
pub(crate) fn continue_() -> Flow<()> {
    Err(Interrupt::Continue)
}

/// `$return` — exit the current function with the resolved payload as its
/// value. Supersedes the definition's `return` path projection.
pub(crate) fn return_(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<()> {
    let value = engine.process_value(payload, ctx)?;
    Err(Interrupt::Return(value))
}
