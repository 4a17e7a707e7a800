//! Prefix-aware pointer processing.
//!
//! The resolver knows how to walk a tree; this layer knows *which* tree a
//! prefixed pointer refers to. Handlers pass the DSL author's pointer
//! through unchanged — the namespace lookup is centralised here so handlers
//! never branch on prefixes, and the namespace set stays extensible.
//!
//! Prefix table:
//!
//! | Prefix | Namespace | Writable? |
//! |--------|-----------|-----------|
//! | (none) or `_:` | source | no |
//! | `@:` | destination | yes |
//! | `&:` | `temp_read_only` (args, loop vars, error info) | no |
//! | `!:` | `temp` (scratch) | yes |
//!
//! Writes ignore every prefix except `!:`: writing through a source-like
//! prefix lands in the destination after the prefix is stripped, which keeps
//! the source-immutability invariant without a separate error class.

use serde_json::Value;

use crate::{context::ExecutionContext, error::PointerError, pointer::PointerResolver};

/// The namespace a prefixed pointer resolves into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// The read-only input document.
    Source,
    /// The document being built.
    Dest,
    /// `temp_read_only`: function args, loop variables, error info.
    Args,
    /// `temp`: mutable scratch.
    Temp,
}

/// Splits a pointer into its namespace and a normalised bare path.
///
/// `"@:/user/name"` → `(Dest, "/user/name")`; `"&:x"` → `(Args, "/x")`;
/// `"/data"` → `(Source, "/data")`. Root spellings survive: `"@:"` → `(Dest,
/// "/")`.
#[must_use]
pub fn split_prefix(pointer: &str) -> (Namespace, String) {
    let (namespace, rest) = match pointer.split_at_checked(2) {
        Some(("@:", rest)) => (Namespace::Dest, rest),
        Some(("&:", rest)) => (Namespace::Args, rest),
        Some(("!:", rest)) => (Namespace::Temp, rest),
        Some(("_:", rest)) => (Namespace::Source, rest),
        _ => return (Namespace::Source, pointer.to_owned()),
    };
    let trimmed = rest.trim_start_matches('/');
    if trimmed.is_empty() {
        (namespace, "/".to_owned())
    } else {
        (namespace, format!("/{trimmed}"))
    }
}

/// Returns true when a string looks like a prefixed or bare pointer — the
/// test shorthand expansion uses to tell a copy source from a literal.
#[must_use]
pub fn is_pointer_like(text: &str) -> bool {
    text.starts_with('/')
        || text.starts_with("@:/")
        || text.starts_with("&:/")
        || text.starts_with("!:/")
        || text.starts_with("_:/")
}

/// Prefix-aware reads and writes against an [`ExecutionContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PointerProcessor;

impl PointerProcessor {
    /// Creates a processor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Reads the value at a prefixed pointer.
    pub fn get(
        &self,
        resolver: &PointerResolver,
        pointer: &str,
        ctx: &ExecutionContext,
    ) -> Result<Value, PointerError> {
        let (namespace, path) = split_prefix(pointer);
        let root = match namespace {
            Namespace::Source => &ctx.source,
            Namespace::Dest => &ctx.dest,
            Namespace::Args => &ctx.temp_read_only,
            Namespace::Temp => &ctx.temp,
        };
        resolver.get(&path, root)
    }

    /// Checks whether a prefixed pointer resolves.
    #[must_use]
    pub fn exists(&self, resolver: &PointerResolver, pointer: &str, ctx: &ExecutionContext) -> bool {
        self.get(resolver, pointer, ctx).is_ok()
    }

    /// Writes `value` at a prefixed pointer. `!:` targets scratch; every
    /// other prefix (or none) targets the destination.
    pub fn set(
        &self,
        resolver: &PointerResolver,
        pointer: &str,
        ctx: &mut ExecutionContext,
        value: Value,
    ) -> Result<(), PointerError> {
        let (root, path) = Self::write_root(pointer, ctx);
        resolver.set(&path, root, value)
    }

    /// Deletes the value at a prefixed pointer, with the same write-target
    /// rule as [`Self::set`].
    pub fn delete(
        &self,
        resolver: &PointerResolver,
        pointer: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<(), PointerError> {
        let (root, path) = Self::write_root(pointer, ctx);
        resolver.delete(&path, root)
    }

    /// The mutable root a write through `pointer` lands in, plus the
    /// stripped path.
    pub(crate) fn write_root<'a>(
        pointer: &str,
        ctx: &'a mut ExecutionContext,
    ) -> (&'a mut Value, String) {
        let (namespace, path) = split_prefix(pointer);
        let root = match namespace {
            Namespace::Temp => &mut ctx.temp,
            // all non-scratch writes land in dest; the source stays immutable
            _ => &mut ctx.dest,
        };
        (root, path)
    }
}

/// Prepends the destination prefix when `pointer` carries no namespace,
/// leaving already-prefixed pointers alone. Used by operations whose default
/// read namespace is the destination (`copyD`, `assertD`, loop conditions).
#[must_use]
pub fn with_dest_default(pointer: &str) -> String {
    if matches!(pointer.get(..2), Some("@:" | "&:" | "!:" | "_:")) {
        pointer.to_owned()
    } else {
        format!("@:{pointer}")
    }
}
