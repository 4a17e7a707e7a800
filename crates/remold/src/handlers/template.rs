//! Template substitution — everything that touches `${…}` syntax.
//!
//! Escape rules: `$${` is literal and survives substitution, `$$` is
//! literal, and an unmatched `${` is emitted as a literal `$` with scanning
//! resuming at the `{`. The matching `$${` → `${` / `$$` → `$` unescape runs
//! *after* the value-pipeline stabilisation loop (see [`unescape`]), so a
//! substituted literal is never re-expanded.
//!
//! Expression dispatch inside `${…}`, in order:
//!
//! 1. **Caster** — `int:rest` (any key in the caster map): resolve `rest`
//!    recursively, then apply the cast.
//! 2. **JMESPath** — `? expr`: template-expand `expr` itself, then evaluate
//!    against `{source, dest, metadata, args, temp}`.
//! 3. **Nested template** — the expression itself contains an unescaped
//!    placeholder: expand recursively.
//! 4. **JSON Pointer** — anything else, prefix-aware. A pointer that fails
//!    to resolve yields the literal expression string, which lets plain
//!    strings pass through unexpanded.
//!
//! A string that is exactly one `${…}` returns the native resolved value;
//! any surrounding text forces string rendering and concatenation.

use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::Engine,
    jmes,
    signal::Flow,
    value::{Map, render},
};

/// Returns true when `s` contains at least one `${…}` opener that is not
/// escaped by a preceding `$`.
#[must_use]
pub(crate) fn has_unescaped_placeholder(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while let Some(at) = s[i..].find("${") {
        let j = i + at;
        if j > 0 && bytes[j - 1] == b'$' {
            i = j + 2;
            continue;
        }
        return true;
    }
    false
}

/// Expands one template string.
pub(crate) fn execute(engine: &Engine, text: &str, ctx: &mut ExecutionContext) -> Flow<Value> {
    if let Some(expr) = single_expression(text) {
        return resolve_expr(engine, expr, ctx);
    }
    flat_substitute(engine, text, ctx).map(Value::String)
}

/// When the whole string is exactly one `${…}`, returns the inner
/// expression.
fn single_expression(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?;
    if !s.ends_with('}') {
        return None;
    }
    // find the close matching the leading opener; it must be the last char
    let mut depth = 0usize;
    let bytes = s.as_bytes();
    for (i, &b) in bytes.iter().enumerate().skip(2) {
        if b == b'{' && bytes[i - 1] == b'$' {
            depth += 1;
        } else if b == b'}' {
            if depth == 0 {
                return (i == s.len() - 1).then_some(&inner[..inner.len() - 1]);
            }
            depth -= 1;
        }
    }
    None
}

/// Single left-to-right pass with brace-depth tracking. Always returns a
/// string; type coercion is the caller's job.
fn flat_substitute(engine: &Engine, tmpl: &str, ctx: &mut ExecutionContext) -> Flow<String> {
    let mut out = String::with_capacity(tmpl.len());
    let bytes = tmpl.as_bytes();
    let mut i = 0;

    while i < tmpl.len() {
        if tmpl[i..].starts_with("$${") {
            out.push_str("$${"); // escaped — survives substitution
            i += 3;
            continue;
        }
        if tmpl[i..].starts_with("$$") {
            out.push_str("$$");
            i += 2;
            continue;
        }
        if tmpl[i..].starts_with("${") {
            let mut depth = 0usize;
            let mut j = i + 2;
            let mut closed = false;
            while j < tmpl.len() {
                let b = bytes[j];
                if b == b'{' && bytes[j - 1] == b'$' {
                    depth += 1;
                } else if b == b'}' {
                    if depth == 0 {
                        let expr = &tmpl[i + 2..j];
                        let val = resolve_expr(engine, expr, ctx)?;
                        out.push_str(&render(&val));
                        i = j + 1;
                        closed = true;
                        break;
                    }
                    depth -= 1;
                }
                j += 1;
            }
            if !closed {
                // unclosed brace: emit `$` as literal, retry from `{`
                out.push('$');
                i += 1;
            }
            continue;
        }
        let ch = tmpl[i..].chars().next().expect("index is on a char boundary");
        out.push(ch);
        i += ch.len_utf8();
    }

    Ok(out)
}

/// Dispatches a single extracted expression.
fn resolve_expr(engine: &Engine, expr: &str, ctx: &mut ExecutionContext) -> Flow<Value> {
    let expr = expr.trim();

    // 1) casters
    for (name, caster) in engine.casters() {
        if let Some(inner) = expr.strip_prefix(name.as_str()).and_then(|r| r.strip_prefix(':')) {
            let value = resolve_expr(engine, inner, ctx)?;
            return Ok(caster.apply(value)?);
        }
    }

    // 2) JMESPath
    if let Some(query) = expr.strip_prefix('?') {
        let expanded = flat_substitute(engine, query.trim_start(), ctx)?;
        let document = jmes_document(ctx);
        return Ok(jmes::search(engine.jmes_runtime(), &expanded, &document)?);
    }

    // 3) nested template
    if has_unescaped_placeholder(expr) {
        return flat_substitute(engine, expr, ctx).map(Value::String);
    }

    // 4) JSON pointer, prefix-aware; unresolved pointers fall back to the
    //    literal expression string
    let pointer = if matches!(expr.get(..2), Some("@:" | "&:" | "!:" | "_:")) {
        expr.to_owned()
    } else {
        format!("/{}", expr.trim_start_matches('/'))
    };
    match engine.processor().get(engine.resolver(), &pointer, ctx) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(expr.to_owned())),
    }
}

/// The document `${? …}` expressions evaluate against: explicit namespaces
/// so source and destination fields cannot collide.
fn jmes_document(ctx: &ExecutionContext) -> Value {
    let mut doc = Map::new();
    doc.insert("source".to_owned(), ctx.source.clone());
    doc.insert("dest".to_owned(), ctx.dest.clone());
    doc.insert("metadata".to_owned(), ctx.metadata.clone());
    doc.insert("args".to_owned(), ctx.temp_read_only.clone());
    doc.insert("temp".to_owned(), ctx.temp.clone());
    Value::Object(doc)
}

/// Recursively strips the template escape layer: `$${` → `${` and `$$` →
/// `$`. Walks arrays and objects (keys included); other values pass through
/// unchanged. Registered as the engine's sole builtin unescape rule.
#[must_use]
pub fn unescape(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace("$${", "${").replace("$$", "$")),
        Value::Array(items) => Value::Array(items.into_iter().map(unescape).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.replace("$${", "${").replace("$$", "$"), unescape(v)))
                .collect(),
        ),
        other => other,
    }
}
