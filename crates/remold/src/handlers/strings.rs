//! `$str_*` constructs.
//!
//! String constructs take either a bare string payload (the whole-string
//! forms like `$str_upper`) or an object payload naming the pieces
//! (`{"string": …, "delimiter": …}`). Every field is resolved through the
//! value pipeline before use, and the split/join/replace results are capped
//! by the engine limits — checked before the result is materialised.

use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::Engine,
    error::{Error, LimitError},
    signal::Flow,
    value::{render, type_name},
};

use super::constructs::ConstructKind;

pub(crate) fn execute(
    engine: &Engine,
    kind: ConstructKind,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<Value> {
    use ConstructKind as K;
    match kind {
        K::StrSplit => split(engine, marker, payload, ctx),
        K::StrJoin => join(engine, marker, payload, ctx),
        K::StrSlice => slice(engine, marker, payload, ctx),
        K::StrUpper => whole_string(engine, marker, payload, ctx).map(|s| Value::String(s.to_uppercase())),
        K::StrLower => whole_string(engine, marker, payload, ctx).map(|s| Value::String(s.to_lowercase())),
        K::StrStrip => strip(engine, marker, payload, ctx, Trim::Both),
        K::StrLstrip => strip(engine, marker, payload, ctx, Trim::Start),
        K::StrRstrip => strip(engine, marker, payload, ctx, Trim::End),
        K::StrReplace => replace(engine, marker, payload, ctx),
        K::StrContains => {
            let spec = object_payload(marker, payload)?;
            let string = field_string(engine, marker, spec, "string", ctx)?;
            let sub = required_field_string(engine, marker, spec, "substring", ctx)?;
            Ok(Value::Bool(string.contains(&sub)))
        }
        K::StrStartswith => {
            let spec = object_payload(marker, payload)?;
            let string = field_string(engine, marker, spec, "string", ctx)?;
            let prefix = required_field_string(engine, marker, spec, "prefix", ctx)?;
            Ok(Value::Bool(string.starts_with(&prefix)))
        }
        K::StrEndswith => {
            let spec = object_payload(marker, payload)?;
            let string = field_string(engine, marker, spec, "string", ctx)?;
            let suffix = required_field_string(engine, marker, spec, "suffix", ctx)?;
            Ok(Value::Bool(string.ends_with(&suffix)))
        }
        _ => Err(Error::shape(format!("{marker} is not a string construct")).into()),
    }
}

/// `$str_split` — split by delimiter, at most `maxsplit` splits, with the
/// piece count capped.
fn split(engine: &Engine, marker: &str, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let spec = object_payload(marker, payload)?;
    let string = field_string(engine, marker, spec, "string", ctx)?;
    let delimiter = match spec.get("delimiter") {
        Some(d) => super::constructs::string_operand(engine, marker, d, ctx)?,
        None => " ".to_owned(),
    };
    if delimiter.is_empty() {
        return Err(Error::shape(format!("{marker} delimiter must not be empty")).into());
    }

    let max_results = engine.limits().str_max_split_results;
    let maxsplit = match spec.get("maxsplit") {
        Some(raw) => {
            let resolved = engine.process_value(raw, ctx)?;
            resolved.as_i64().unwrap_or(-1)
        }
        None => -1,
    };
    let maxsplit = if maxsplit < 0 || maxsplit as usize > max_results {
        max_results
    } else {
        maxsplit as usize
    };

    let pieces: Vec<Value> = string
        .splitn(maxsplit + 1, delimiter.as_str())
        .map(|piece| Value::String(piece.to_owned()))
        .collect();
    if pieces.len() > max_results {
        return Err(LimitError::SplitResults {
            limit: max_results,
            len: pieces.len(),
        }
        .into());
    }
    Ok(Value::Array(pieces))
}

/// `$str_join` — join array elements with a separator; every element
/// renders to its string form first. The total length is checked before
/// the join happens.
fn join(engine: &Engine, marker: &str, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let spec = object_payload(marker, payload)?;
    let array = match spec.get("array") {
        Some(raw) => engine.process_value(raw, ctx)?,
        None => Value::Array(Vec::new()),
    };
    let items = match array {
        Value::Array(items) => items,
        other => {
            return Err(Error::shape(format!(
                "{marker} 'array' must be an array, got {}",
                type_name(&other)
            ))
            .into());
        }
    };
    let separator = match spec.get("separator") {
        Some(raw) => super::constructs::string_operand(engine, marker, raw, ctx)?,
        None => String::new(),
    };

    if items.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let rendered: Vec<String> = items.iter().map(render).collect();
    let total: usize = rendered.iter().map(String::len).sum::<usize>()
        + separator.len() * (rendered.len() - 1);
    let cap = engine.limits().str_max_join_result;
    if total > cap {
        return Err(LimitError::StringLength { limit: cap, len: total }.into());
    }
    Ok(Value::String(rendered.join(&separator)))
}

/// `$str_slice` — substring by half-open character slice with negative
/// indices.
fn slice(engine: &Engine, marker: &str, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let spec = object_payload(marker, payload)?;
    let string = field_string(engine, marker, spec, "string", ctx)?;
    let start = slice_bound(engine, marker, spec, "start", ctx)?;
    let end = slice_bound(engine, marker, spec, "end", ctx)?;

    let chars: Vec<char> = string.chars().collect();
    let len = chars.len();
    let clamp = |b: i64| -> usize {
        if b < 0 {
            len.saturating_sub(b.unsigned_abs() as usize)
        } else {
            (b as usize).min(len)
        }
    };
    let s = start.map_or(0, clamp);
    let e = end.map_or(len, clamp).max(s);
    Ok(Value::String(chars[s..e].iter().collect()))
}

enum Trim {
    Both,
    Start,
    End,
}

/// `$str_strip` family — whitespace by default, or an explicit character
/// set via the object form's `chars` field.
fn strip(
    engine: &Engine,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
    side: Trim,
) -> Flow<Value> {
    let (string, chars) = match payload {
        Value::Object(spec) => {
            let string = field_string(engine, marker, spec, "string", ctx)?;
            let chars = match spec.get("chars") {
                None | Some(Value::Null) => None,
                Some(raw) => Some(super::constructs::string_operand(engine, marker, raw, ctx)?),
            };
            (string, chars)
        }
        other => (super::constructs::string_operand(engine, marker, other, ctx)?, None),
    };

    let stripped = match chars {
        None => match side {
            Trim::Both => string.trim().to_owned(),
            Trim::Start => string.trim_start().to_owned(),
            Trim::End => string.trim_end().to_owned(),
        },
        Some(set) => {
            let matches_set = |c: char| set.contains(c);
            match side {
                Trim::Both => string.trim_matches(matches_set).to_owned(),
                Trim::Start => string.trim_start_matches(matches_set).to_owned(),
                Trim::End => string.trim_end_matches(matches_set).to_owned(),
            }
        }
    };
    Ok(Value::String(stripped))
}

/// `$str_replace` — literal substring replacement, optionally limited to
/// `count` occurrences, with the projected result length checked up front.
fn replace(engine: &Engine, marker: &str, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let spec = object_payload(marker, payload)?;
    let string = field_string(engine, marker, spec, "string", ctx)?;
    let old = required_field_string(engine, marker, spec, "old", ctx)?;
    let new = required_field_string(engine, marker, spec, "new", ctx)?;
    let count = match spec.get("count") {
        Some(raw) => engine.process_value(raw, ctx)?.as_i64().unwrap_or(-1),
        None => -1,
    };

    if old.is_empty() {
        return Ok(Value::String(string));
    }
    let mut occurrences = string.matches(old.as_str()).count();
    if count >= 0 {
        occurrences = occurrences.min(count as usize);
    }
    let projected = string.len() - occurrences * old.len() + occurrences * new.len();
    let cap = engine.limits().str_max_replace_result;
    if projected > cap {
        return Err(LimitError::StringLength { limit: cap, len: projected }.into());
    }

    let replaced = if count < 0 {
        string.replace(old.as_str(), &new)
    } else {
        string.replacen(old.as_str(), &new, count as usize)
    };
    Ok(Value::String(replaced))
}

fn slice_bound(
    engine: &Engine,
    marker: &str,
    spec: &crate::value::Map,
    key: &str,
    ctx: &mut ExecutionContext,
) -> Flow<Option<i64>> {
    match spec.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => {
            let resolved = engine.process_value(raw, ctx)?;
            match resolved.as_i64() {
                Some(i) => Ok(Some(i)),
                None => Err(Error::shape(format!("{marker} '{key}' must be an integer")).into()),
            }
        }
    }
}

// -- payload helpers --------------------------------------------------------

fn object_payload<'a>(marker: &str, payload: &'a Value) -> Flow<&'a crate::value::Map> {
    payload.as_object().ok_or_else(|| {
        Error::shape(format!("{marker} requires an object payload, got {}", type_name(payload))).into()
    })
}

/// The whole-string form: the payload itself is the string.
fn whole_string(
    engine: &Engine,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<String> {
    super::constructs::string_operand(engine, marker, payload, ctx)
}

/// Optional `string` field, defaulting to the empty string.
fn field_string(
    engine: &Engine,
    marker: &str,
    spec: &crate::value::Map,
    key: &str,
    ctx: &mut ExecutionContext,
) -> Flow<String> {
    match spec.get(key) {
        Some(raw) => {
            let resolved = engine.process_value(raw, ctx)?;
            match resolved {
                Value::String(s) => Ok(s),
                other => Err(Error::shape(format!(
                    "{marker} '{key}' must be a string, got {}",
                    type_name(&other)
                ))
                .into()),
            }
        }
        None => Ok(String::new()),
    }
}

fn required_field_string(
    engine: &Engine,
    marker: &str,
    spec: &crate::value::Map,
    key: &str,
    ctx: &mut ExecutionContext,
) -> Flow<String> {
    let raw = spec
        .get(key)
        .ok_or_else(|| Error::shape(format!("{marker} requires a '{key}' field")))?;
    super::constructs::string_operand(engine, marker, raw, ctx)
}
