//! `$regex_*` constructs.
//!
//! Patterns run on the backtracking engine so the full wire syntax
//! (backreferences, lookarounds) keeps working, which also means a
//! catastrophic pattern genuinely blows up — the budget below exists to
//! contain that. Two bounds apply per call: a backtrack limit derived from
//! the configured timeout, and a wall-clock check after the operation. Both
//! surface as the same timeout error.
//!
//! Flags arrive as wire integers (see
//! [`regex_flags`](crate::resource::regex_flags)) and are validated against
//! the engine's whitelist before being translated into inline `(?imsx)`
//! groups; the ASCII bit maps to `(?-u)`.

use std::time::Instant;

use fancy_regex::Regex;
use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::Engine,
    error::{Error, LimitError},
    resource::regex_flags,
    signal::Flow,
    value::Map,
};

use super::constructs::ConstructKind;

/// Backtracking steps granted per second of configured timeout. The default
/// two-second budget therefore allows two million steps, which a
/// catastrophic pattern on a short input exhausts almost immediately while
/// leaving real-world patterns untouched.
const BACKTRACKS_PER_SECOND: f64 = 1_000_000.0;

pub(crate) fn execute(
    engine: &Engine,
    kind: ConstructKind,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<Value> {
    let spec = payload.as_object().ok_or_else(|| {
        Error::shape(format!("{marker} requires an object with 'pattern' and 'string'"))
    })?;

    let pattern = required_string(engine, marker, spec, "pattern", ctx)?;
    let string = optional_string(engine, marker, spec, "string", ctx)?;
    let flags = match spec.get("flags") {
        Some(raw) => engine.process_value(raw, ctx)?.as_u64().unwrap_or(0) as u32,
        None => 0,
    };

    let allowed = engine.limits().regex_allowed_flags;
    if flags & !allowed != 0 {
        return Err(Error::shape(format!(
            "regex flags {flags} contain disallowed flags (allowed bitmask: {allowed})"
        ))
        .into());
    }

    let timeout = engine.limits().regex_timeout;
    let budget = (timeout.as_secs_f64() * BACKTRACKS_PER_SECOND).max(1.0) as usize;
    let prefix = flag_prefix(flags);

    let compile = |raw: &str| -> Flow<Regex> {
        fancy_regex::RegexBuilder::new(raw)
            .backtrack_limit(budget)
            .build()
            .map_err(|err| Error::shape(format!("{marker}: invalid pattern: {err}")).into())
    };

    let started = Instant::now();
    let result = match kind {
        ConstructKind::RegexMatch => {
            // \A..\z anchors match the whole string even under MULTILINE
            let regex = compile(&format!(r"{prefix}\A(?:{pattern})\z"))?;
            let matched = run(marker, timeout, regex.is_match(&string))?;
            Value::Bool(matched)
        }
        ConstructKind::RegexSearch => {
            let regex = compile(&format!("{prefix}{pattern}"))?;
            match run(marker, timeout, regex.find(&string))? {
                Some(found) => Value::String(found.as_str().to_owned()),
                None => Value::Null,
            }
        }
        ConstructKind::RegexFindall => {
            let regex = compile(&format!("{prefix}{pattern}"))?;
            let mut out = Vec::new();
            for caps in regex.captures_iter(&string) {
                let caps = run(marker, timeout, caps)?;
                out.push(findall_entry(&caps));
            }
            Value::Array(out)
        }
        ConstructKind::RegexReplace => {
            let replacement = required_string(engine, marker, spec, "replacement", ctx)?;
            let count = match spec.get("count") {
                Some(raw) => engine.process_value(raw, ctx)?.as_u64().unwrap_or(0) as usize,
                None => 0,
            };
            let regex = compile(&format!("{prefix}{pattern}"))?;
            // limit 0 replaces every occurrence
            Value::String(regex.replacen(&string, count, replacement.as_str()).into_owned())
        }
        ConstructKind::RegexGroups => {
            let regex = compile(&format!("{prefix}{pattern}"))?;
            match run(marker, timeout, regex.captures(&string))? {
                Some(caps) => Value::Array(
                    (1..caps.len())
                        .map(|i| {
                            caps.get(i)
                                .map_or(Value::Null, |m| Value::String(m.as_str().to_owned()))
                        })
                        .collect(),
                ),
                None => Value::Array(Vec::new()),
            }
        }
        _ => return Err(Error::shape(format!("{marker} is not a regex construct")).into()),
    };

    if started.elapsed() > timeout {
        return Err(LimitError::RegexTimeout { limit: timeout }.into());
    }
    Ok(result)
}

/// Maps a fancy-regex runtime failure (backtrack budget exhausted) onto the
/// timeout error; other failures are shape errors.
fn run<T>(marker: &str, timeout: std::time::Duration, result: fancy_regex::Result<T>) -> Flow<T> {
    result.map_err(|err| match err {
        fancy_regex::Error::RuntimeError(_) => LimitError::RegexTimeout { limit: timeout }.into(),
        other => Error::shape(format!("{marker}: {other}")).into(),
    })
}

/// Wire findall semantics: no capture groups yields the full match, one
/// group yields that group, several yield an array of groups.
fn findall_entry(caps: &fancy_regex::Captures<'_>) -> Value {
    let group = |i: usize| {
        caps.get(i)
            .map_or(Value::Null, |m| Value::String(m.as_str().to_owned()))
    };
    match caps.len() {
        0 | 1 => group(0),
        2 => group(1),
        n => Value::Array((1..n).map(group).collect()),
    }
}

fn flag_prefix(flags: u32) -> String {
    let mut inline = String::new();
    if flags & regex_flags::IGNORECASE != 0 {
        inline.push('i');
    }
    if flags & regex_flags::MULTILINE != 0 {
        inline.push('m');
    }
    if flags & regex_flags::DOTALL != 0 {
        inline.push('s');
    }
    if flags & regex_flags::VERBOSE != 0 {
        inline.push('x');
    }
    let mut prefix = String::new();
    if !inline.is_empty() {
        prefix.push_str(&format!("(?{inline})"));
    }
    if flags & regex_flags::ASCII != 0 {
        prefix.push_str("(?-u)");
    }
    prefix
}

fn required_string(
    engine: &Engine,
    marker: &str,
    spec: &Map,
    key: &str,
    ctx: &mut ExecutionContext,
) -> Flow<String> {
    let raw = spec
        .get(key)
        .ok_or_else(|| Error::shape(format!("{marker} requires a '{key}' field")))?;
    super::constructs::string_operand(engine, marker, raw, ctx)
}

fn optional_string(
    engine: &Engine,
    marker: &str,
    spec: &Map,
    key: &str,
    ctx: &mut ExecutionContext,
) -> Flow<String> {
    match spec.get(key) {
        Some(raw) => super::constructs::string_operand(engine, marker, raw, ctx),
        None => Ok(String::new()),
    }
}
