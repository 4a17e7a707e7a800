//! Operation handlers — every step dispatched by the `op` field.
//!
//! Operations mutate the context's destination. The loop and branch
//! operations snapshot the destination before running their bodies and
//! restore it when a plain error escapes; control-flow signals keep the
//! changes made before they fired. `try` is the deliberate exception: it
//! keeps partial effects when catching.

use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::Engine,
    error::{Error, LimitError, PointerError},
    processor::{PointerProcessor, with_dest_default},
    signal::{Flow, Interrupt},
    value::{Map, is_truthy, type_name, value_eq},
};

/// Builtin operation discriminators, spelled as their `op` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OpKind {
    Set,
    Copy,
    #[strum(serialize = "copyD")]
    CopyDest,
    Delete,
    Foreach,
    While,
    If,
    Exec,
    Update,
    Distinct,
    ReplaceRoot,
    Assert,
    #[strum(serialize = "assertD")]
    AssertDest,
    Try,
}

pub(crate) fn execute(
    engine: &Engine,
    kind: OpKind,
    step: &Map,
    ctx: &mut ExecutionContext,
) -> Flow<()> {
    match kind {
        OpKind::Set => set(engine, step, ctx),
        OpKind::Copy => copy(engine, step, ctx, false),
        OpKind::CopyDest => copy(engine, step, ctx, true),
        OpKind::Delete => delete(engine, step, ctx),
        OpKind::Foreach => foreach(engine, step, ctx),
        OpKind::While => while_(engine, step, ctx),
        OpKind::If => if_(engine, step, ctx),
        OpKind::Exec => exec(engine, step, ctx),
        OpKind::Update => update(engine, step, ctx),
        OpKind::Distinct => distinct(engine, step, ctx),
        OpKind::ReplaceRoot => replace_root(engine, step, ctx),
        OpKind::Assert => assert_(engine, step, ctx, false),
        OpKind::AssertDest => assert_(engine, step, ctx, true),
        OpKind::Try => try_(engine, step, ctx),
    }
}

// ---------------------------------------------------------------------------
// set / copy / delete
// ---------------------------------------------------------------------------

/// `set {path, value, create=true, extend=true}` — write a resolved value
/// at a destination path. A `-` leaf appends; when the append target is
/// missing or not an array and `create` holds, the parent is created as
/// (or converted into) an array first. Appending an array extends unless
/// `extend` is off.
fn set(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let path = path_param(engine, step, "path", "set", ctx)?;
    let create = bool_param(step, "create", true);
    let extend = bool_param(step, "extend", true);
    let value = engine.process_value(required(step, "value", "set")?, ctx)?;
    write_value(engine, &path, value, create, extend, ctx)
}

fn write_value(
    engine: &Engine,
    path: &str,
    value: Value,
    create: bool,
    extend: bool,
    ctx: &mut ExecutionContext,
) -> Flow<()> {
    let resolver = engine.resolver();
    let (root, stripped) = PointerProcessor::write_root(path, ctx);

    if let Some(parent_path) = stripped.strip_suffix("/-") {
        let parent_path = if parent_path.is_empty() { "/" } else { parent_path };

        if resolver.get(parent_path, root).is_err() {
            if !create {
                return Err(PointerError::NotFound {
                    path: stripped.clone(),
                    segment: "-".to_owned(),
                }
                .into());
            }
            resolver.set(parent_path, root, Value::Array(Vec::new()))?;
        }

        let parent = resolver.get_mut(parent_path, root)?;
        if !parent.is_array() {
            if !create {
                return Err(PointerError::TypeMismatch {
                    path: stripped.clone(),
                    expected: "array",
                    found: type_name(parent),
                }
                .into());
            }
            // empty objects become empty arrays; anything else gets wrapped
            let existing = std::mem::take(parent);
            *parent = match existing {
                Value::Object(map) if map.is_empty() => Value::Array(Vec::new()),
                other => Value::Array(vec![other]),
            };
        }

        let Value::Array(items) = parent else {
            unreachable!("parent was just made an array");
        };
        match value {
            Value::Array(new_items) if extend => items.extend(new_items),
            other => items.push(other),
        }
        return Ok(());
    }

    resolver.set(&stripped, root, value)?;
    Ok(())
}

/// `copy {from, path, default?, ignore_missing=false, create=true,
/// extend=true}` — resolve a pointer (prefix-aware) and delegate to `set`.
/// `copyD` is the destination-default variant.
fn copy(engine: &Engine, step: &Map, ctx: &mut ExecutionContext, from_dest: bool) -> Flow<()> {
    let op = if from_dest { "copyD" } else { "copy" };
    let path = path_param(engine, step, "path", op, ctx)?;
    let create = bool_param(step, "create", true);
    let extend = bool_param(step, "extend", true);
    let from = path_param(engine, step, "from", op, ctx)?;
    let from = if from_dest { with_dest_default(&from) } else { from };
    let ignore_missing = bool_param(step, "ignore_missing", false);

    let value = match engine.processor().get(engine.resolver(), &from, ctx) {
        Ok(value) => value,
        Err(err) => match step.get("default") {
            Some(default) => default.clone(),
            None if ignore_missing => return Ok(()),
            None => return Err(err.into()),
        },
    };

    // delegate: the copied value passes through `set`'s resolution pass
    let value = engine.process_value(&value, ctx)?;
    write_value(engine, &path, value, create, extend, ctx)
}

/// `delete {path, ignore_missing=true}` — remove a destination node. The
/// `-` leaf is rejected; a missing path is swallowed unless asked not to.
fn delete(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let path = path_param(engine, step, "path", "delete", ctx)?;
    let ignore_missing = bool_param(step, "ignore_missing", true);

    if path.ends_with("/-") {
        return Err(Error::shape("'-' is not allowed in delete").into());
    }

    match engine.processor().delete(engine.resolver(), &path, ctx) {
        Ok(()) => Ok(()),
        Err(PointerError::NotFound { .. } | PointerError::OutOfRange { .. }) if ignore_missing => Ok(()),
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// foreach / while / if
// ---------------------------------------------------------------------------

/// `foreach {in, as="item", do, skip_empty=true, default=[]}` — iterate a
/// resolved collection, binding each element under the loop variable in
/// `temp_read_only`. Objects iterate as `[key, value]` pairs and strings as
/// single-character strings. Oversized inputs abort before any body runs.
fn foreach(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let in_ptr = path_param(engine, step, "in", "foreach", ctx)?;
    let skip_empty = bool_param(step, "skip_empty", true);
    let default = step.get("default").cloned().unwrap_or(Value::Array(Vec::new()));

    let collection = engine
        .processor()
        .get(engine.resolver(), &in_ptr, ctx)
        .unwrap_or(default);

    let items: Vec<Value> = match collection {
        Value::Array(items) => items,
        Value::Object(entries) => entries
            .into_iter()
            .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
            .collect(),
        Value::String(text) => text.chars().map(|c| Value::String(c.to_string())).collect(),
        other => {
            return Err(Error::shape(format!(
                "foreach cannot iterate {}",
                type_name(&other)
            ))
            .into());
        }
    };

    let limit = engine.limits().max_foreach_items;
    if items.len() > limit {
        return Err(LimitError::ForeachItems {
            limit,
            len: items.len(),
        }
        .into());
    }
    if items.is_empty() && skip_empty {
        return Ok(());
    }

    let var = step.get("as").and_then(Value::as_str).unwrap_or("item").to_owned();
    let body = required(step, "do", "foreach")?;
    let snapshot = ctx.dest.clone();

    for item in items {
        let previous = ctx.bind_read_only(&var, item);
        let outcome = engine.run_steps(body, ctx);
        ctx.restore_read_only(&var, previous);

        match outcome {
            Ok(()) => {}
            Err(Interrupt::Break) => break,
            Err(Interrupt::Continue) => continue,
            Err(err @ Interrupt::Error(_)) => {
                ctx.dest = snapshot;
                return Err(err);
            }
            // $return and raw signals pass through with changes kept
            Err(signal) => return Err(signal),
        }
    }
    Ok(())
}

/// `while {(cond | path [+ equals | exists]), do, do_while=false}` — loop
/// while the condition holds, bounded by the loop-iteration budget.
/// Path-based conditions check the destination.
fn while_(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let mut skip_check = bool_param(step, "do_while", false);
    let body = required(step, "do", "while")?;
    let limit = engine.limits().max_loop_iterations;
    let snapshot = ctx.dest.clone();
    let mut iterations = 0usize;

    loop {
        iterations += 1;
        if iterations > limit {
            ctx.dest = snapshot;
            return Err(LimitError::LoopIterations { limit }.into());
        }

        if !skip_check && !condition(engine, step, "while", ctx)? {
            break;
        }
        skip_check = false;

        match engine.run_steps(body, ctx) {
            Ok(()) => {}
            Err(Interrupt::Break) => break,
            Err(Interrupt::Continue) => {}
            Err(err @ Interrupt::Error(_)) => {
                ctx.dest = snapshot;
                return Err(err);
            }
            Err(signal) => return Err(signal),
        }
    }
    Ok(())
}

/// `if {(cond | path [+ equals | exists]), then?/do?, else?}` — evaluate
/// the condition once and run the chosen branch, rolling the destination
/// back when the branch fails with a plain error.
fn if_(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let truthy = condition(engine, step, "if", ctx)?;

    let branch = if truthy {
        step.get("then").or_else(|| step.get("do"))
    } else {
        step.get("else")
    };
    let Some(branch) = branch else {
        return Ok(());
    };
    if !is_truthy(branch) {
        return Ok(()); // empty branch — no-op
    }

    let snapshot = ctx.dest.clone();
    match engine.run_steps(branch, ctx) {
        Ok(()) => Ok(()),
        Err(err @ Interrupt::Error(_)) => {
            ctx.dest = snapshot;
            Err(err)
        }
        Err(signal) => Err(signal),
    }
}

/// Shared condition evaluation for `while` and `if`.
///
/// * `cond` — resolve through the value pipeline, take truthiness
/// * `path` + `equals` — destination value equals the expectation
/// * `path` + `exists` — destination path resolves
/// * `path` alone — destination value is truthy
fn condition(engine: &Engine, step: &Map, op: &str, ctx: &mut ExecutionContext) -> Flow<bool> {
    if let Some(cond) = step.get("cond") {
        let resolved = engine.process_value(cond, ctx)?;
        return Ok(is_truthy(&resolved));
    }

    if step.contains_key("path") {
        let path = path_param(engine, step, "path", op, ctx)?;
        let pointer = with_dest_default(&path);
        let current = engine.processor().get(engine.resolver(), &pointer, ctx).ok();

        if let Some(expected) = step.get("equals") {
            let expected = engine.process_value(expected, ctx)?;
            return Ok(current.as_ref().is_some_and(|value| value_eq(value, &expected)));
        }
        if step.get("exists").is_some_and(is_truthy) {
            return Ok(current.is_some());
        }
        return Ok(current.as_ref().is_some_and(is_truthy));
    }

    Err(Error::shape(format!("{op} operation requires 'cond' or 'path'")).into())
}

// ---------------------------------------------------------------------------
// exec / update / distinct / replace_root
// ---------------------------------------------------------------------------

/// `exec {(from | actions), merge=false, default?}` — run actions fetched
/// from a pointer or written inline. Without `merge` the actions run
/// against a fresh destination that replaces the current one on success;
/// with `merge` they mutate the current destination in place.
fn exec(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let has_from = step.contains_key("from");
    let has_actions = step.contains_key("actions");
    if has_from && has_actions {
        return Err(Error::shape("exec operation cannot have both 'from' and 'actions'").into());
    }

    let actions = if has_from {
        let from = path_param(engine, step, "from", "exec", ctx)?;
        match engine.processor().get(engine.resolver(), &from, ctx) {
            Ok(actions) => actions,
            Err(_) => match step.get("default") {
                Some(default) => engine.process_value(default, ctx)?,
                None => {
                    return Err(Error::shape(format!("cannot find actions at '{from}'")).into());
                }
            },
        }
    } else if let Some(inline) = step.get("actions") {
        engine.process_value(inline, ctx)?
    } else {
        return Err(Error::shape("exec operation requires either 'from' or 'actions'").into());
    };

    if bool_param(step, "merge", false) {
        return engine.run_steps(&actions, ctx);
    }

    let saved = std::mem::replace(&mut ctx.dest, Value::Object(Map::new()));
    match engine.run_steps(&actions, ctx) {
        // the fresh dest the actions built replaces the caller's
        Ok(()) => Ok(()),
        Err(interrupt) => {
            ctx.dest = saved;
            Err(interrupt)
        }
    }
}

/// `update {path, (from | value), create=true, deep=false, default?}` —
/// merge an object into a destination target. `deep` descends into pairs
/// where both sides are objects; a root path merges into the root object.
fn update(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let path = path_param(engine, step, "path", "update", ctx)?;
    let create = bool_param(step, "create", true);
    let deep = bool_param(step, "deep", false);

    let update_value = if step.contains_key("from") {
        let from = path_param(engine, step, "from", "update", ctx)?;
        match engine.processor().get(engine.resolver(), &from, ctx) {
            Ok(value) => value,
            Err(err) => match step.get("default") {
                Some(default) => default.clone(),
                None => return Err(err.into()),
            },
        }
    } else if let Some(inline) = step.get("value") {
        engine.process_value(inline, ctx)?
    } else {
        return Err(Error::shape("update operation requires either 'from' or 'value'").into());
    };

    let update_map = match update_value {
        Value::Object(map) => map,
        other => {
            return Err(Error::shape(format!(
                "update value must be an object, got {}",
                type_name(&other)
            ))
            .into());
        }
    };

    let resolver = engine.resolver();
    let (root, stripped) = PointerProcessor::write_root(&path, ctx);
    if resolver.get(&stripped, root).is_err() {
        if !create {
            return Err(PointerError::NotFound {
                path: stripped.clone(),
                segment: stripped.clone(),
            }
            .into());
        }
        resolver.set(&stripped, root, Value::Object(Map::new()))?;
    }

    let target = resolver.get_mut(&stripped, root)?;
    let Value::Object(target_map) = target else {
        return Err(Error::shape(format!(
            "'{path}' is not an object, cannot update"
        ))
        .into());
    };

    if deep {
        deep_update(target_map, update_map);
    } else {
        for (key, value) in update_map {
            target_map.insert(key, value);
        }
    }
    Ok(())
}

fn deep_update(target: &mut Map, source: Map) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_update(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// `distinct {path, key?}` — deduplicate a destination array in place,
/// keeping first occurrences. With `key`, elements compare by the resolved
/// sub-value; elements whose comparison value is itself a container are
/// always kept.
fn distinct(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let path = path_param(engine, step, "path", "distinct", ctx)?;
    let key_path = if step.contains_key("key") {
        Some(path_param(engine, step, "key", "distinct", ctx)?)
    } else {
        None
    };

    let resolver = engine.resolver();
    // resolve the comparison values before borrowing the array mutably
    let list = engine.processor().get(resolver, &path, ctx)?;
    let Value::Array(items) = list else {
        return Err(Error::shape(format!(
            "'{path}' is not an array, cannot distinct"
        ))
        .into());
    };

    let mut seen: Vec<Value> = Vec::new();
    let mut unique: Vec<Value> = Vec::new();
    for item in items {
        let probe = match &key_path {
            Some(key) => resolver.get(key, &item)?,
            None => item.clone(),
        };
        match probe {
            Value::Array(_) | Value::Object(_) => unique.push(item),
            scalar => {
                if !seen.iter().any(|s| value_eq(s, &scalar)) {
                    seen.push(scalar);
                    unique.push(item);
                }
            }
        }
    }

    let (root, stripped) = PointerProcessor::write_root(&path, ctx);
    resolver.set(&stripped, root, Value::Array(unique))?;
    Ok(())
}

/// `replace_root {value}` — replace the entire destination with the
/// resolved value.
fn replace_root(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let value = engine.process_value(required(step, "value", "replace_root")?, ctx)?;
    ctx.dest = value;
    Ok(())
}

// ---------------------------------------------------------------------------
// assert / assertD
// ---------------------------------------------------------------------------

/// `assert {(path | value), equals?, return=false, to_path?}` — check a
/// source value (or `assertD`, a destination value). On failure with
/// `return`, the result `false` is produced instead of an error; with
/// `to_path` it is stored there instead of replacing the destination.
fn assert_(engine: &Engine, step: &Map, ctx: &mut ExecutionContext, against_dest: bool) -> Flow<()> {
    let op = if against_dest { "assertD" } else { "assert" };
    let has_path = step.contains_key("path");
    let has_value = step.contains_key("value");
    if has_path && has_value {
        return Err(Error::shape(format!("{op} operation cannot have both 'path' and 'value'")).into());
    }
    if !has_path && !has_value {
        return Err(Error::shape(format!("{op} operation requires either 'path' or 'value'")).into());
    }

    let should_return = bool_param(step, "return", false);

    let current = if has_value {
        engine.process_value(required(step, "value", op)?, ctx)?
    } else {
        let path = path_param(engine, step, "path", op, ctx)?;
        let pointer = if against_dest { with_dest_default(&path) } else { path.clone() };
        match engine.processor().get(engine.resolver(), &pointer, ctx) {
            Ok(value) => value,
            Err(_) => {
                let place = if against_dest { "destination" } else { "source" };
                if should_return {
                    return produce(engine, step, Value::Bool(false), ctx);
                }
                return Err(Error::assertion(format!("'{path}' does not exist in {place}")).into());
            }
        }
    };

    if let Some(expected) = step.get("equals") {
        let expected = engine.process_value(expected, ctx)?;
        if !value_eq(&current, &expected) {
            if should_return {
                return produce(engine, step, Value::Bool(false), ctx);
            }
            return Err(Error::assertion(format!(
                "value does not equal {}",
                crate::value::render(&expected)
            ))
            .into());
        }
    }

    if should_return {
        return produce(engine, step, current, ctx);
    }
    Ok(())
}

/// Delivers an assert result in `return` mode: stored at `to_path` when
/// given, otherwise it becomes the destination.
fn produce(engine: &Engine, step: &Map, value: Value, ctx: &mut ExecutionContext) -> Flow<()> {
    match step.get("to_path").and_then(Value::as_str) {
        Some(to_path) => {
            engine.processor().set(engine.resolver(), to_path, ctx, value)?;
            Ok(())
        }
        None => {
            ctx.dest = value;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// try
// ---------------------------------------------------------------------------

/// `try {do, except?, finally?}` — run `do`; a plain error runs `except`
/// (with `_error_type`/`_error_message` bound read-only for its duration)
/// or re-raises when there is none. `finally` always runs — including on
/// control-flow signals — and an error raised inside it supersedes the
/// original outcome. Partial effects of `do` are deliberately kept.
fn try_(engine: &Engine, step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let body = required(step, "do", "try")?;

    let outcome = match engine.run_steps(body, ctx) {
        Err(Interrupt::Error(err)) => match step.get("except") {
            Some(handler) => {
                let prev_type =
                    ctx.bind_read_only("_error_type", Value::String(err.kind_name().to_owned()));
                let prev_message =
                    ctx.bind_read_only("_error_message", Value::String(err.to_string()));
                let handled = engine.run_steps(handler, ctx);
                ctx.restore_read_only("_error_message", prev_message);
                ctx.restore_read_only("_error_type", prev_type);
                handled
            }
            None => Err(Interrupt::Error(err)),
        },
        other => other,
    };

    if let Some(cleanup) = step.get("finally") {
        engine.run_steps(cleanup, ctx)?;
    }
    outcome
}

// ---------------------------------------------------------------------------
// parameter helpers
// ---------------------------------------------------------------------------

fn required<'a>(step: &'a Map, key: &str, op: &str) -> Flow<&'a Value> {
    step.get(key)
        .ok_or_else(|| Error::shape(format!("{op} operation requires '{key}'")).into())
}

/// Truthiness of a raw (unresolved) flag parameter.
fn bool_param(step: &Map, key: &str, default: bool) -> bool {
    step.get(key).map_or(default, is_truthy)
}

/// A template-expanded pointer parameter.
fn path_param(
    engine: &Engine,
    step: &Map,
    key: &str,
    op: &str,
    ctx: &mut ExecutionContext,
) -> Flow<String> {
    let raw = required(step, key, op)?;
    let resolved = engine.process_value(raw, ctx)?;
    match resolved {
        Value::String(path) => Ok(path),
        other => Err(Error::shape(format!(
            "{op} '{key}' must be a string pointer, got {}",
            type_name(&other)
        ))
        .into()),
    }
}
