//! Core value constructs: resolution, logical, comparison, arithmetic, and
//! `$cast`.
//!
//! A construct is an object carrying a marker key; the whole object is
//! replaced by the handler's result. Dispatch walks the engine's construct
//! table in registration order and picks the first key present in the node —
//! that order is the documented tie-break when an object carries several
//! marker keys. Any construct may additionally carry `$raw: true`: after the
//! primary construct resolves, the handler emits a raw-value interrupt so
//! the stabilisation loop stops with the result as-is.

use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::{ConstructHandler, Engine},
    error::{Error, LimitError},
    signal::{Flow, Interrupt},
    value::{self, Map, Num, is_truthy, type_name, value_eq},
};

/// Builtin construct discriminators, in their canonical marker-key spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ConstructKind {
    #[strum(serialize = "$ref")]
    Ref,
    #[strum(serialize = "$eval")]
    Eval,
    #[strum(serialize = "$raw")]
    Raw,
    #[strum(serialize = "$and")]
    And,
    #[strum(serialize = "$or")]
    Or,
    #[strum(serialize = "$not")]
    Not,
    #[strum(serialize = "$gt")]
    Gt,
    #[strum(serialize = "$gte")]
    Gte,
    #[strum(serialize = "$lt")]
    Lt,
    #[strum(serialize = "$lte")]
    Lte,
    #[strum(serialize = "$eq")]
    Eq,
    #[strum(serialize = "$ne")]
    Ne,
    #[strum(serialize = "$in")]
    In,
    #[strum(serialize = "$exists")]
    Exists,
    #[strum(serialize = "$add")]
    Add,
    #[strum(serialize = "$sub")]
    Sub,
    #[strum(serialize = "$mul")]
    Mul,
    #[strum(serialize = "$div")]
    Div,
    #[strum(serialize = "$pow")]
    Pow,
    #[strum(serialize = "$mod")]
    Mod,
    #[strum(serialize = "$str_split")]
    StrSplit,
    #[strum(serialize = "$str_join")]
    StrJoin,
    #[strum(serialize = "$str_slice")]
    StrSlice,
    #[strum(serialize = "$str_upper")]
    StrUpper,
    #[strum(serialize = "$str_lower")]
    StrLower,
    #[strum(serialize = "$str_strip")]
    StrStrip,
    #[strum(serialize = "$str_lstrip")]
    StrLstrip,
    #[strum(serialize = "$str_rstrip")]
    StrRstrip,
    #[strum(serialize = "$str_replace")]
    StrReplace,
    #[strum(serialize = "$str_contains")]
    StrContains,
    #[strum(serialize = "$str_startswith")]
    StrStartswith,
    #[strum(serialize = "$str_endswith")]
    StrEndswith,
    #[strum(serialize = "$regex_match")]
    RegexMatch,
    #[strum(serialize = "$regex_search")]
    RegexSearch,
    #[strum(serialize = "$regex_findall")]
    RegexFindall,
    #[strum(serialize = "$regex_replace")]
    RegexReplace,
    #[strum(serialize = "$regex_groups")]
    RegexGroups,
    #[strum(serialize = "$cast")]
    Cast,
    #[strum(serialize = "$func")]
    Func,
    #[strum(serialize = "$raise")]
    Raise,
}

/// Dispatches a construct node to its handler, applying the `$raw: true`
/// flag afterwards.
pub(crate) fn dispatch(engine: &Engine, node: &Map, ctx: &mut ExecutionContext) -> Flow<Value> {
    for (key, handler) in engine.constructs() {
        let Some(payload) = node.get(key.as_str()) else {
            continue;
        };
        // `$raw: true` alongside another construct key is the stop-iteration
        // flag, not the wrapper construct
        let is_raw_key = key.as_str() == "$raw";
        if is_raw_key && payload == &Value::Bool(true) && carries_other_construct(engine, node) {
            continue;
        }
        let result = match handler {
            ConstructHandler::Builtin(kind) => execute(engine, *kind, node, payload, ctx)?,
            ConstructHandler::Custom(custom) => custom(engine, node, ctx)?,
        };
        if !is_raw_key && node.get("$raw") == Some(&Value::Bool(true)) {
            return Err(Interrupt::Raw(result));
        }
        return Ok(result);
    }
    Err(Error::shape("construct object carries no registered marker key").into())
}

fn carries_other_construct(engine: &Engine, node: &Map) -> bool {
    node.keys()
        .any(|k| k.as_str() != "$raw" && engine.constructs().contains_key(k.as_str()))
}

fn execute(
    engine: &Engine,
    kind: ConstructKind,
    node: &Map,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<Value> {
    use ConstructKind as K;
    let marker = kind.to_string();
    match kind {
        K::Ref => ref_(engine, node, payload, ctx),
        K::Eval => eval(engine, node, payload, ctx),
        K::Raw => Err(Interrupt::Raw(payload.clone())),
        K::And => and(engine, payload, ctx),
        K::Or => or(engine, payload, ctx),
        K::Not => {
            let operand = engine.process_value(payload, ctx)?;
            Ok(Value::Bool(!is_truthy(&operand)))
        }
        K::Gt | K::Gte | K::Lt | K::Lte => ordered(engine, kind, &marker, payload, ctx),
        K::Eq | K::Ne => {
            let [left, right] = binary_operands(engine, &marker, payload, ctx)?;
            let equal = value_eq(&left, &right);
            Ok(Value::Bool(if kind == K::Eq { equal } else { !equal }))
        }
        K::In => in_(engine, &marker, payload, ctx),
        K::Exists => {
            let path = string_operand(engine, &marker, payload, ctx)?;
            Ok(Value::Bool(engine.processor().exists(engine.resolver(), &path, ctx)))
        }
        K::Add => add(engine, payload, ctx),
        K::Sub => sub(engine, payload, ctx),
        K::Mul => mul(engine, payload, ctx),
        K::Div | K::Mod => div_mod(engine, kind, &marker, payload, ctx),
        K::Pow => pow(engine, payload, ctx),
        K::Cast => cast(engine, payload, ctx),
        K::StrSplit
        | K::StrJoin
        | K::StrSlice
        | K::StrUpper
        | K::StrLower
        | K::StrStrip
        | K::StrLstrip
        | K::StrRstrip
        | K::StrReplace
        | K::StrContains
        | K::StrStartswith
        | K::StrEndswith => super::strings::execute(engine, kind, &marker, payload, ctx),
        K::RegexMatch | K::RegexSearch | K::RegexFindall | K::RegexReplace | K::RegexGroups => {
            super::regex::execute(engine, kind, &marker, payload, ctx)
        }
        K::Func => super::function::call(engine, node, ctx),
        K::Raise => super::function::raise(engine, payload, ctx),
    }
}

// ---------------------------------------------------------------------------
// resolution family
// ---------------------------------------------------------------------------

/// `$ref` — resolve a pointer (prefix-aware, slices supported) and return a
/// deep copy; `$default` is the fallback when resolution fails.
fn ref_(engine: &Engine, node: &Map, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let ptr = match engine.process_value_raw(payload, ctx)? {
        Value::String(ptr) => ptr,
        other => {
            return Err(Error::shape(format!(
                "$ref requires a string pointer, got {}",
                type_name(&other)
            ))
            .into());
        }
    };
    match engine.processor().get(engine.resolver(), &ptr, ctx) {
        Ok(value) => Ok(value),
        Err(err) => match node.get("$default") {
            Some(default) => engine.process_value(&default.clone(), ctx),
            None => Err(err.into()),
        },
    }
}

/// `$eval` — run a nested spec against a fresh empty destination; `$select`
/// optionally projects a sub-path of the result. The evaluation is isolated:
/// `@:` pointers inside see the eval's own destination, never the outer one.
fn eval(engine: &Engine, node: &Map, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let saved_dest = std::mem::replace(&mut ctx.dest, Value::Object(Map::new()));
    let run = engine.run_steps(payload, ctx);
    let result = std::mem::replace(&mut ctx.dest, saved_dest);
    run?;

    if let Some(select) = node.get("$select") {
        let sel = match engine.process_value_raw(&select.clone(), ctx)? {
            Value::String(sel) => sel,
            other => {
                return Err(Error::shape(format!(
                    "$select requires a string pointer, got {}",
                    type_name(&other)
                ))
                .into());
            }
        };
        let (_, path) = crate::processor::split_prefix(&sel);
        return Ok(engine.resolver().get(&path, &result)?);
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// logical family — short-circuit, operands resolved one at a time
// ---------------------------------------------------------------------------

fn and(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let operands = list_operands("$and", payload, 1)?;
    let mut last = Value::Null;
    for operand in operands {
        last = engine.process_value(operand, ctx)?;
        if !is_truthy(&last) {
            return Ok(last);
        }
    }
    Ok(last)
}

fn or(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let operands = list_operands("$or", payload, 1)?;
    let mut last = Value::Null;
    for operand in operands {
        last = engine.process_value(operand, ctx)?;
        if is_truthy(&last) {
            return Ok(last);
        }
    }
    Ok(last)
}

// ---------------------------------------------------------------------------
// comparison family
// ---------------------------------------------------------------------------

fn ordered(
    engine: &Engine,
    kind: ConstructKind,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<Value> {
    use std::cmp::Ordering;
    let [left, right] = binary_operands(engine, marker, payload, ctx)?;
    let ordering = value::compare(&left, &right).ok_or_else(|| {
        Error::shape(format!(
            "{marker} cannot compare {} and {}",
            type_name(&left),
            type_name(&right)
        ))
    })?;
    let result = match kind {
        ConstructKind::Gt => ordering == Ordering::Greater,
        ConstructKind::Gte => ordering != Ordering::Less,
        ConstructKind::Lt => ordering == Ordering::Less,
        _ => ordering != Ordering::Greater,
    };
    Ok(Value::Bool(result))
}

/// `$in` — membership: substring, array element, or object key.
fn in_(engine: &Engine, marker: &str, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let [needle, container] = binary_operands(engine, marker, payload, ctx)?;
    let found = match (&needle, &container) {
        (Value::String(n), Value::String(c)) => c.contains(n.as_str()),
        (_, Value::Array(items)) => items.iter().any(|item| value_eq(item, &needle)),
        (Value::String(n), Value::Object(map)) => map.contains_key(n.as_str()),
        _ => {
            return Err(Error::shape(format!(
                "$in cannot test {} membership in {}",
                type_name(&needle),
                type_name(&container)
            ))
            .into());
        }
    };
    Ok(Value::Bool(found))
}

// ---------------------------------------------------------------------------
// arithmetic family — n-ary, left-to-right reduction, capped
// ---------------------------------------------------------------------------

fn add(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let values = resolve_operands(engine, "$add", payload, ctx)?;
    let limits = engine.limits();
    let mut result = values[0].clone();
    for operand in &values[1..] {
        result = match (&result, operand) {
            (Value::Number(_), Value::Number(_)) => {
                let sum = add_numbers(&result, operand)?;
                check_number_cap(&sum, limits.add_max_number_result)?;
                sum
            }
            (Value::String(a), Value::String(b)) => {
                let combined_len = a.len() + b.len();
                if combined_len > limits.add_max_string_result {
                    return Err(LimitError::StringLength {
                        limit: limits.add_max_string_result,
                        len: combined_len,
                    }
                    .into());
                }
                Value::String(format!("{a}{b}"))
            }
            (Value::Array(a), Value::Array(b)) => {
                let mut merged = a.clone();
                merged.extend(b.iter().cloned());
                Value::Array(merged)
            }
            (a, b) => return Err(type_error("$add", a, b)),
        };
    }
    Ok(result)
}

fn sub(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let values = resolve_operands(engine, "$sub", payload, ctx)?;
    let limits = engine.limits();
    let mut result = values[0].clone();
    for operand in &values[1..] {
        let (a, b) = number_pair("$sub", &result, operand)?;
        result = match (a, b) {
            (Num::Int(x), Num::Int(y)) => x
                .checked_sub(y)
                .map(Value::from)
                .or_else(|| value::num_from_f64(x as f64 - y as f64))
                .ok_or_else(|| Error::shape("$sub produced a non-finite result"))?,
            (x, y) => value::num_from_f64(x.to_f64() - y.to_f64())
                .ok_or_else(|| Error::shape("$sub produced a non-finite result"))?,
        };
        check_number_cap(&result, limits.sub_max_number_result)?;
    }
    Ok(result)
}

fn mul(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let values = resolve_operands(engine, "$mul", payload, ctx)?;
    let limits = engine.limits();
    let mut result = values[0].clone();
    for operand in &values[1..] {
        result = match (&result, operand) {
            (Value::String(s), Value::Number(_)) | (Value::Number(_), Value::String(s)) => {
                let n = value::as_num(if result.is_string() { operand } else { &result })
                    .map(|n| n.to_f64())
                    .unwrap_or_default();
                let repeats = n.trunc().max(0.0) as usize;
                let projected = s.len().saturating_mul(n.abs().trunc() as usize);
                if projected > limits.mul_max_string_result {
                    return Err(LimitError::StringLength {
                        limit: limits.mul_max_string_result,
                        len: projected,
                    }
                    .into());
                }
                Value::String(s.repeat(repeats))
            }
            (Value::Number(_), Value::Number(_)) => {
                let (a, b) = number_pair("$mul", &result, operand)?;
                if b.abs() > limits.mul_max_operand {
                    return Err(LimitError::OperandTooLarge {
                        limit: limits.mul_max_operand,
                        value: b.to_f64(),
                    }
                    .into());
                }
                match (a, b) {
                    (Num::Int(x), Num::Int(y)) => x
                        .checked_mul(y)
                        .map(Value::from)
                        .or_else(|| value::num_from_f64(x as f64 * y as f64))
                        .ok_or_else(|| Error::shape("$mul produced a non-finite result"))?,
                    (x, y) => value::num_from_f64(x.to_f64() * y.to_f64())
                        .ok_or_else(|| Error::shape("$mul produced a non-finite result"))?,
                }
            }
            (a, b) => return Err(type_error("$mul", a, b)),
        };
    }
    Ok(result)
}

fn div_mod(
    engine: &Engine,
    kind: ConstructKind,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<Value> {
    let values = resolve_operands(engine, marker, payload, ctx)?;
    let mut result = values[0].clone();
    for operand in &values[1..] {
        let (a, b) = number_pair(marker, &result, operand)?;
        if b.to_f64() == 0.0 {
            return Err(Error::shape(format!("{marker}: division by zero")).into());
        }
        result = if kind == ConstructKind::Div {
            value::num_from_f64(a.to_f64() / b.to_f64())
                .ok_or_else(|| Error::shape(format!("{marker} produced a non-finite result")))?
        } else {
            // floor-mod: the result takes the divisor's sign
            match (a, b) {
                (Num::Int(x), Num::Int(y)) => {
                    let r = x % y;
                    Value::from(if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
                }
                (x, y) => {
                    let (xf, yf) = (x.to_f64(), y.to_f64());
                    value::num_from_f64(xf - yf * (xf / yf).floor())
                        .ok_or_else(|| Error::shape(format!("{marker} produced a non-finite result")))?
                }
            }
        };
    }
    Ok(result)
}

fn pow(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let values = resolve_operands(engine, "$pow", payload, ctx)?;
    let limits = engine.limits();
    let mut result = values[0].clone();
    check_pow_base(&result, limits.pow_max_base)?;
    for operand in &values[1..] {
        let (a, b) = number_pair("$pow", &result, operand)?;
        if b.abs() > limits.pow_max_exponent {
            return Err(LimitError::OperandTooLarge {
                limit: limits.pow_max_exponent,
                value: b.to_f64(),
            }
            .into());
        }
        result = match (a, b) {
            (Num::Int(x), Num::Int(y)) if (0..=u32::MAX as i64).contains(&y) => x
                .checked_pow(y as u32)
                .map(Value::from)
                .or_else(|| value::num_from_f64((x as f64).powf(y as f64)))
                .ok_or_else(|| Error::shape("$pow produced a non-finite result"))?,
            (x, y) => value::num_from_f64(x.to_f64().powf(y.to_f64()))
                .ok_or_else(|| Error::shape("$pow produced a non-finite result"))?,
        };
        check_pow_base(&result, limits.pow_max_base)?;
    }
    Ok(result)
}

fn check_pow_base(value: &Value, max_base: f64) -> Flow<()> {
    if let Some(n) = value::as_num(value)
        && n.abs() > max_base
    {
        return Err(LimitError::OperandTooLarge {
            limit: max_base,
            value: n.to_f64(),
        }
        .into());
    }
    Ok(())
}

fn add_numbers(a: &Value, b: &Value) -> Flow<Value> {
    let (x, y) = number_pair("$add", a, b)?;
    match (x, y) {
        (Num::Int(l), Num::Int(r)) => l
            .checked_add(r)
            .map(Value::from)
            .or_else(|| value::num_from_f64(l as f64 + r as f64))
            .ok_or_else(|| Error::shape("$add produced a non-finite result").into()),
        (l, r) => value::num_from_f64(l.to_f64() + r.to_f64())
            .ok_or_else(|| Error::shape("$add produced a non-finite result").into()),
    }
}

fn check_number_cap(value: &Value, cap: f64) -> Flow<()> {
    if let Some(n) = value::as_num(value)
        && n.abs() > cap
    {
        return Err(LimitError::NumberOverflow {
            limit: cap,
            value: n.to_f64(),
        }
        .into());
    }
    Ok(())
}

fn number_pair(marker: &str, a: &Value, b: &Value) -> Flow<(Num, Num)> {
    match (value::as_num(a), value::as_num(b)) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(type_error(marker, a, b)),
    }
}

fn type_error(marker: &str, a: &Value, b: &Value) -> Interrupt {
    Error::shape(format!(
        "{marker} cannot combine {} and {}",
        type_name(a),
        type_name(b)
    ))
    .into()
}

// ---------------------------------------------------------------------------
// $cast
// ---------------------------------------------------------------------------

fn cast(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let Value::Object(spec) = payload else {
        return Err(Error::shape(format!(
            "$cast requires an object with 'value' and 'type' keys, got {}",
            type_name(payload)
        ))
        .into());
    };
    let (Some(raw_value), Some(raw_type)) = (spec.get("value"), spec.get("type")) else {
        return Err(Error::shape("$cast requires both 'value' and 'type' keys").into());
    };
    let value = engine.process_value(&raw_value.clone(), ctx)?;
    let type_name_str = match engine.process_value(&raw_type.clone(), ctx)? {
        Value::String(name) => name,
        other => {
            return Err(Error::shape(format!(
                "$cast type must be a string, got {}",
                type_name(&other)
            ))
            .into());
        }
    };
    let Some(caster) = engine.casters().get(type_name_str.as_str()) else {
        let available: Vec<&str> = engine.casters().keys().map(String::as_str).collect();
        return Err(Error::shape(format!(
            "unknown cast type '{type_name_str}', available types: {}",
            available.join(", ")
        ))
        .into());
    };
    Ok(caster.apply(value)?)
}

// ---------------------------------------------------------------------------
// operand helpers shared with the string/regex families
// ---------------------------------------------------------------------------

/// Requires the payload to be an array of at least `min` entries.
pub(crate) fn list_operands<'a>(marker: &str, payload: &'a Value, min: usize) -> Flow<&'a Vec<Value>> {
    match payload {
        Value::Array(items) if items.len() >= min => Ok(items),
        _ => Err(Error::shape(format!("{marker} requires a list of at least {min} value(s)")).into()),
    }
}

/// Resolves every operand of an n-ary construct up front.
fn resolve_operands(
    engine: &Engine,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<Vec<Value>> {
    let operands = list_operands(marker, payload, 1)?;
    operands
        .iter()
        .map(|operand| engine.process_value(operand, ctx))
        .collect()
}

/// Requires exactly two operands, resolving both.
pub(crate) fn binary_operands(
    engine: &Engine,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<[Value; 2]> {
    match payload {
        Value::Array(items) if items.len() == 2 => {
            let left = engine.process_value(&items[0], ctx)?;
            let right = engine.process_value(&items[1], ctx)?;
            Ok([left, right])
        }
        _ => Err(Error::shape(format!("{marker} requires a list of exactly 2 values")).into()),
    }
}

/// Resolves the payload and requires it to be a string.
pub(crate) fn string_operand(
    engine: &Engine,
    marker: &str,
    payload: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<String> {
    let resolved = engine.process_value(payload, ctx)?;
    match resolved {
        Value::String(s) => Ok(s),
        other => Err(Error::shape(format!(
            "{marker} requires a string, got {}",
            type_name(&other)
        ))
        .into()),
    }
}
