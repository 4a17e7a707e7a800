//! Function definition and invocation: `$def`, `$func`, and `$raise`.
//!
//! Definitions are plain data stored in the context's function registry, so
//! they live exactly as long as the context (one `apply`, or longer when the
//! caller persists a context across `apply_to_context` calls) and two
//! concurrent applies can never see each other's definitions.

use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::Engine,
    error::{Error, LimitError},
    signal::{Flow, Interrupt},
    value::{Map, render, type_name},
};

/// How a function body sees the caller's destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum BodyContext {
    /// The body works on a deep copy; the caller's dest is untouched.
    #[default]
    Copy,
    /// The body starts from an empty dest.
    New,
    /// The body mutates the caller's dest in place.
    Shared,
}

impl BodyContext {
    /// Unknown spellings fall back to `copy`, the isolating default.
    fn parse(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("new") => Self::New,
            Some("shared") => Self::Shared,
            _ => Self::Copy,
        }
    }
}

/// `$def` — install a function definition.
///
/// Schema: `{"$def": name, "params": [...], "body": [...], "return": path,
/// "on_failure": [...], "context": "copy"|"new"|"shared"}`. The definition
/// is stored verbatim; nothing inside it is resolved until a call binds
/// arguments.
pub(crate) fn define(step: &Map, ctx: &mut ExecutionContext) -> Flow<()> {
    let Some(name) = step.get("$def").and_then(Value::as_str) else {
        return Err(Error::shape("$def requires a string function name").into());
    };
    if !step.contains_key("body") {
        return Err(Error::shape(format!("function '{name}' has no body")).into());
    }

    let mut definition = Map::new();
    for key in ["params", "body", "return", "on_failure", "context"] {
        if let Some(value) = step.get(key) {
            definition.insert(key.to_owned(), value.clone());
        }
    }
    ctx.functions_mut()
        .insert(name.to_owned(), Value::Object(definition));
    Ok(())
}

/// `$func` — call a previously defined function and return its value.
///
/// In an operation position the pipeline assigns the returned value to the
/// destination; in a value position the value pipeline substitutes it.
pub(crate) fn call(engine: &Engine, node: &Map, ctx: &mut ExecutionContext) -> Flow<Value> {
    let Some(name) = node.get("$func").and_then(Value::as_str) else {
        return Err(Error::shape("$func requires a string function name").into());
    };
    let Some(definition) = ctx.function(name).cloned() else {
        return Err(Error::shape(format!("function '{name}' is not defined")).into());
    };

    let params: Vec<String> = definition
        .get("params")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|p| p.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
        })
        .unwrap_or_else(|| Some(Vec::new()))
        .ok_or_else(|| Error::shape(format!("function '{name}' has non-string parameter names")))?;

    let raw_args = match node.get("args").cloned().unwrap_or(Value::Array(Vec::new())) {
        Value::Array(args) => args,
        other => {
            return Err(Error::shape(format!(
                "$func args must be an array, got {}",
                type_name(&other)
            ))
            .into());
        }
    };
    if raw_args.len() != params.len() {
        return Err(Error::shape(format!(
            "expected {} arguments, got {} for function '{name}'",
            params.len(),
            raw_args.len()
        ))
        .into());
    }
    let mut args = Vec::with_capacity(raw_args.len());
    for raw in &raw_args {
        args.push(engine.process_value(raw, ctx)?);
    }

    let limit = engine.limits().max_function_recursion_depth;
    ctx.call_depth += 1;
    if ctx.call_depth > limit {
        let depth = ctx.call_depth;
        ctx.call_depth -= 1;
        return Err(LimitError::FunctionDepth { limit, depth }.into());
    }

    // bind parameters; previous bindings restored on every exit path below
    let mut saved: Vec<(String, Option<Value>)> = Vec::with_capacity(params.len());
    for (param, arg) in params.iter().zip(args) {
        saved.push((param.clone(), ctx.bind_read_only(param, arg)));
    }

    let result = invoke(engine, name, &definition, ctx);

    for (param, previous) in saved.into_iter().rev() {
        ctx.restore_read_only(&param, previous);
    }
    ctx.call_depth -= 1;
    result
}

/// Runs the body (and `on_failure` when needed) in the definition's context
/// mode and projects the function's value.
fn invoke(
    engine: &Engine,
    name: &str,
    definition: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<Value> {
    let mode = BodyContext::parse(definition.get("context"));
    let body = definition
        .get("body")
        .ok_or_else(|| Error::shape(format!("function '{name}' has no body")))?;

    match run_in_mode(engine, mode, body, ctx) {
        Ok(result_dest) => project(engine, definition, result_dest),
        Err(Interrupt::Return(value)) => Ok(value),
        Err(Interrupt::Error(err)) => match definition.get("on_failure") {
            Some(fallback) => match run_in_mode(engine, mode, fallback, ctx) {
                Ok(result_dest) => project(engine, definition, result_dest),
                Err(Interrupt::Return(value)) => Ok(value),
                Err(other) => Err(other),
            },
            None => Err(Interrupt::Error(err)),
        },
        Err(signal) => Err(signal),
    }
}

/// Executes `steps` under the given dest mode, returning the body's
/// resulting destination. For `copy`/`new` the caller's dest is restored on
/// every path; for `shared` the caller's (mutated) dest is returned cloned.
fn run_in_mode(
    engine: &Engine,
    mode: BodyContext,
    steps: &Value,
    ctx: &mut ExecutionContext,
) -> Flow<Value> {
    match mode {
        BodyContext::Shared => {
            engine.run_steps(steps, ctx)?;
            Ok(ctx.dest.clone())
        }
        BodyContext::Copy | BodyContext::New => {
            let working = if mode == BodyContext::Copy {
                ctx.dest.clone()
            } else {
                Value::Object(Map::new())
            };
            let saved = std::mem::replace(&mut ctx.dest, working);
            let run = engine.run_steps(steps, ctx);
            let result = std::mem::replace(&mut ctx.dest, saved);
            run.map(|()| result)
        }
    }
}

/// Applies the `return` path projection, or yields the whole result dest.
fn project(engine: &Engine, definition: &Value, result_dest: Value) -> Flow<Value> {
    match definition.get("return").and_then(Value::as_str) {
        Some(return_path) => {
            let (_, path) = crate::processor::split_prefix(return_path);
            Ok(engine.resolver().get(&path, &result_dest)?)
        }
        None => Ok(result_dest),
    }
}

/// `$raise` — raise a user-level error with the resolved message.
pub(crate) fn raise(engine: &Engine, payload: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    let message = engine.process_value(payload, ctx)?;
    Err(Error::domain(render(&message)).into())
}
