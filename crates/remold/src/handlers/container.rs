//! Recursive container descent for the value pipeline.
//!
//! Any value that is a container but *not* a special construct needs its
//! children resolved individually. Arrays resolve each element; objects
//! resolve keys and values (a key collision after substitution is an
//! error). Inner resolution runs with unescaping deferred so the `$${` →
//! `${` pass fires only once, at the outermost `process_value`.

use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::Engine,
    error::Error,
    signal::Flow,
    value::{Map, render},
};

/// Walks into a container and resolves each element through the value
/// pipeline. Scalars pass through unchanged (the identity handler below
/// this one in the tree normally catches them first).
pub(crate) fn descend(engine: &Engine, value: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(engine.process_value_raw(item, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(entries) => {
            let mut out = Map::new();
            for (key, val) in entries {
                let resolved_key = engine.process_value_raw(&Value::String(key.clone()), ctx)?;
                let new_key = match resolved_key {
                    Value::String(s) => s,
                    other => render(&other),
                };
                if out.contains_key(&new_key) {
                    return Err(Error::shape(format!(
                        "duplicate key after substitution: '{new_key}'"
                    ))
                    .into());
                }
                out.insert(new_key, engine.process_value_raw(val, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
