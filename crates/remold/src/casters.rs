//! Type casters for template expressions and the `$cast` construct.
//!
//! The same caster map backs both surfaces: `${int:/age}` in a template and
//! `{"$cast": {"value": ..., "type": "int"}}` as a construct. Custom casters
//! registered on the engine builder extend (or shadow) the builtin four.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde_json::Value;
use strum::{Display, EnumString};

use crate::{
    error::Error,
    value::{render, type_name},
};

/// Signature for a user-registered caster.
pub type CasterFn = Arc<dyn Fn(Value) -> Result<Value, Error>>;

/// The builtin casters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinCaster {
    Int,
    Float,
    Bool,
    Str,
}

/// One caster entry: builtin or user-supplied.
#[derive(Clone)]
pub enum Caster {
    Builtin(BuiltinCaster),
    Custom(CasterFn),
}

impl fmt::Debug for Caster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(kind) => write!(f, "Caster::Builtin({kind})"),
            Self::Custom(_) => f.write_str("Caster::Custom(..)"),
        }
    }
}

impl Caster {
    /// Applies the caster to a value.
    pub fn apply(&self, value: Value) -> Result<Value, Error> {
        match self {
            Self::Builtin(kind) => kind.apply(value),
            Self::Custom(cast) => cast(value),
        }
    }
}

/// Name → caster registry, in registration order.
pub type CasterMap = IndexMap<String, Caster>;

/// The builtin caster map: `int`, `float`, `bool`, `str`.
#[must_use]
pub fn builtin_casters() -> CasterMap {
    [
        BuiltinCaster::Int,
        BuiltinCaster::Float,
        BuiltinCaster::Bool,
        BuiltinCaster::Str,
    ]
    .into_iter()
    .map(|kind| (kind.to_string(), Caster::Builtin(kind)))
    .collect()
}

impl BuiltinCaster {
    /// Applies a builtin cast.
    ///
    /// * `int` — integers pass through, floats truncate toward zero,
    ///   strings parse as decimal integers, booleans map to 0/1
    /// * `float` — like `int` but produces a float
    /// * `bool` — booleans pass through; numbers compare against zero;
    ///   strings parse as integers first (`"0"` is false, `"abc"` fails);
    ///   containers and null use DSL truthiness
    /// * `str` — renders the value the way templates do
    pub fn apply(self, value: Value) -> Result<Value, Error> {
        match self {
            Self::Int => cast_int(&value).map(Value::from).ok_or_else(|| cast_error("int", &value)),
            Self::Float => cast_float(&value)
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .ok_or_else(|| cast_error("float", &value)),
            Self::Bool => cast_bool(&value).map(Value::Bool).ok_or_else(|| cast_error("bool", &value)),
            Self::Str => Ok(Value::String(render(&value))),
        }
    }
}

fn cast_error(target: &str, value: &Value) -> Error {
    Error::shape(format!(
        "cannot cast {} {} to {target}",
        type_name(value),
        render(value)
    ))
}

fn cast_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn cast_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn cast_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => s.trim().parse::<i64>().ok().map(|i| i != 0),
        other => Some(crate::value::is_truthy(other)),
    }
}
