//! Helpers over the JSON value model.
//!
//! The engine carries every document, step, and intermediate result as a
//! [`serde_json::Value`] built with the `preserve_order` feature, so objects
//! keep insertion order (marker-key dispatch and shorthand expansion depend
//! on it). This module collects the small semantic layers the DSL puts on
//! top of plain JSON: truthiness, coercing equality, ordering, string
//! rendering, and the input-normalisation pass.

use std::cmp::Ordering;

use serde_json::Value;

/// Insertion-ordered JSON object type used throughout the engine.
pub type Map = serde_json::Map<String, Value>;

/// Numeric view of a JSON number, preserving the integer/float split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub(crate) fn to_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    pub(crate) fn abs(self) -> f64 {
        self.to_f64().abs()
    }
}

/// Extracts a numeric view from a value, if it is a number.
///
/// `u64` values above `i64::MAX` degrade to floats; JSON cannot carry NaN or
/// infinities, so every extracted float is finite.
pub(crate) fn as_num(value: &Value) -> Option<Num> {
    let n = value.as_number()?;
    if let Some(i) = n.as_i64() {
        Some(Num::Int(i))
    } else {
        n.as_f64().map(Num::Float)
    }
}

/// Converts a float back into a JSON number.
///
/// Returns `None` for NaN and infinities, which are unrepresentable in the
/// data model; callers surface that as an arithmetic shape error.
pub(crate) fn num_from_f64(f: f64) -> Option<Value> {
    serde_json::Number::from_f64(f).map(Value::Number)
}

/// DSL truthiness, matching the conventions of dynamic languages the wire
/// format came from: `null`, `false`, `0`, `0.0`, `""`, `[]`, and `{}` are
/// falsy; everything else is truthy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Deep structural equality with numeric coercion.
///
/// Integers and floats compare by numeric value (`1 == 1.0`), booleans only
/// compare to booleans, and containers compare element-wise. This is the
/// equality used by `$eq`/`$ne`, `equals` conditions, and `distinct` — the
/// value-pipeline stabilisation check uses plain `==` instead, which keeps
/// the integer/float distinction.
#[must_use]
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => match (as_num(a), as_num(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => x == y,
            (Some(x), Some(y)) => x.to_f64() == y.to_f64(),
            _ => false,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| value_eq(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| value_eq(v, w)))
        }
        _ => a == b,
    }
}

/// Ordering comparison for `$gt`/`$gte`/`$lt`/`$lte`.
///
/// Numbers compare numerically and strings lexicographically. Mixed or
/// non-orderable types return `None`; the construct handler turns that into
/// a shape error naming both operand types.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (as_num(a)?, as_num(b)?);
            match (x, y) {
                (Num::Int(l), Num::Int(r)) => Some(l.cmp(&r)),
                _ => x.to_f64().partial_cmp(&y.to_f64()),
            }
        }
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}

/// Renders a value for embedding into template output.
///
/// Strings render bare (no quotes); arrays and objects render as compact
/// JSON; scalars use their JSON literal form (`null`, `true`, `42`, `3.5`).
#[must_use]
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_else(|_| String::new())
        }
    }
}

/// Human-readable type name for error messages.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.as_i64().is_some() || n.as_u64().is_some() {
                "integer"
            } else {
                "float"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Input-normalisation pass applied to the source document on entry.
///
/// Sequence-like values from foreign runtimes (tuples) are already arrays
/// once they cross the serde boundary, so the pass reduces to a structural
/// rebuild. It is idempotent and total: `normalize(normalize(v)) ==
/// normalize(v) == v` for every JSON value.
#[must_use]
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(entries) => {
            Value::Object(entries.into_iter().map(|(k, v)| (k, normalize(v))).collect())
        }
        scalar => scalar,
    }
}

/// Returns the object form of a value, resetting it to an empty object first
/// if it holds anything else.
///
/// Used for the context side-tables (`metadata`, `temp_read_only`, `temp`),
/// which are objects by invariant.
pub(crate) fn object_mut(value: &mut Value) -> &mut Map {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just set to an object"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn truthiness_matches_dsl_conventions() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{falsy} should be falsy");
        }
        for truthy in [json!(true), json!(1), json!(-0.5), json!("x"), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&truthy), "{truthy} should be truthy");
        }
    }

    #[test]
    fn value_eq_coerces_numbers_but_not_booleans() {
        assert!(value_eq(&json!(1), &json!(1.0)));
        assert!(value_eq(&json!([1, 2]), &json!([1.0, 2.0])));
        assert!(!value_eq(&json!(true), &json!(1)));
        assert!(!value_eq(&json!(0), &json!(false)));
    }

    #[test]
    fn normalize_is_identity_and_idempotent() {
        let v = json!({"a": [1, [2, {"b": null}]], "c": "x"});
        assert_eq!(normalize(v.clone()), v);
        assert_eq!(normalize(normalize(v.clone())), v);
    }

    #[test]
    fn render_uses_json_literals() {
        assert_eq!(render(&json!("plain")), "plain");
        assert_eq!(render(&json!(null)), "null");
        assert_eq!(render(&json!([1, "a"])), r#"[1,"a"]"#);
    }
}
