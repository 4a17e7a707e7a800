//! JSON-Pointer resolver.
//!
//! Self-contained path addressing over raw [`Value`] trees with full support
//! for:
//!
//! * RFC 6901 JSON Pointer (`/a/b/0`)
//! * `..` parent reference
//! * Slice notation `[start:end]` on the final segment (arrays and strings)
//! * Custom escape tokens (`~0` `~1` `~2` `~3` for `~` `/` `$` `.`)
//! * `-` for array append in `set`
//! * Root references (`""`, `"/"`, `"."`) that work on scalars too
//!
//! Prefix namespaces (`@:`, `&:`, `!:`, `_:`) are *not* handled here; that is
//! the [`processor`](crate::processor) layer's job. The resolver only ever
//! sees a bare path and the root it should walk.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{
    error::PointerError,
    value::{Map, type_name},
};

static SLICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)\[(-?\d*):(-?\d*)\]$").expect("slice pattern is valid"));

/// Result alias for resolver operations.
pub type PointerResult<T> = Result<T, PointerError>;

/// Self-contained JSON-Pointer implementation.
///
/// All operations are value-based: `set` and `delete` mutate the passed root
/// in place. The resolver is stateless; it exists as a struct so that the
/// engine can hold a swappable addressing implementation in one place.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointerResolver;

impl PointerResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Reads the value at `path`, supporting slices.
    ///
    /// ```
    /// use remold::PointerResolver;
    /// use serde_json::json;
    ///
    /// let r = PointerResolver::new();
    /// assert_eq!(r.get("/a/b", &json!({"a": {"b": 42}})).unwrap(), json!(42));
    /// assert_eq!(r.get("/arr[1:]", &json!({"arr": [1, 2, 3]})).unwrap(), json!([2, 3]));
    /// assert_eq!(r.get(".", &json!(42)).unwrap(), json!(42));
    /// ```
    pub fn get(&self, path: &str, data: &Value) -> PointerResult<Value> {
        if let Some(caps) = SLICE_RE.captures(path) {
            let base = &caps[1];
            let seq = self.walk(base, data)?;
            let start = parse_slice_bound(caps.get(2).map_or("", |m| m.as_str()));
            let end = parse_slice_bound(caps.get(3).map_or("", |m| m.as_str()));
            return slice_value(base, seq, start, end);
        }
        self.walk(path, data).cloned()
    }

    /// Borrow-based read without slice support; used internally by `set`.
    fn walk<'a>(&self, path: &str, data: &'a Value) -> PointerResult<&'a Value> {
        if is_root(path) {
            return Ok(data);
        }
        let mut parents: Vec<&Value> = Vec::new();
        let mut cur = data;
        for raw in path.trim_start_matches('/').split('/') {
            if raw == ".." {
                cur = parents.pop().unwrap_or(data);
                continue;
            }
            let token = decode_token(raw);
            let next = index_value(path, cur, &token)?;
            parents.push(cur);
            cur = next;
        }
        Ok(cur)
    }

    /// Mutable variant of [`Self::walk`]; `..` is not supported on mutable
    /// paths (parent links cannot be held across a mutable borrow), callers
    /// collapse it up front via [`collapse_parents`].
    pub(crate) fn get_mut<'a>(&self, path: &str, data: &'a mut Value) -> PointerResult<&'a mut Value> {
        if is_root(path) {
            return Ok(data);
        }
        let mut cur = data;
        for raw in collapse_parents(path) {
            let token = decode_token(&raw);
            cur = index_value_mut(path, cur, &token)?;
        }
        Ok(cur)
    }

    /// Writes `value` at `path`, returning nothing; the root is mutated in
    /// place.
    ///
    /// Special cases:
    ///
    /// * root path (`""`/`"/"`/`"."`) replaces the entire root with `value`
    /// * `-` leaf appends to the parent array
    /// * numeric leaf beyond an array's length auto-grows it with nulls
    /// * missing intermediate object keys are auto-created as empty objects
    pub fn set(&self, path: &str, data: &mut Value, value: Value) -> PointerResult<()> {
        if is_root(path) {
            *data = value;
            return Ok(());
        }

        let (parent, leaf) = self.ensure_parent(data, path, true)?;
        if leaf == "-" {
            match parent {
                Value::Array(items) => items.push(value),
                other => {
                    return Err(PointerError::TypeMismatch {
                        path: path.to_owned(),
                        expected: "array",
                        found: type_name(other),
                    });
                }
            }
            return Ok(());
        }

        match parent {
            Value::Array(items) => {
                let idx = parse_index(path, &leaf)?;
                let idx = match absolute_index(idx, items.len()) {
                    Some(abs) => abs,
                    // non-negative indices beyond the end auto-grow the array
                    None if idx >= 0 => idx as usize,
                    None => {
                        return Err(PointerError::OutOfRange {
                            path: path.to_owned(),
                            index: idx,
                        });
                    }
                };
                while idx >= items.len() {
                    items.push(Value::Null);
                }
                items[idx] = value;
            }
            Value::Object(map) => {
                map.insert(leaf, value);
            }
            other => {
                return Err(PointerError::TypeMismatch {
                    path: path.to_owned(),
                    expected: "container",
                    found: type_name(other),
                });
            }
        }
        Ok(())
    }

    /// Removes the value at `path`. Works on both objects (by key) and
    /// arrays (by integer index). The `-` leaf is rejected.
    pub fn delete(&self, path: &str, data: &mut Value) -> PointerResult<()> {
        let (parent, leaf) = self.ensure_parent(data, path, false)?;
        match parent {
            Value::Array(items) => {
                let idx = parse_index(path, &leaf)?;
                let abs = absolute_index(idx, items.len()).ok_or(PointerError::OutOfRange {
                    path: path.to_owned(),
                    index: idx,
                })?;
                items.remove(abs);
            }
            Value::Object(map) => {
                // shift_remove keeps the insertion order of the remaining keys
                if map.shift_remove(&leaf).is_none() {
                    return Err(PointerError::NotFound {
                        path: path.to_owned(),
                        segment: leaf,
                    });
                }
            }
            other => {
                return Err(PointerError::TypeMismatch {
                    path: path.to_owned(),
                    expected: "container",
                    found: type_name(other),
                });
            }
        }
        Ok(())
    }

    /// Checks whether `path` resolves to a value.
    #[must_use]
    pub fn exists(&self, path: &str, data: &Value) -> bool {
        self.get(path, data).is_ok()
    }

    /// Returns `(parent, leaf_token)` for `path`, optionally creating missing
    /// intermediate nodes as empty objects (or growing arrays with objects).
    fn ensure_parent<'a>(
        &self,
        data: &'a mut Value,
        path: &str,
        create: bool,
    ) -> PointerResult<(&'a mut Value, String)> {
        let parts = collapse_parents(path);
        let Some((leaf_raw, intermediate)) = parts.split_last() else {
            return Ok((data, String::new()));
        };

        let mut cur = data;
        for raw in intermediate {
            let token = decode_token(raw);
            match cur {
                Value::Array(items) => {
                    let idx = parse_index(path, &token)?;
                    let idx = match absolute_index(idx, items.len()) {
                        Some(i) => i,
                        None if create && idx >= 0 => idx as usize,
                        None => {
                            return Err(PointerError::OutOfRange {
                                path: path.to_owned(),
                                index: idx,
                            });
                        }
                    };
                    if idx >= items.len() {
                        if !create {
                            return Err(PointerError::OutOfRange {
                                path: path.to_owned(),
                                index: idx as i64,
                            });
                        }
                        while idx >= items.len() {
                            items.push(Value::Object(Map::new()));
                        }
                    }
                    cur = &mut items[idx];
                }
                Value::Object(map) => {
                    if !map.contains_key(&token) {
                        if !create {
                            return Err(PointerError::NotFound {
                                path: path.to_owned(),
                                segment: token,
                            });
                        }
                        map.insert(token.clone(), Value::Object(Map::new()));
                    }
                    cur = map
                        .get_mut(&token)
                        .expect("key was just checked or inserted");
                }
                other => {
                    return Err(PointerError::TypeMismatch {
                        path: path.to_owned(),
                        expected: "container",
                        found: type_name(other),
                    });
                }
            }
        }

        Ok((cur, decode_token(leaf_raw)))
    }
}

/// Returns true for the three root spellings.
fn is_root(path: &str) -> bool {
    matches!(path, "" | "/" | ".")
}

/// Decodes one pointer token: RFC 6901 escapes plus the `$`/`.` extensions.
fn decode_token(token: &str) -> String {
    token
        .replace("~1", "/")
        .replace("~2", "$")
        .replace("~3", ".")
        .replace("~0", "~")
}

/// Splits a path into segments, resolving `..` by dropping the previous
/// segment (or staying at the root when there is none).
fn collapse_parents(path: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for raw in path.trim_start_matches('/').split('/') {
        if raw == ".." {
            parts.pop();
        } else {
            parts.push(raw.to_owned());
        }
    }
    parts
}

fn parse_index(path: &str, token: &str) -> PointerResult<i64> {
    token.parse::<i64>().map_err(|_| PointerError::BadSegment {
        path: path.to_owned(),
        segment: token.to_owned(),
    })
}

/// Maps a possibly-negative index onto `0..len`. `None` when out of range.
fn absolute_index(index: i64, len: usize) -> Option<usize> {
    if index < 0 {
        let from_end = index.unsigned_abs() as usize;
        len.checked_sub(from_end)
    } else {
        let idx = index as usize;
        (idx < len).then_some(idx)
    }
}

fn index_value<'a>(path: &str, cur: &'a Value, token: &str) -> PointerResult<&'a Value> {
    match cur {
        Value::Array(items) => {
            let idx = parse_index(path, token)?;
            let abs = absolute_index(idx, items.len()).ok_or(PointerError::OutOfRange {
                path: path.to_owned(),
                index: idx,
            })?;
            Ok(&items[abs])
        }
        Value::Object(map) => map.get(token).ok_or_else(|| PointerError::NotFound {
            path: path.to_owned(),
            segment: token.to_owned(),
        }),
        other => Err(PointerError::TypeMismatch {
            path: path.to_owned(),
            expected: "container",
            found: type_name(other),
        }),
    }
}

fn index_value_mut<'a>(path: &str, cur: &'a mut Value, token: &str) -> PointerResult<&'a mut Value> {
    match cur {
        Value::Array(items) => {
            let idx = parse_index(path, token)?;
            let abs = absolute_index(idx, items.len()).ok_or(PointerError::OutOfRange {
                path: path.to_owned(),
                index: idx,
            })?;
            Ok(&mut items[abs])
        }
        Value::Object(map) => map.get_mut(token).ok_or_else(|| PointerError::NotFound {
            path: path.to_owned(),
            segment: token.to_owned(),
        }),
        other => Err(PointerError::TypeMismatch {
            path: path.to_owned(),
            expected: "container",
            found: type_name(other),
        }),
    }
}

fn parse_slice_bound(text: &str) -> Option<i64> {
    if text.is_empty() { None } else { text.parse().ok() }
}

/// Applies a half-open slice with negative-index support to an array or
/// string.
fn slice_value(path: &str, seq: &Value, start: Option<i64>, end: Option<i64>) -> PointerResult<Value> {
    fn bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
        let clamp = |b: i64| -> usize {
            if b < 0 {
                len.saturating_sub(b.unsigned_abs() as usize)
            } else {
                (b as usize).min(len)
            }
        };
        let s = start.map_or(0, clamp);
        let e = end.map_or(len, clamp);
        (s, e.max(s))
    }

    match seq {
        Value::Array(items) => {
            let (s, e) = bounds(items.len(), start, end);
            Ok(Value::Array(items[s..e].to_vec()))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = bounds(chars.len(), start, end);
            Ok(Value::String(chars[s..e].iter().collect()))
        }
        other => Err(PointerError::TypeMismatch {
            path: path.to_owned(),
            expected: "array",
            found: type_name(other),
        }),
    }
}
