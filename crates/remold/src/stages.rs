//! Shorthand expansion — turns compact step syntax into explicit op objects.
//!
//! Expansion runs as three stage processors in the main pipeline's stage
//! tree, in descending priority:
//!
//! * [`AssertShorthand`] (100) — peels `~assert` / `~assertD` entries
//! * [`DeleteShorthand`] (50) — peels `~delete` entries
//! * [`AssignShorthand`] (0) — rewrites the remaining pointer-keyed entries
//!   of any `op`-less object into `copy` (pointer-like string values) or
//!   `set` steps; a `[]` key suffix rewrites to `/-` append. Objects left
//!   empty by earlier peeling are dropped.
//!
//! Each processor extracts only its own keys and leaves the rest of the
//! object in place for the processors below it, so one shorthand object can
//! mix all three families:
//!
//! ```text
//! {"~assert": "/required", "~delete": "/tmp", "/result": "/value"}
//!   → [{"op": "assert", "path": "/required"},
//!      {"op": "delete", "path": "/tmp"},
//!      {"op": "copy", "from": "/value", "path": "/result", "ignore_missing": true}]
//! ```

use serde_json::{Value, json};

use crate::{
    context::ExecutionContext,
    error::Error,
    processor::is_pointer_like,
    registry::{StageMatcher, StageNode, StageProcessor, StageRegistry},
    value::Map,
};

/// True for objects that still need shorthand handling: no `op` key.
fn is_shorthand(step: &Value) -> bool {
    step.as_object().is_some_and(|map| !map.contains_key("op"))
}

/// Matches when any step is an `op`-less object carrying one of `keys`.
struct KeyedShorthandMatcher {
    keys: &'static [&'static str],
}

impl StageMatcher for KeyedShorthandMatcher {
    fn matches(&self, steps: &[Value], _ctx: &ExecutionContext) -> bool {
        steps.iter().any(|step| {
            is_shorthand(step)
                && step
                    .as_object()
                    .is_some_and(|map| self.keys.iter().any(|key| map.contains_key(*key)))
        })
    }
}

/// Matches when any step is an `op`-less object at all.
struct AnyShorthandMatcher;

impl StageMatcher for AnyShorthandMatcher {
    fn matches(&self, steps: &[Value], _ctx: &ExecutionContext) -> bool {
        steps.iter().any(is_shorthand)
    }
}

/// Shared peeling walk: for every shorthand object, `expand` maps each of
/// its target keys into explicit steps; untouched entries stay behind as a
/// trailing shorthand object.
fn peel(
    steps: Vec<Value>,
    mut expand: impl FnMut(&str, &Value, &mut Vec<Value>) -> bool,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(steps.len());
    for step in steps {
        let shorthand = is_shorthand(&step);
        match step {
            Value::Object(entries) if shorthand => {
                let mut remaining = Map::new();
                for (key, value) in entries {
                    if !expand(&key, &value, &mut out) {
                        remaining.insert(key, value);
                    }
                }
                if !remaining.is_empty() {
                    out.push(Value::Object(remaining));
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// `~assert` / `~assertD` expansion.
///
/// * object value — one `{op, path, equals}` per entry
/// * array value — one `{op, path}` per element
/// * scalar value — a single `{op, path}`
pub struct AssertShorthand;

impl StageProcessor for AssertShorthand {
    fn apply(&self, steps: Vec<Value>, _ctx: &mut ExecutionContext) -> Result<Vec<Value>, Error> {
        Ok(peel(steps, |key, value, out| {
            let op = match key {
                "~assert" => "assert",
                "~assertD" => "assertD",
                _ => return false,
            };
            match value {
                Value::Object(checks) => {
                    for (path, expected) in checks {
                        out.push(json!({"op": op, "path": path, "equals": expected}));
                    }
                }
                Value::Array(paths) => {
                    for path in paths {
                        out.push(json!({"op": op, "path": path}));
                    }
                }
                path => out.push(json!({"op": op, "path": path})),
            }
            true
        }))
    }
}

/// `~delete` expansion: one `delete` op per path (single path or list).
pub struct DeleteShorthand;

impl StageProcessor for DeleteShorthand {
    fn apply(&self, steps: Vec<Value>, _ctx: &mut ExecutionContext) -> Result<Vec<Value>, Error> {
        Ok(peel(steps, |key, value, out| {
            if key != "~delete" {
                return false;
            }
            match value {
                Value::Array(paths) => {
                    for path in paths {
                        out.push(json!({"op": "delete", "path": path}));
                    }
                }
                path => out.push(json!({"op": "delete", "path": path})),
            }
            true
        }))
    }
}

/// Fallback assignment expansion for the remaining pointer-keyed entries.
///
/// * key ending in `[]` — append (path rewritten to `…/-`)
/// * pointer-like string value (`/…`, `@:/…`, `&:/…`, `!:/…`, `_:/…`) —
///   `copy` with `ignore_missing`
/// * anything else — `set` with the literal value
pub struct AssignShorthand;

impl StageProcessor for AssignShorthand {
    fn apply(&self, steps: Vec<Value>, _ctx: &mut ExecutionContext) -> Result<Vec<Value>, Error> {
        Ok(peel(steps, |key, value, out| {
            // only pointer-keyed entries are assignments; marker-keyed
            // objects ($def, $func, …) pass through to action dispatch
            if !is_pointer_like(key) {
                return false;
            }
            let (append, base) = match key.strip_suffix("[]") {
                Some(base) => (true, base),
                None => (false, key),
            };
            let dst = if append { format!("{base}/-") } else { base.to_owned() };

            match value {
                Value::String(text) if is_pointer_like(text) => {
                    out.push(json!({
                        "op": "copy", "from": text, "path": dst, "ignore_missing": true
                    }));
                }
                other => out.push(json!({"op": "set", "path": dst, "value": other})),
            }
            true
        }))
    }
}

/// The standard shorthand stage tree, ready to mount as a main pipeline's
/// stages.
#[must_use]
pub fn default_shorthand_stages() -> StageRegistry {
    let mut registry = StageRegistry::new();

    registry.register(StageNode {
        name: "assert_shorthand",
        priority: 100,
        matcher: Some(Box::new(KeyedShorthandMatcher {
            keys: &["~assert", "~assertD"],
        })),
        processor: Some(Box::new(AssertShorthand)),
        children: None,
    });

    registry.register(StageNode {
        name: "delete_shorthand",
        priority: 50,
        matcher: Some(Box::new(KeyedShorthandMatcher { keys: &["~delete"] })),
        processor: Some(Box::new(DeleteShorthand)),
        children: None,
    });

    registry.register(StageNode {
        name: "assign_shorthand",
        priority: 0,
        matcher: Some(Box::new(AnyShorthandMatcher)),
        processor: Some(Box::new(AssignShorthand)),
        children: None,
    });

    registry
}
