//! Tests for `$raw`: the wrapper construct and the stop-iteration flag.

use pretty_assertions::assert_eq;
use remold::Engine;
use serde_json::{Value, json};

fn apply(spec: Value, source: Value, dest: Value) -> Value {
    Engine::new().apply(&spec, &source, &dest).expect("apply should succeed")
}

// ---------------------------------------------------------------------------
// wrapper construct
// ---------------------------------------------------------------------------

/// `$raw` returns its payload verbatim — an inner `$ref` is not evaluated.
#[test]
fn raw_shields_constructs() {
    let result = apply(
        json!({"/result": {"$raw": {"$ref": "/data"}}}),
        json!({"data": "value"}),
        json!({}),
    );
    assert_eq!(result, json!({"result": {"$ref": "/data"}}));
}

/// `$raw` shields template strings from substitution.
#[test]
fn raw_shields_templates() {
    let result = apply(
        json!({"/result": {"$raw": "hello ${name}"}}),
        json!({"name": "Alice"}),
        json!({}),
    );
    assert_eq!(result, json!({"result": "hello ${name}"}));
}

#[test]
fn raw_shields_lists() {
    let result = apply(
        json!({"/result": {"$raw": [{"$ref": "/a"}, {"$ref": "/b"}]}}),
        json!({"a": 1, "b": 2}),
        json!({}),
    );
    assert_eq!(result, json!({"result": [{"$ref": "/a"}, {"$ref": "/b"}]}));
}

#[test]
fn raw_passes_scalars_through() {
    assert_eq!(
        apply(json!({"/r": {"$raw": 42}}), json!({}), json!({})),
        json!({"r": 42})
    );
    assert_eq!(
        apply(json!({"/r": {"$raw": null}}), json!({}), json!({})),
        json!({"r": null})
    );
}

/// An outer `$raw` shields an inner `$raw` object from evaluation.
#[test]
fn raw_nests() {
    let result = apply(
        json!({"/result": {"$raw": {"$raw": {"$ref": "/x"}}}}),
        json!({"x": 99}),
        json!({}),
    );
    assert_eq!(result, json!({"result": {"$raw": {"$ref": "/x"}}}));
}

// ---------------------------------------------------------------------------
// $raw: true flag
// ---------------------------------------------------------------------------

/// The flag stops the stabilisation loop after one resolution hop.
#[test]
fn flag_stops_chain_resolution() {
    let result = apply(
        json!({"/result": {"$ref": "/a", "$raw": true}}),
        json!({"a": {"$ref": "/b"}, "b": "final"}),
        json!({}),
    );
    assert_eq!(result, json!({"result": {"$ref": "/b"}}));
}

/// Without the flag the chain resolves fully.
#[test]
fn without_flag_chain_resolves() {
    let result = apply(
        json!({"/result": {"$ref": "/a"}}),
        json!({"a": {"$ref": "/b"}, "b": "final"}),
        json!({}),
    );
    assert_eq!(result, json!({"result": "final"}));
}

/// The flag stops at the first hop regardless of chain depth.
#[test]
fn flag_stops_at_first_hop_of_deep_chain() {
    let result = apply(
        json!({"/result": {"$ref": "/a", "$raw": true}}),
        json!({"a": {"$ref": "/b"}, "b": {"$ref": "/c"}, "c": "deep"}),
        json!({}),
    );
    assert_eq!(result, json!({"result": {"$ref": "/b"}}));
}

#[test]
fn flag_on_arithmetic_and_comparison() {
    assert_eq!(
        apply(json!({"/r": {"$add": [1, 2], "$raw": true}}), json!({}), json!({})),
        json!({"r": 3})
    );
    assert_eq!(
        apply(json!({"/r": {"$eq": [1, 1], "$raw": true}}), json!({}), json!({})),
        json!({"r": true})
    );
}

/// The flag on `$eval` keeps the eval result un-resolved.
#[test]
fn flag_on_eval() {
    let result = apply(
        json!({"/result": {"$eval": [{"/x": {"$raw": {"$ref": "/y"}}}], "$raw": true}}),
        json!({"y": "hello"}),
        json!({}),
    );
    assert_eq!(result, json!({"result": {"x": {"$ref": "/y"}}}));
}

/// The flag on `$func` keeps the function's returned construct literal.
#[test]
fn flag_on_func() {
    let result = apply(
        json!([
            {
                "$def": "get_template",
                "body": [{"/val": {"$raw": {"$ref": "/data"}}}],
                "return": "/val"
            },
            {"/with_flag": {"$func": "get_template", "$raw": true}},
            {"/without_flag": {"$func": "get_template"}}
        ]),
        json!({"data": "real_value"}),
        json!({}),
    );
    assert_eq!(result["with_flag"], json!({"$ref": "/data"}));
    assert_eq!(result["without_flag"], json!("real_value"));
}

/// `$raw` transparency: the wrapper is exact for every payload, including
/// payloads that would otherwise recurse forever.
#[test]
fn raw_is_transparent_for_cyclic_payloads() {
    let cyclic = json!({"$ref": "/self"});
    let result = apply(
        json!({"/r": {"$raw": cyclic}}),
        json!({"self": {"$ref": "/self"}}),
        json!({}),
    );
    assert_eq!(result["r"], json!({"$ref": "/self"}));
}
