//! Tests for loop and function control flow: `$break`, `$continue`,
//! `$return` — including their out-of-context behaviour and their
//! interaction with `try`.

use pretty_assertions::assert_eq;
use remold::{Engine, ErrorKind, SignalKind};
use serde_json::{Value, json};

fn apply(spec: Value, source: Value, dest: Value) -> Value {
    Engine::new().apply(&spec, &source, &dest).expect("apply should succeed")
}

fn apply_err(spec: Value, source: Value, dest: Value) -> remold::Error {
    Engine::new().apply(&spec, &source, &dest).expect_err("apply should fail")
}

// ---------------------------------------------------------------------------
// $break
// ---------------------------------------------------------------------------

/// `$break` stops a foreach before processing all elements.
#[test]
fn break_exits_foreach_early() {
    let result = apply(
        json!({
            "op": "foreach",
            "in": "/items",
            "as": "item",
            "do": [
                {
                    "op": "if",
                    "cond": {"$eq": [{"$ref": "&:/item"}, "stop"]},
                    "then": [{"$break": null}]
                },
                {"/result[]": "&:/item"}
            ]
        }),
        json!({"items": ["a", "b", "stop", "c", "d"]}),
        json!({"result": []}),
    );
    assert_eq!(result, json!({"result": ["a", "b"]}));
}

/// `$break` stops a while loop before its condition turns false.
#[test]
fn break_exits_while_early() {
    let result = apply(
        json!([
            {"/counter": 0},
            {
                "op": "while",
                "cond": {"$lt": [{"$ref": "@:/counter"}, 10]},
                "do": [
                    {
                        "op": "if",
                        "cond": {"$eq": [{"$ref": "@:/counter"}, 3]},
                        "then": [{"$break": null}]
                    },
                    {"/counter": {"$add": [{"$ref": "@:/counter"}, 1]}}
                ]
            }
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"counter": 3}));
}

/// Changes made before `$break` in the same iteration are kept.
#[test]
fn break_preserves_changes_before_break() {
    let result = apply(
        json!({
            "op": "foreach",
            "in": "/items",
            "as": "item",
            "do": [
                {"/last_seen": "&:/item"},
                {
                    "op": "if",
                    "cond": {"$eq": [{"$ref": "&:/item"}, "b"]},
                    "then": [{"$break": null}]
                },
                {"/result[]": "&:/item"}
            ]
        }),
        json!({"items": ["a", "b", "c"]}),
        json!({"result": []}),
    );
    assert_eq!(result["result"], json!(["a"]));
    assert_eq!(result["last_seen"], json!("b"));
}

/// `$break` in a loop with zero iterations does nothing.
#[test]
fn break_in_empty_loop_is_noop() {
    let result = apply(
        json!({
            "op": "foreach",
            "in": "/items",
            "do": [{"$break": null}],
            "skip_empty": false
        }),
        json!({"items": []}),
        json!({"untouched": true}),
    );
    assert_eq!(result, json!({"untouched": true}));
}

/// `$break` inside a try block is not caught by except; it reaches the loop.
#[test]
fn break_propagates_through_try() {
    let result = apply(
        json!({
            "op": "foreach",
            "in": "/items",
            "as": "item",
            "do": [
                {
                    "op": "try",
                    "do": [
                        {
                            "op": "if",
                            "cond": {"$eq": [{"$ref": "&:/item"}, 2]},
                            "then": [{"$break": null}]
                        }
                    ],
                    "except": [{"/caught": true}]
                },
                {"/result[]": "&:/item"}
            ]
        }),
        json!({"items": [1, 2, 3]}),
        json!({"result": []}),
    );
    assert_eq!(result, json!({"result": [1]}));
}

/// `$break` inside try still executes the finally block.
#[test]
fn break_runs_finally() {
    let result = apply(
        json!({
            "op": "foreach",
            "in": "/items",
            "do": [
                {
                    "op": "try",
                    "do": [{"$break": null}],
                    "finally": [{"/cleanup": true}]
                }
            ]
        }),
        json!({"items": [1]}),
        json!({}),
    );
    assert_eq!(result, json!({"cleanup": true}));
}

// ---------------------------------------------------------------------------
// $continue
// ---------------------------------------------------------------------------

/// `$continue` skips the remaining actions of the current iteration.
#[test]
fn continue_skips_rest_of_iteration() {
    let result = apply(
        json!({
            "op": "foreach",
            "in": "/items",
            "as": "item",
            "do": [
                {
                    "op": "if",
                    "cond": {"$eq": [{"$ref": "&:/item"}, "skip"]},
                    "then": [{"$continue": null}]
                },
                {"/result[]": "&:/item"}
            ]
        }),
        json!({"items": ["a", "skip", "b", "skip", "c"]}),
        json!({"result": []}),
    );
    assert_eq!(result, json!({"result": ["a", "b", "c"]}));
}

/// `$continue` re-evaluates the while condition.
#[test]
fn continue_in_while_reevaluates_condition() {
    let result = apply(
        json!([
            {"/counter": 0},
            {"/result": []},
            {
                "op": "while",
                "cond": {"$lt": [{"$ref": "@:/counter"}, 5]},
                "do": [
                    {"/counter": {"$add": [{"$ref": "@:/counter"}, 1]}},
                    {
                        "op": "if",
                        "cond": {"$eq": [{"$ref": "@:/counter"}, 3]},
                        "then": [{"$continue": null}]
                    },
                    {"op": "set", "path": "/result/-", "value": {"$ref": "@:/counter"}}
                ]
            }
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result["result"], json!([1, 2, 4, 5]));
}

/// Filtering with `$continue` over computed conditions.
#[test]
fn continue_keeps_odds() {
    let result = apply(
        json!({
            "op": "foreach",
            "in": "/numbers",
            "as": "n",
            "do": [
                {
                    "op": "if",
                    "cond": {"$eq": [{"$mod": [{"$ref": "&:/n"}, 2]}, 0]},
                    "then": [{"$continue": null}]
                },
                {"/odds[]": "&:/n"}
            ]
        }),
        json!({"numbers": [1, 2, 3, 4, 5, 6, 7]}),
        json!({"odds": []}),
    );
    assert_eq!(result, json!({"odds": [1, 3, 5, 7]}));
}

// ---------------------------------------------------------------------------
// $return
// ---------------------------------------------------------------------------

#[test]
fn return_simple_value() {
    let result = apply(
        json!([
            {"$def": "get_42", "body": [{"$return": 42}]},
            {"/answer": {"$func": "get_42"}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"answer": 42}));
}

#[test]
fn return_null_value() {
    let result = apply(
        json!([
            {"$def": "get_null", "body": [{"$return": null}]},
            {"/answer": {"$func": "get_null"}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"answer": null}));
}

/// `$return` stops execution of the remaining body steps.
#[test]
fn return_stops_body_early() {
    let result = apply(
        json!([
            {
                "$def": "early",
                "body": [
                    {"$return": "first"},
                    {"/side_effect": true}
                ]
            },
            {"/answer": {"$func": "early"}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"answer": "first"}));
}

/// `$return` from inside an if branch exits the function.
#[test]
fn return_from_branches() {
    let result = apply(
        json!([
            {
                "$def": "sign",
                "params": ["x"],
                "body": [
                    {"op": "if", "cond": {"$gt": [{"$ref": "&:/x"}, 0]}, "then": [{"$return": "positive"}]},
                    {"op": "if", "cond": {"$lt": [{"$ref": "&:/x"}, 0]}, "then": [{"$return": "negative"}]},
                    {"$return": "zero"}
                ]
            },
            {"/pos": {"$func": "sign", "args": [5]}},
            {"/neg": {"$func": "sign", "args": [-3]}},
            {"/zer": {"$func": "sign", "args": [0]}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"pos": "positive", "neg": "negative", "zer": "zero"}));
}

/// `$return` inside a foreach exits the entire function, not just the loop.
#[test]
fn return_from_inside_foreach() {
    let result = apply(
        json!([
            {
                "$def": "find_first",
                "params": ["items", "target"],
                "body": [
                    {
                        "op": "foreach",
                        "in": "&:/items",
                        "as": "item",
                        "do": [{
                            "op": "if",
                            "cond": {"$eq": [{"$ref": "&:/item"}, {"$ref": "&:/target"}]},
                            "then": [{"$return": {"$ref": "&:/item"}}]
                        }]
                    },
                    {"$return": null}
                ]
            },
            {"/found": {"$func": "find_first", "args": [["a", "b", "c"], "b"]}},
            {"/missing": {"$func": "find_first", "args": [["a", "b", "c"], "z"]}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result["found"], json!("b"));
    assert_eq!(result["missing"], json!(null));
}

/// The `$return` expression is fully resolved.
#[test]
fn return_expression_is_resolved() {
    let result = apply(
        json!([
            {
                "$def": "double",
                "params": ["x"],
                "body": [{"$return": {"$mul": [{"$ref": "&:/x"}, 2]}}]
            },
            {"/answer": {"$func": "double", "args": [21]}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"answer": 42}));
}

/// `$return` takes precedence over the definition's `return` path.
#[test]
fn return_supersedes_return_path() {
    let result = apply(
        json!([
            {
                "$def": "func",
                "body": [
                    {"/value": 99},
                    {"$return": 42}
                ],
                "return": "/value"
            },
            {"/answer": {"$func": "func"}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"answer": 42}));
}

/// `$return` is intentional control flow; `on_failure` must not fire.
#[test]
fn return_not_caught_by_on_failure() {
    let result = apply(
        json!([
            {
                "$def": "func",
                "body": [{"$return": "ok"}],
                "on_failure": [{"/failed": true}]
            },
            {"/answer": {"$func": "func"}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"answer": "ok"}));
}

/// `$return` inside a try block is not caught by except.
#[test]
fn return_propagates_through_try() {
    let result = apply(
        json!([
            {
                "$def": "func",
                "body": [{
                    "op": "try",
                    "do": [{"$return": "from_try"}],
                    "except": [{"/caught": true}]
                }]
            },
            {"/answer": {"$func": "func"}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"answer": "from_try"}));
}

/// `$return` inside try still executes the finally block.
#[test]
fn return_runs_finally() {
    let result = apply(
        json!([
            {
                "$def": "func",
                "context": "shared",
                "body": [{
                    "op": "try",
                    "do": [{"$return": "value"}],
                    "finally": [{"/cleanup": true}]
                }]
            },
            {"/answer": {"$func": "func"}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result["answer"], json!("value"));
    assert_eq!(result["cleanup"], json!(true));
}

// ---------------------------------------------------------------------------
// combined
// ---------------------------------------------------------------------------

#[test]
fn break_and_continue_in_same_loop() {
    let result = apply(
        json!({
            "op": "foreach",
            "in": "/items",
            "as": "item",
            "do": [
                {"op": "if", "cond": {"$eq": [{"$ref": "&:/item"}, "skip"]}, "then": [{"$continue": null}]},
                {"op": "if", "cond": {"$eq": [{"$ref": "&:/item"}, "stop"]}, "then": [{"$break": null}]},
                {"/result[]": "&:/item"}
            ]
        }),
        json!({"items": ["a", "skip", "b", "stop", "c"]}),
        json!({"result": []}),
    );
    assert_eq!(result, json!({"result": ["a", "b"]}));
}

// ---------------------------------------------------------------------------
// out-of-context usage
// ---------------------------------------------------------------------------

/// A `$break` escaping the whole program surfaces as a stray-signal error
/// with a readable message.
#[test]
fn break_outside_loop_is_stray() {
    let err = apply_err(json!([{"$break": null}]), json!({}), json!({}));
    assert!(matches!(
        err.kind(),
        ErrorKind::StraySignal { signal: SignalKind::Break, .. }
    ));
    assert_eq!(err.to_string(), "$break used outside of a loop");
}

#[test]
fn continue_outside_loop_is_stray() {
    let err = apply_err(json!([{"$continue": null}]), json!({}), json!({}));
    assert_eq!(err.to_string(), "$continue used outside of a loop");
}

/// A stray `$return` carries its resolved payload.
#[test]
fn return_outside_function_carries_value() {
    let err = apply_err(json!([{"$return": 99}]), json!({}), json!({}));
    assert!(matches!(
        err.kind(),
        ErrorKind::StraySignal { signal: SignalKind::Return, .. }
    ));
    assert_eq!(err.signal_value(), Some(&json!(99)));
    assert_eq!(err.to_string(), "$return used outside of a function");
}

/// try/except never swallows control-flow signals, no matter the nesting.
#[test]
fn nested_try_does_not_catch_signals() {
    let err = apply_err(
        json!([
            {
                "op": "try",
                "do": [{
                    "op": "try",
                    "do": [{"$return": "deep"}],
                    "except": [{"/inner_caught": true}]
                }],
                "except": [{"/outer_caught": true}]
            }
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(err.signal_value(), Some(&json!("deep")));
}
