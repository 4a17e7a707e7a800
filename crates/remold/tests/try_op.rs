//! Tests for the `try` operation: except, finally, and error info bindings.

use pretty_assertions::assert_eq;
use remold::{Engine, ErrorKind};
use serde_json::{Value, json};

fn apply(spec: Value, source: Value, dest: Value) -> Value {
    Engine::new().apply(&spec, &source, &dest).expect("apply should succeed")
}

fn apply_err(spec: Value, source: Value, dest: Value) -> remold::Error {
    Engine::new().apply(&spec, &source, &dest).expect_err("apply should fail")
}

#[test]
fn try_without_error_runs_normally() {
    let result = apply(
        json!({
            "op": "try",
            "do": [
                {"/value": 42},
                {"/status": "success"}
            ]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"value": 42, "status": "success"}));
}

/// An error in `do` stops it and runs `except`; effects before the error
/// are deliberately kept.
#[test]
fn try_catches_error_and_keeps_partial_effects() {
    let result = apply(
        json!({
            "op": "try",
            "do": [
                {"/value": 42},
                {"$raise": "Something went wrong"},
                {"/not_reached": true}
            ],
            "except": [{"/error_handled": true}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"value": 42, "error_handled": true}));
}

#[test]
fn try_without_except_reraises() {
    let err = apply_err(
        json!({"op": "try", "do": [{"$raise": "Test error"}]}),
        json!({}),
        json!({}),
    );
    assert_eq!(err.to_string(), "Test error");
}

/// `except` sees the error message and kind through the `&:` namespace.
#[test]
fn except_reads_error_info() {
    let result = apply(
        json!({
            "op": "try",
            "do": [{"$raise": "boom"}],
            "except": [
                {"/caught": "${&:/_error_message}"},
                {"/etype": "${&:/_error_type}"}
            ],
            "finally": [{"/done": true}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"caught": "boom", "etype": "DomainError", "done": true}));
}

/// The error bindings disappear again after `except`.
#[test]
fn error_info_is_scoped_to_except() {
    let result = apply(
        json!([
            {
                "op": "try",
                "do": [{"$raise": "boom"}],
                "except": [{"/in_except": {"$exists": "&:/_error_message"}}]
            },
            {"/after": {"$exists": "&:/_error_message"}}
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"in_except": true, "after": false}));
}

#[test]
fn finally_runs_without_error() {
    let result = apply(
        json!({
            "op": "try",
            "do": [{"/value": 42}],
            "finally": [{"/cleanup": true}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"value": 42, "cleanup": true}));
}

#[test]
fn finally_runs_after_except() {
    let result = apply(
        json!({
            "op": "try",
            "do": [{"/value": 42}, {"$raise": "error"}],
            "except": [{"/error_caught": true}],
            "finally": [{"/cleanup": true}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"value": 42, "error_caught": true, "cleanup": true}));
}

#[test]
fn finally_without_except_still_reraises() {
    let err = apply_err(
        json!({
            "op": "try",
            "do": [{"/before": 1}, {"$raise": "Test error"}],
            "finally": [{"/cleanup": true}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(err.to_string(), "Test error");
}

#[test]
fn nested_try_blocks() {
    let result = apply(
        json!({
            "op": "try",
            "do": [
                {"/outer": 1},
                {
                    "op": "try",
                    "do": [{"/inner": 2}, {"$raise": "Inner error"}],
                    "except": [{"/inner_error_caught": true}]
                },
                {"/after_inner": 3}
            ]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(
        result,
        json!({"outer": 1, "inner": 2, "inner_error_caught": true, "after_inner": 3})
    );
}

/// Pointer errors are just as catchable as raised ones.
#[test]
fn try_catches_missing_path_errors() {
    let result = apply(
        json!({
            "op": "try",
            "do": [{"op": "copy", "from": "/nonexistent", "path": "/result"}],
            "except": [{"/error": "Path not found"}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(result, json!({"error": "Path not found"}));
}

/// `except` sees the destination exactly as it was at the failure point.
#[test]
fn except_sees_dest_at_failure_point() {
    let result = apply(
        json!({
            "op": "try",
            "do": [
                {"/step1": "done"},
                {"/step2": "done"},
                {"$raise": "Error at step 3"},
                {"/step3": "not reached"}
            ],
            "except": [{"/steps_completed": ["${@:/step1}", "${@:/step2}"]}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(
        result,
        json!({"step1": "done", "step2": "done", "steps_completed": ["done", "done"]})
    );
}

#[test]
fn error_in_except_reraises() {
    let err = apply_err(
        json!({
            "op": "try",
            "do": [{"$raise": "Original error"}],
            "except": [
                {"/handled": true},
                {"$raise": "Error in except"}
            ]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(err.to_string(), "Error in except");
}

/// An error raised in `finally` supersedes whatever happened before.
#[test]
fn error_in_finally_supersedes() {
    let err = apply_err(
        json!({
            "op": "try",
            "do": [{"$raise": "Original error"}],
            "except": [{"/caught": true}],
            "finally": [{"$raise": "Finally error"}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(err.to_string(), "Finally error");
}

/// Errors from functions called inside `do` are caught like any other.
#[test]
fn try_catches_function_errors() {
    let result = apply(
        json!([
            {"$def": "failingFunc", "body": [{"$raise": "Function failed"}]},
            {
                "op": "try",
                "do": [{"/result": {"$func": "failingFunc"}}],
                "except": [{"/func_error_caught": true}]
            }
        ]),
        json!({}),
        json!({}),
    );
    assert_eq!(result["func_error_caught"], json!(true));
}

#[test]
fn try_with_empty_do_block() {
    let result = apply(json!({"op": "try", "do": []}), json!({}), json!({}));
    assert_eq!(result, json!({}));
}

/// Validation with cast and conditional raise, the way specs use try in
/// practice.
#[test]
fn try_validation_pattern() {
    let result = apply(
        json!({
            "op": "try",
            "do": [
                {"/age": {"$cast": {"value": "${/user_input}", "type": "int"}}},
                {
                    "op": "if",
                    "cond": {"$lt": [{"$ref": "@:/age"}, 0]},
                    "then": [{"$raise": "Age cannot be negative"}]
                },
                {"/valid": true}
            ],
            "except": [
                {"/valid": false},
                {"/error_msg": "${&:/_error_message}"}
            ]
        }),
        json!({"user_input": "-5"}),
        json!({}),
    );
    assert_eq!(result["valid"], json!(false));
    assert_eq!(result["error_msg"], json!("Age cannot be negative"));
}

/// The `_error_type` binding distinguishes error kinds.
#[test]
fn error_type_names_the_kind() {
    let result = apply(
        json!({
            "op": "try",
            "do": [{"op": "assert", "path": "/missing"}],
            "except": [{"/etype": "${&:/_error_type}"}]
        }),
        json!({}),
        json!({}),
    );
    assert_eq!(result["etype"], json!("AssertionError"));

    let limit_err = apply_err(json!({"$raise": 5}), json!({}), json!({}));
    assert!(matches!(limit_err.kind(), ErrorKind::Domain(_)));
}
