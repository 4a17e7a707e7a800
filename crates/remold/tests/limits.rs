//! Tests for the resource budgets: operation counting, loop and recursion
//! caps, value-resolution depth, and the arithmetic/string/regex limits.

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use remold::{Engine, ErrorKind, Limits, LimitError};
use serde_json::{Value, json};

fn engine_with(limits: Limits) -> Engine {
    Engine::builder().limits(limits).build()
}

fn limit_err(engine: &Engine, spec: Value, source: Value, dest: Value) -> LimitError {
    let err = engine.apply(&spec, &source, &dest).expect_err("limit should trip");
    match err.kind() {
        ErrorKind::Limit(limit) => limit.clone(),
        other => panic!("expected a limit error, got {other:?}"),
    }
}

/// The operation budget counts every handler execution and trips before the
/// overrunning handler runs.
#[test]
fn operation_budget_trips() {
    let engine = engine_with(Limits::new().max_operations(10));
    let steps: Vec<Value> = (0..50).map(|i| json!({"op": "set", "path": format!("/k{i}"), "value": 1})).collect();
    let limit = limit_err(&engine, Value::Array(steps), json!({}), json!({}));
    assert!(matches!(limit, LimitError::Operations { limit: 10, .. }));
}

/// An oscillating reference chain exhausts the value-resolution depth.
#[test]
fn oscillating_refs_exhaust_value_depth() {
    let engine = engine_with(Limits::new().value_max_depth(8));
    let limit = limit_err(
        &engine,
        json!({"/x": {"$ref": "/a"}}),
        json!({"a": {"$ref": "/b"}, "b": {"$ref": "/a"}}),
        json!({}),
    );
    assert_eq!(limit, LimitError::ValueDepth { limit: 8 });
}

/// A growing self-referential pointer graph is a depth error, not a hang.
#[test]
fn growing_cycle_is_depth_error() {
    let engine = engine_with(Limits::new().value_max_depth(8));
    let limit = limit_err(
        &engine,
        json!({"/x": {"$ref": "/a"}}),
        json!({"a": {"wrap": {"$ref": "/a"}}}),
        json!({}),
    );
    assert!(matches!(limit, LimitError::ValueDepth { .. }));
}

/// A reference that resolves to itself is a fixed point under the
/// equality-based termination rule: resolution stops with the construct
/// unchanged instead of spinning.
#[test]
fn self_equal_ref_is_a_fixed_point() {
    let result = Engine::new()
        .apply(
            &json!({"/x": {"$ref": "/a"}}),
            &json!({"a": {"$ref": "/a"}}),
            &json!({}),
        )
        .unwrap();
    assert_eq!(result, json!({"x": {"$ref": "/a"}}));
}

/// `while` aborts at the iteration cap.
#[test]
fn while_iteration_cap() {
    let engine = engine_with(Limits::new().max_loop_iterations(5));
    let limit = limit_err(
        &engine,
        json!({"op": "while", "cond": true, "do": [{"/x": 1}]}),
        json!({}),
        json!({}),
    );
    assert_eq!(limit, LimitError::LoopIterations { limit: 5 });
}

/// Oversized foreach inputs abort before any body runs.
#[test]
fn foreach_size_cap() {
    let engine = engine_with(Limits::new().max_foreach_items(3));
    let err = engine
        .apply(
            &json!({"op": "foreach", "in": "/items", "do": {"/ran[]": true}}),
            &json!({"items": [1, 2, 3, 4]}),
            &json!({}),
        )
        .expect_err("foreach should abort");
    assert!(matches!(
        err.kind(),
        ErrorKind::Limit(LimitError::ForeachItems { limit: 3, len: 4 })
    ));
}

/// Unbounded mutual recursion hits the function-depth cap.
#[test]
fn function_recursion_cap() {
    let engine = engine_with(Limits::new().max_function_recursion_depth(5));
    let limit = limit_err(
        &engine,
        json!([
            {"$def": "loop", "body": [{"$func": "loop"}]},
            {"$func": "loop"}
        ]),
        json!({}),
        json!({}),
    );
    assert!(matches!(limit, LimitError::FunctionDepth { limit: 5, .. }));
}

// ---------------------------------------------------------------------------
// arithmetic caps
// ---------------------------------------------------------------------------

#[test]
fn pow_base_cap() {
    let limit = limit_err(
        &Engine::new(),
        json!({"/x": {"$pow": [2000000, 2]}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(limit, LimitError::OperandTooLarge { .. }));
}

#[test]
fn pow_exponent_cap() {
    let limit = limit_err(
        &Engine::new(),
        json!({"/x": {"$pow": [2, 2000]}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(limit, LimitError::OperandTooLarge { .. }));
}

/// Intermediate pow results are capped too.
#[test]
fn pow_intermediate_cap() {
    let limit = limit_err(
        &Engine::new(),
        json!({"/x": {"$pow": [10, 4, 2]}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(limit, LimitError::OperandTooLarge { .. }));
}

#[test]
fn pow_within_limits_succeeds() {
    let result = Engine::new()
        .apply(&json!({"/x": {"$pow": [2, 10]}}), &json!({}), &json!({}))
        .unwrap();
    assert_eq!(result["x"], json!(1024));
}

#[test]
fn mul_string_cap() {
    let engine = engine_with(Limits::new().mul_limits(10, 1e9));
    let limit = limit_err(&engine, json!({"/x": {"$mul": ["abcde", 3]}}), json!({}), json!({}));
    assert!(matches!(limit, LimitError::StringLength { limit: 10, len: 15 }));
}

#[test]
fn add_caps() {
    let engine = engine_with(Limits::new().accumulation_limits(100.0, 5, 100.0));
    let number = limit_err(&engine, json!({"/x": {"$add": [90, 20]}}), json!({}), json!({}));
    assert!(matches!(number, LimitError::NumberOverflow { .. }));

    let string = limit_err(&engine, json!({"/x": {"$add": ["abc", "def"]}}), json!({}), json!({}));
    assert!(matches!(string, LimitError::StringLength { limit: 5, len: 6 }));

    let sub = limit_err(&engine, json!({"/x": {"$sub": [0, 200]}}), json!({}), json!({}));
    assert!(matches!(sub, LimitError::NumberOverflow { .. }));
}

// ---------------------------------------------------------------------------
// string caps
// ---------------------------------------------------------------------------

#[test]
fn split_result_cap() {
    let engine = engine_with(Limits::new().string_limits(3, 10_000_000, 10_000_000));
    let limit = limit_err(
        &engine,
        json!({"/x": {"$str_split": {"string": "a,b,c,d,e", "delimiter": ","}}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(limit, LimitError::SplitResults { limit: 3, .. }));
}

#[test]
fn join_length_cap() {
    let engine = engine_with(Limits::new().string_limits(100_000, 5, 10_000_000));
    let limit = limit_err(
        &engine,
        json!({"/x": {"$str_join": {"array": ["abc", "def"], "separator": "-"}}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(limit, LimitError::StringLength { limit: 5, len: 7 }));
}

#[test]
fn replace_length_cap() {
    let engine = engine_with(Limits::new().string_limits(100_000, 10_000_000, 8));
    let limit = limit_err(
        &engine,
        json!({"/x": {"$str_replace": {"string": "aaa", "old": "a", "new": "xxxx"}}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(limit, LimitError::StringLength { limit: 8, len: 12 }));
}

// ---------------------------------------------------------------------------
// regex budget
// ---------------------------------------------------------------------------

/// A catastrophic backtracking pattern trips the regex budget as a timeout,
/// promptly. The look-ahead keeps the pattern on the backtracking engine.
#[test]
fn catastrophic_regex_times_out() {
    let engine = engine_with(Limits::new().regex_timeout(Duration::from_millis(100)));
    let started = Instant::now();
    let err = engine
        .apply(
            &json!({"/x": {"$regex_match": {
                "pattern": "(?=a)(a+)+$",
                "string": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaX"
            }}}),
            &json!({}),
            &json!({}),
        )
        .expect_err("catastrophic pattern should trip the budget");
    assert!(matches!(
        err.kind(),
        ErrorKind::Limit(LimitError::RegexTimeout { .. })
    ));
    // the budget is cooperative but must fire in the same order of
    // magnitude as the configured timeout
    assert!(started.elapsed() < Duration::from_secs(10));
}
