//! Tests for the `$str_*` and `$regex_*` construct families.

use pretty_assertions::assert_eq;
use remold::{Engine, ErrorKind};
use serde_json::{Value, json};

fn apply(spec: Value, source: Value, dest: Value) -> Value {
    Engine::new().apply(&spec, &source, &dest).expect("apply should succeed")
}

fn apply_err(spec: Value, source: Value, dest: Value) -> remold::Error {
    Engine::new().apply(&spec, &source, &dest).expect_err("apply should fail")
}

fn eval_value(construct: Value) -> Value {
    let result = apply(json!({"/out": construct}), json!({}), json!({}));
    result["out"].clone()
}

// ---------------------------------------------------------------------------
// strings
// ---------------------------------------------------------------------------

#[test]
fn str_split() {
    assert_eq!(
        eval_value(json!({"$str_split": {"string": "a,b,c", "delimiter": ","}})),
        json!(["a", "b", "c"])
    );
    assert_eq!(
        eval_value(json!({"$str_split": {"string": "a:b:c", "delimiter": ":", "maxsplit": 1}})),
        json!(["a", "b:c"])
    );
}

#[test]
fn str_split_rejects_empty_delimiter() {
    let err = apply_err(
        json!({"/x": {"$str_split": {"string": "abc", "delimiter": ""}}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(err.kind(), ErrorKind::Shape(_)));
}

#[test]
fn str_join() {
    assert_eq!(
        eval_value(json!({"$str_join": {"array": ["a", "b", "c"], "separator": "-"}})),
        json!("a-b-c")
    );
    assert_eq!(
        eval_value(json!({"$str_join": {"array": [1, 2, 3], "separator": ","}})),
        json!("1,2,3")
    );
    assert_eq!(eval_value(json!({"$str_join": {"array": []}})), json!(""));
}

#[test]
fn str_slice() {
    assert_eq!(
        eval_value(json!({"$str_slice": {"string": "hello", "start": 1, "end": 4}})),
        json!("ell")
    );
    assert_eq!(
        eval_value(json!({"$str_slice": {"string": "hello", "start": -3}})),
        json!("llo")
    );
    assert_eq!(
        eval_value(json!({"$str_slice": {"string": "hello", "end": 3}})),
        json!("hel")
    );
}

#[test]
fn str_case() {
    assert_eq!(eval_value(json!({"$str_upper": "hello"})), json!("HELLO"));
    assert_eq!(eval_value(json!({"$str_lower": "HELLO"})), json!("hello"));
}

#[test]
fn str_strip_family() {
    assert_eq!(eval_value(json!({"$str_strip": "  hello  "})), json!("hello"));
    assert_eq!(
        eval_value(json!({"$str_strip": {"string": "***hello***", "chars": "*"}})),
        json!("hello")
    );
    assert_eq!(eval_value(json!({"$str_lstrip": "  hello  "})), json!("hello  "));
    assert_eq!(
        eval_value(json!({"$str_rstrip": {"string": "hello___", "chars": "_"}})),
        json!("hello")
    );
}

#[test]
fn str_replace() {
    assert_eq!(
        eval_value(json!({"$str_replace": {"string": "hello", "old": "ll", "new": "rr"}})),
        json!("herro")
    );
    assert_eq!(
        eval_value(json!({"$str_replace": {"string": "aaa", "old": "a", "new": "b", "count": 2}})),
        json!("bba")
    );
}

#[test]
fn str_predicates() {
    assert_eq!(
        eval_value(json!({"$str_contains": {"string": "hello world", "substring": "world"}})),
        json!(true)
    );
    assert_eq!(
        eval_value(json!({"$str_startswith": {"string": "hello", "prefix": "he"}})),
        json!(true)
    );
    assert_eq!(
        eval_value(json!({"$str_endswith": {"string": "hello", "suffix": "lo"}})),
        json!(true)
    );
    assert_eq!(
        eval_value(json!({"$str_contains": {"string": "hello", "substring": "x"}})),
        json!(false)
    );
}

#[test]
fn str_operand_type_errors() {
    let err = apply_err(json!({"/x": {"$str_upper": 42}}), json!({}), json!({}));
    assert!(matches!(err.kind(), ErrorKind::Shape(_)));
}

// ---------------------------------------------------------------------------
// regex
// ---------------------------------------------------------------------------

#[test]
fn regex_match_is_anchored() {
    assert_eq!(
        eval_value(json!({"$regex_match": {"pattern": r"\d+", "string": "123"}})),
        json!(true)
    );
    assert_eq!(
        eval_value(json!({"$regex_match": {"pattern": r"\d+", "string": "123abc"}})),
        json!(false)
    );
}

/// Flag integers are honoured (2 = case-insensitive).
#[test]
fn regex_match_with_ignorecase_flag() {
    assert_eq!(
        eval_value(json!({"$regex_match": {"pattern": "^hello$", "string": "HELLO", "flags": 2}})),
        json!(true)
    );
}

#[test]
fn regex_search() {
    assert_eq!(
        eval_value(json!({"$regex_search": {"pattern": r"\d+", "string": "abc123def"}})),
        json!("123")
    );
    assert_eq!(
        eval_value(json!({"$regex_search": {"pattern": r"\d+", "string": "abc"}})),
        json!(null)
    );
}

#[test]
fn regex_findall() {
    assert_eq!(
        eval_value(json!({"$regex_findall": {"pattern": r"\d+", "string": "a1b2c3"}})),
        json!(["1", "2", "3"])
    );
    assert_eq!(
        eval_value(json!({"$regex_findall": {"pattern": r"\d+", "string": "abc"}})),
        json!([])
    );
}

#[test]
fn regex_replace() {
    assert_eq!(
        eval_value(json!({"$regex_replace": {"pattern": r"\d+", "replacement": "X", "string": "a1b2c3"}})),
        json!("aXbXcX")
    );
    assert_eq!(
        eval_value(json!({
            "$regex_replace": {"pattern": r"\d+", "replacement": "X", "string": "a1b2c3", "count": 2}
        })),
        json!("aXbXc3")
    );
}

#[test]
fn regex_groups() {
    assert_eq!(
        eval_value(json!({"$regex_groups": {"pattern": r"(\w+)@(\w+)", "string": "user@domain"}})),
        json!(["user", "domain"])
    );
    assert_eq!(
        eval_value(json!({"$regex_groups": {"pattern": r"\d+", "string": "abc"}})),
        json!([])
    );
}

/// Flags outside the whitelist are rejected before compilation.
#[test]
fn regex_disallowed_flags_rejected() {
    let err = apply_err(
        json!({"/x": {"$regex_match": {"pattern": "a", "string": "a", "flags": 1024}}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(err.kind(), ErrorKind::Shape(_)));
}

#[test]
fn regex_invalid_pattern_fails() {
    let err = apply_err(
        json!({"/x": {"$regex_search": {"pattern": "(unclosed", "string": "x"}}}),
        json!({}),
        json!({}),
    );
    assert!(matches!(err.kind(), ErrorKind::Shape(_)));
}

/// Backreferences work — the backtracking engine carries the full wire
/// syntax.
#[test]
fn regex_backreferences_supported() {
    assert_eq!(
        eval_value(json!({"$regex_search": {"pattern": r"(\w)\1", "string": "abccd"}})),
        json!("cc")
    );
}
