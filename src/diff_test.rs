use serde::{Deserialize, Serialize};
use serde_json::json;

use super::*;

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

// =============================================================
// deep_diff
// =============================================================

#[test]
fn identical_values_produce_empty_delta() {
    let a = obj(json!({"x": 1, "nested": {"a": [1, 2], "b": null}, "label": "T1"}));
    assert!(deep_diff(&a, &a.clone()).is_empty());
}

#[test]
fn added_changed_and_removed_keys_are_reported() {
    let a = obj(json!({"x": 1, "y": 2, "gone": true}));
    let b = obj(json!({"x": 1, "y": 3, "new": "hi"}));
    let delta = deep_diff(&a, &b);

    assert_eq!(delta.len(), 3);
    assert_eq!(delta.get("y"), Some(&Change::Set(json!(3))));
    assert_eq!(delta.get("new"), Some(&Change::Set(json!("hi"))));
    assert_eq!(delta.get("gone"), Some(&Change::Absent));
    assert!(delta.get("x").is_none());
}

#[test]
fn nested_objects_recurse_and_drop_empty_results() {
    let a = obj(json!({"style": {"fill": "red", "stroke": "black"}, "meta": {"v": 1}}));
    let b = obj(json!({"style": {"fill": "blue", "stroke": "black"}, "meta": {"v": 1}}));
    let delta = deep_diff(&a, &b);

    assert!(delta.get("meta").is_none());
    let Some(Change::Nested(style)) = delta.get("style") else {
        panic!("expected nested change");
    };
    assert_eq!(style.get("fill"), Some(&Change::Set(json!("blue"))));
    assert!(style.get("stroke").is_none());
}

#[test]
fn leaves_compare_loosely() {
    let a = obj(json!({"seats": 8, "flag": true, "ratio": 1.0}));
    let b = obj(json!({"seats": "8", "flag": 1, "ratio": 1}));
    assert!(deep_diff(&a, &b).is_empty());
}

#[test]
fn arrays_are_replaced_wholesale() {
    let a = obj(json!({"tags": [1, 2, 3]}));
    let b = obj(json!({"tags": [1, 3]}));
    assert_eq!(deep_diff(&a, &b).get("tags"), Some(&Change::Set(json!([1, 3]))));
}

#[test]
fn object_replaced_by_scalar_is_a_set() {
    let a = obj(json!({"props": {"a": 1}}));
    let b = obj(json!({"props": 5}));
    assert_eq!(deep_diff(&a, &b).get("props"), Some(&Change::Set(json!(5))));
}

// =============================================================
// apply_diff
// =============================================================

#[test]
fn apply_reproduces_target_including_removed_keys() {
    let a = obj(json!({"x": 1, "nested": {"keep": 1, "drop": 2}, "old": "bye"}));
    let b = obj(json!({"x": 2, "nested": {"keep": 1, "add": 3}, "fresh": [1]}));

    let mut target = a.clone();
    apply_diff(&mut target, &deep_diff(&a, &b));
    assert_eq!(Value::Object(target), Value::Object(b));
}

#[test]
fn apply_creates_missing_nested_objects() {
    let mut target = obj(json!({"x": 1}));
    let delta = Delta::from_json(json!({"style": {"fill": "red"}})).unwrap();
    apply_diff(&mut target, &delta);
    assert_eq!(Value::Object(target), json!({"x": 1, "style": {"fill": "red"}}));
}

#[test]
fn apply_replaces_scalar_slot_with_object_for_nested_change() {
    let mut target = obj(json!({"style": "plain"}));
    let delta = Delta::from_json(json!({"style": {"fill": "red"}})).unwrap();
    apply_diff(&mut target, &delta);
    assert_eq!(Value::Object(target), json!({"style": {"fill": "red"}}));
}

// =============================================================
// Delta::merge
// =============================================================

fn apply_all(base: &Value, deltas: &[&Delta]) -> Value {
    let mut map = obj(base.clone());
    for d in deltas {
        apply_diff(&mut map, d);
    }
    Value::Object(map)
}

#[test]
fn merge_matches_sequential_application() {
    let base = json!({"x": 0, "style": {"fill": "red", "stroke": "black"}, "label": "a"});
    let cases = [
        (json!({"x": 5}), json!({"x": 6, "y": 1})),
        (json!({"style": {"fill": "blue"}}), json!({"style": {"stroke": "white"}})),
        (json!({"style": 3}), json!({"style": {"fill": "green"}})),
        (json!({"style": {"fill": "x"}}), json!({"style": null})),
    ];
    for (first, second) in cases {
        let d1 = Delta::from_json(first).unwrap();
        let d2 = Delta::from_json(second).unwrap();
        let mut merged = d1.clone();
        merged.merge(&d2);
        assert_eq!(apply_all(&base, &[&merged]), apply_all(&base, &[&d1, &d2]));
    }
}

#[test]
fn merge_absent_then_nested_builds_fresh_object() {
    let base = json!({"style": {"fill": "red", "stroke": "black"}});
    let mut d1 = Delta::new();
    d1.insert("style", Change::Absent);
    let d2 = Delta::from_json(json!({"style": {"fill": "blue"}})).unwrap();

    let mut merged = d1.clone();
    merged.merge(&d2);
    assert_eq!(merged.get("style"), Some(&Change::Set(json!({"fill": "blue"}))));
    assert_eq!(apply_all(&base, &[&merged]), apply_all(&base, &[&d1, &d2]));
}

#[test]
fn to_json_map_renders_absent_as_null() {
    let mut delta = Delta::from_json(json!({"x": 1, "style": {"fill": "red"}})).unwrap();
    delta.insert("note", Change::Absent);
    assert_eq!(
        Value::Object(delta.to_json_map()),
        json!({"x": 1, "style": {"fill": "red"}, "note": null})
    );
}

#[test]
fn from_json_rejects_non_objects() {
    assert!(Delta::from_json(json!([1, 2])).is_none());
    assert!(Delta::from_json(json!(null)).is_none());
}

// =============================================================
// loose_eq
// =============================================================

#[test]
fn loose_eq_rules() {
    assert!(loose_eq(&json!(1), &json!(1.0)));
    assert!(loose_eq(&json!("2.5"), &json!(2.5)));
    assert!(loose_eq(&json!(""), &json!(0)));
    assert!(loose_eq(&json!(false), &json!("0")));
    assert!(!loose_eq(&json!(null), &json!(0)));
    assert!(!loose_eq(&json!("abc"), &json!(0)));
    assert!(!loose_eq(&json!([1]), &json!(1)));
    assert!(loose_eq(&json!({"a": [1, "2"]}), &json!({"a": [1, 2]})));
}

// =============================================================
// Typed helpers
// =============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    x: f64,
    label: String,
    #[serde(default)]
    note: Option<String>,
}

#[test]
fn typed_round_trip() {
    let a = Sample { x: 1.0, label: "a".into(), note: Some("hi".into()) };
    let b = Sample { x: 4.0, label: "a".into(), note: None };

    let delta = diff_typed(&a, &b).unwrap();
    let mut target = a.clone();
    apply_typed(&mut target, &delta).unwrap();
    assert_eq!(target, b);
}

#[test]
fn typed_apply_rejects_schema_drift_and_keeps_target() {
    let mut target = Sample { x: 1.0, label: "a".into(), note: None };
    let delta = Delta::from_json(json!({"x": "not a number"})).unwrap();

    assert!(apply_typed(&mut target, &delta).is_err());
    assert_eq!(target, Sample { x: 1.0, label: "a".into(), note: None });
}
