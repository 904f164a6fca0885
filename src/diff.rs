//! Structural diff over plain JSON values.
//!
//! DESIGN
//! ======
//! A `Delta` describes only the changed leaves between two JSON objects.
//! Keys added in the newer value carry `Change::Set`, keys removed carry
//! `Change::Absent`, and keys whose values are both objects carry a nested
//! `Delta` that is kept only when non-empty. Arrays and scalars are leaves:
//! they are compared with loose equality and replaced wholesale.
//!
//! `apply_diff` deep-merges a delta into a target in place. `Absent` removes
//! the key, so `apply_diff(a, deep_diff(a, b))` reproduces `b` exactly up to
//! loose equality of leaves.
//!
//! The typed helpers (`diff_typed`, `apply_typed`) run the same algorithm over
//! any serde type by round-tripping through `serde_json::Value`; a delta that
//! would break the concrete schema fails to deserialize and leaves the target
//! untouched.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

// =============================================================================
// TYPES
// =============================================================================

/// One entry of a [`Delta`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// The key now holds this value.
    Set(Value),
    /// The key no longer exists.
    Absent,
    /// Both sides are objects; only the nested changes apply.
    Nested(Delta),
}

/// Sparse description of changes between two JSON objects, keyed by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta(BTreeMap<String, Change>);

impl Delta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a delta from a partial JSON object. Nested objects become
    /// `Change::Nested` so merging keeps sibling keys; every other value
    /// (including `null`) is a `Change::Set`. Non-object input yields `None`.
    #[must_use]
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from_map(map)),
            _ => None,
        }
    }

    fn from_map(map: Map<String, Value>) -> Self {
        let entries = map
            .into_iter()
            .map(|(k, v)| {
                let change = match v {
                    Value::Object(inner) => Change::Nested(Self::from_map(inner)),
                    other => Change::Set(other),
                };
                (k, change)
            })
            .collect();
        Self(entries)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Change> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, change: Change) {
        self.0.insert(key.into(), change);
    }

    pub fn remove(&mut self, key: &str) -> Option<Change> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Change)> {
        self.0.iter()
    }

    /// Deep-merge `later` into `self`; on conflicting leaves `later` wins.
    ///
    /// The result applied to any base equals applying `self` then `later`.
    pub fn merge(&mut self, later: &Delta) {
        for (key, incoming) in &later.0 {
            let merged = match (self.0.remove(key), incoming) {
                (Some(Change::Nested(mut earlier)), Change::Nested(next)) => {
                    earlier.merge(next);
                    Change::Nested(earlier)
                }
                // A nested change on top of a replaced or removed key lands on
                // the replacement (or on a fresh object).
                (Some(Change::Set(Value::Object(mut base))), Change::Nested(next)) => {
                    apply_diff(&mut base, next);
                    Change::Set(Value::Object(base))
                }
                (Some(Change::Set(_) | Change::Absent), Change::Nested(next)) => {
                    let mut base = Map::new();
                    apply_diff(&mut base, next);
                    Change::Set(Value::Object(base))
                }
                (_, other) => other.clone(),
            };
            self.0.insert(key.clone(), merged);
        }
    }

    /// Render as a JSON object. `Absent` becomes `null`.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(k, change)| {
                let value = match change {
                    Change::Set(v) => v.clone(),
                    Change::Absent => Value::Null,
                    Change::Nested(inner) => Value::Object(inner.to_json_map()),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

// =============================================================================
// DIFF / APPLY
// =============================================================================

/// Compute the changed leaves between `a` and `b`.
#[must_use]
pub fn deep_diff(a: &Map<String, Value>, b: &Map<String, Value>) -> Delta {
    let mut delta = Delta::new();

    for (key, new) in b {
        match a.get(key) {
            None => delta.insert(key.clone(), Change::Set(new.clone())),
            Some(Value::Object(old_map)) if new.is_object() => {
                if let Value::Object(new_map) = new {
                    let nested = deep_diff(old_map, new_map);
                    if !nested.is_empty() {
                        delta.insert(key.clone(), Change::Nested(nested));
                    }
                }
            }
            Some(old) => {
                if !loose_eq(old, new) {
                    delta.insert(key.clone(), Change::Set(new.clone()));
                }
            }
        }
    }

    for key in a.keys() {
        if !b.contains_key(key) {
            delta.insert(key.clone(), Change::Absent);
        }
    }

    delta
}

/// Deep-merge `delta` into `target` in place.
pub fn apply_diff(target: &mut Map<String, Value>, delta: &Delta) {
    for (key, change) in delta.iter() {
        match change {
            Change::Set(value) => {
                target.insert(key.clone(), value.clone());
            }
            Change::Absent => {
                target.remove(key);
            }
            Change::Nested(inner) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(nested) = slot {
                    apply_diff(nested, inner);
                }
            }
        }
    }
}

/// Loose leaf equality.
///
/// Numbers compare numerically, a number equals a string parsing to the same
/// number, booleans compare as `0`/`1`, and `null` equals only `null`.
/// Arrays and objects compare structurally.
#[must_use]
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(_), Value::Number(_)) => a.as_f64() == b.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            numeric_str(s).is_some_and(|parsed| n.as_f64() == Some(parsed))
        }
        (Value::Bool(flag), other @ (Value::Number(_) | Value::String(_)))
        | (other @ (Value::Number(_) | Value::String(_)), Value::Bool(flag)) => {
            loose_eq(&Value::from(u8::from(*flag)), other)
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| loose_eq(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, l)| y.get(k).is_some_and(|r| loose_eq(l, r)))
        }
        _ => false,
    }
}

fn numeric_str(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    trimmed.parse::<f64>().ok()
}

// =============================================================================
// TYPED HELPERS
// =============================================================================

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(serde::ser::Error::custom("expected a value that serializes to an object")),
    }
}

/// Diff two values of the same schema.
///
/// # Errors
///
/// Returns an error if either value does not serialize to a JSON object.
pub fn diff_typed<T: Serialize>(a: &T, b: &T) -> Result<Delta, serde_json::Error> {
    Ok(deep_diff(&to_object(a)?, &to_object(b)?))
}

/// Apply a delta to a typed value. On error `target` is left unchanged.
///
/// # Errors
///
/// Returns an error if the patched JSON no longer fits `T`.
pub fn apply_typed<T>(target: &mut T, delta: &Delta) -> Result<(), serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let mut map = to_object(target)?;
    apply_diff(&mut map, delta);
    *target = serde_json::from_value(Value::Object(map))?;
    Ok(())
}

#[cfg(test)]
#[path = "diff_test.rs"]
mod diff_test;
