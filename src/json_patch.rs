//! RFC 6902 JSON Patch: generate and apply operation lists over `serde_json::Value`.
//!
//! DESIGN
//! ======
//! `create_patch` walks both documents together. Objects produce `remove` for
//! keys only in the source, `add` for keys only in the target, and recurse
//! into common keys. Arrays are aligned with a unit-cost edit distance over
//! add/remove/replace; a replace between two containers of the same type
//! recurses instead of replacing the element wholesale. Operations are
//! emitted from the end of each array backwards, so every index is valid at
//! the moment its operation is applied.
//!
//! ERROR HANDLING
//! ==============
//! `apply_patch` never stops early: each operation yields its own `Result`,
//! so a caller can see which steps failed while the rest still applied.
//! Paths are RFC 6901 JSON Pointers (`~0` is `~`, `~1` is `/`); the array
//! index `-` appends.

#[cfg(test)]
#[path = "json_patch_test.rs"]
mod json_patch_test;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

impl Operation {
    /// The location this operation writes or checks.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. }
            | Self::Move { path, .. }
            | Self::Copy { path, .. }
            | Self::Test { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("invalid pointer {0:?}")]
    InvalidPointer(String),

    #[error("path not found: {0:?}")]
    PathNotFound(String),

    #[error("test failed at {0:?}")]
    TestFailed(String),

    #[error("cannot move {from:?} into its own child {path:?}")]
    MoveIntoChild { from: String, path: String },

    #[error("unknown operation {0:?}")]
    UnknownOperation(String),

    #[error("malformed operation: {0}")]
    Malformed(String),
}

// =============================================================================
// CREATE
// =============================================================================

/// Operations that turn `from` into `to`.
#[must_use]
pub fn create_patch(from: &Value, to: &Value) -> Vec<Operation> {
    let mut ops = Vec::new();
    diff_values("", from, to, &mut ops);
    ops
}

fn diff_values(path: &str, from: &Value, to: &Value, ops: &mut Vec<Operation>) {
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => diff_objects(path, a, b, ops),
        (Value::Array(a), Value::Array(b)) => diff_arrays(path, a, b, ops),
        _ if from == to => {}
        _ => ops.push(Operation::Replace { path: path.to_owned(), value: to.clone() }),
    }
}

fn diff_objects(path: &str, a: &Map<String, Value>, b: &Map<String, Value>, ops: &mut Vec<Operation>) {
    for key in a.keys().filter(|k| !b.contains_key(*k)) {
        ops.push(Operation::Remove { path: child(path, key) });
    }
    for (key, value) in b {
        match a.get(key) {
            Some(old) => diff_values(&child(path, key), old, value, ops),
            None => ops.push(Operation::Add { path: child(path, key), value: value.clone() }),
        }
    }
}

fn diff_arrays(path: &str, a: &[Value], b: &[Value], ops: &mut Vec<Operation>) {
    let (n, m) = (a.len(), b.len());

    // dist[i][j]: edits turning a[..i] into b[..j]
    let mut dist = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in dist.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, cell) in dist[0].iter_mut().enumerate() {
        *cell = j;
    }
    for i in 1..=n {
        for j in 1..=m {
            dist[i][j] = if a[i - 1] == b[j - 1] {
                dist[i - 1][j - 1]
            } else {
                1 + dist[i - 1][j - 1].min(dist[i - 1][j]).min(dist[i][j - 1])
            };
        }
    }

    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && a[i - 1] == b[j - 1] && dist[i][j] == dist[i - 1][j - 1] {
            i -= 1;
            j -= 1;
        } else if i > 0 && j > 0 && dist[i][j] == dist[i - 1][j - 1] + 1 {
            let at = child(path, &(i - 1).to_string());
            if same_container(&a[i - 1], &b[j - 1]) {
                diff_values(&at, &a[i - 1], &b[j - 1], ops);
            } else {
                ops.push(Operation::Replace { path: at, value: b[j - 1].clone() });
            }
            i -= 1;
            j -= 1;
        } else if i > 0 && dist[i][j] == dist[i - 1][j] + 1 {
            ops.push(Operation::Remove { path: child(path, &(i - 1).to_string()) });
            i -= 1;
        } else {
            ops.push(Operation::Add { path: child(path, &i.to_string()), value: b[j - 1].clone() });
            j -= 1;
        }
    }
}

fn same_container(a: &Value, b: &Value) -> bool {
    matches!((a, b), (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_)))
}

fn child(path: &str, token: &str) -> String {
    format!("{path}/{}", token.replace('~', "~0").replace('/', "~1"))
}

// =============================================================================
// APPLY
// =============================================================================

/// Apply every operation in order, reporting each outcome.
pub fn apply_patch(doc: &mut Value, ops: &[Operation]) -> Vec<Result<(), PatchError>> {
    ops.iter().map(|op| apply_operation(doc, op)).collect()
}

/// Apply untyped operations; entries with an unrecognized `op` fail alone.
pub fn apply_raw(doc: &mut Value, ops: &[Value]) -> Vec<Result<(), PatchError>> {
    ops.iter()
        .map(|raw| {
            let name = raw.get("op").and_then(Value::as_str).unwrap_or_default();
            if !matches!(name, "add" | "remove" | "replace" | "move" | "copy" | "test") {
                return Err(PatchError::UnknownOperation(name.to_owned()));
            }
            let op: Operation =
                serde_json::from_value(raw.clone()).map_err(|e| PatchError::Malformed(e.to_string()))?;
            apply_operation(doc, &op)
        })
        .collect()
}

/// Apply a single operation.
///
/// # Errors
///
/// Returns the reason the operation could not be applied; `doc` is left
/// unchanged in that case.
pub fn apply_operation(doc: &mut Value, op: &Operation) -> Result<(), PatchError> {
    match op {
        Operation::Add { path, value } => add(doc, path, value.clone()),
        Operation::Remove { path } => remove(doc, path).map(|_| ()),
        Operation::Replace { path, value } => {
            let tokens = parse_pointer(path)?;
            *resolve_mut(doc, &tokens, path)? = value.clone();
            Ok(())
        }
        Operation::Move { from, path } => {
            if from == path {
                return Ok(());
            }
            if path.starts_with(&format!("{from}/")) {
                return Err(PatchError::MoveIntoChild { from: from.clone(), path: path.clone() });
            }
            let value = remove(doc, from)?;
            if let Err(e) = add(doc, path, value.clone()) {
                // Put the source back so a failed move changes nothing.
                let _ = add(doc, from, value);
                return Err(e);
            }
            Ok(())
        }
        Operation::Copy { from, path } => {
            let tokens = parse_pointer(from)?;
            let value = resolve(doc, &tokens).cloned().ok_or_else(|| PatchError::PathNotFound(from.clone()))?;
            add(doc, path, value)
        }
        Operation::Test { path, value } => {
            let tokens = parse_pointer(path)?;
            match resolve(doc, &tokens) {
                Some(found) if found == value => Ok(()),
                Some(_) => Err(PatchError::TestFailed(path.clone())),
                None => Err(PatchError::PathNotFound(path.clone())),
            }
        }
    }
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    let tokens = parse_pointer(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };
    match resolve_mut(doc, parents, path)? {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = if last == "-" {
                items.len()
            } else {
                array_index(last).filter(|i| *i <= items.len()).ok_or_else(|| PatchError::PathNotFound(path.to_owned()))?
            };
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchError::PathNotFound(path.to_owned())),
    }
}

fn remove(doc: &mut Value, path: &str) -> Result<Value, PatchError> {
    let tokens = parse_pointer(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        return Err(PatchError::InvalidPointer(path.to_owned()));
    };
    let removed = match resolve_mut(doc, parents, path)? {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => array_index(last)
            .filter(|i| *i < items.len())
            .map(|i| items.remove(i)),
        _ => None,
    };
    removed.ok_or_else(|| PatchError::PathNotFound(path.to_owned()))
}

// =============================================================================
// POINTERS
// =============================================================================

fn parse_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(path.to_owned()));
    };
    Ok(rest
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn array_index(token: &str) -> Option<usize> {
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    token.parse().ok()
}

fn resolve<'a>(doc: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    tokens.iter().try_fold(doc, |current, token| match current {
        Value::Object(map) => map.get(token),
        Value::Array(items) => array_index(token).and_then(|i| items.get(i)),
        _ => None,
    })
}

fn resolve_mut<'a>(doc: &'a mut Value, tokens: &[String], path: &str) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get_mut(token),
            Value::Array(items) => array_index(token).and_then(|i| items.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| PatchError::PathNotFound(path.to_owned()))?;
    }
    Ok(current)
}
