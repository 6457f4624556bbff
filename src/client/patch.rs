//! JSON merge patches (RFC 7386)

use serde_json::{Map, Value};

use crate::resource::ResourceExt;

/// Overlay `desired` onto `current`: mappings merge, everything else replaces
pub fn overlay(current: &Value, desired: &Value) -> Value {
    match (current, desired) {
        (Value::Object(base), Value::Object(over)) => {
            let mut merged = base.clone();
            for (key, value) in over {
                let next = match base.get(key) {
                    Some(existing) => overlay(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        _ => desired.clone(),
    }
}

/// Minimal merge patch turning `from` into `to`
pub fn diff(from: &Value, to: &Value) -> Value {
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => {
            let mut patch = Map::new();
            for (key, old) in a {
                if !b.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                } else if let Some(new) = b.get(key) {
                    if old != new {
                        let sub = match (old, new) {
                            (Value::Object(_), Value::Object(_)) => diff(old, new),
                            _ => new.clone(),
                        };
                        patch.insert(key.clone(), sub);
                    }
                }
            }
            for (key, new) in b {
                if !a.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Value::Object(patch)
        }
        _ => to.clone(),
    }
}

/// Patch applying `desired` on top of `current`
///
/// Carries the current `resourceVersion` so a concurrent write is
/// rejected as a conflict instead of silently overwritten.
pub fn create_merge_patch(current: &Value, desired: &Value) -> Value {
    let mut patch = diff(current, &overlay(current, desired));
    if let Some(version) = current.resource_version() {
        let version = version.to_string();
        patch.set_resource_version(&version);
    }
    patch
}

/// Apply a merge patch to `target`
pub fn apply_merge_patch(target: &Value, patch: &Value) -> Value {
    match patch {
        Value::Object(fields) => {
            let mut result = match target {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            for (key, value) in fields {
                if value.is_null() {
                    result.remove(key);
                } else {
                    let base = result.get(key).cloned().unwrap_or(Value::Null);
                    result.insert(key.clone(), apply_merge_patch(&base, value));
                }
            }
            Value::Object(result)
        }
        other => other.clone(),
    }
}
