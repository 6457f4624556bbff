//! External values exposed to tests as `$values`
//!
//! Value files are YAML mappings merged in order, later files winning.
//! `--set` assignments are applied on top.

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::client::patch::overlay;
use crate::common::{Error, Result};

/// Load and merge value files
pub fn load(paths: &[PathBuf]) -> Result<Value> {
    let mut values = Value::Object(Map::new());
    for path in paths {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        let document: Value = serde_yaml::from_str(&content).map_err(|e| Error::load(path, e))?;
        match document {
            Value::Null => {}
            Value::Object(_) => values = overlay(&values, &document),
            _ => return Err(Error::load(path, "values must be a mapping")),
        }
    }
    Ok(values)
}

/// Apply `key.path=value` assignments, comma separated
///
/// Values are read as YAML scalars, so `replicas=3` sets a number.
pub fn set(values: &mut Value, assignments: &str) -> Result<()> {
    for assignment in assignments.split(',').filter(|a| !a.trim().is_empty()) {
        let (path, raw) = assignment
            .split_once('=')
            .ok_or_else(|| Error::Validation(format!("invalid value assignment '{assignment}'")))?;
        let keys: Vec<&str> = path.trim().split('.').collect();
        if keys.iter().any(|k| k.is_empty()) {
            return Err(Error::Validation(format!("invalid value path '{path}'")));
        }
        let value = serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        insert(values, &keys, value);
    }
    Ok(())
}

fn insert(target: &mut Value, keys: &[&str], value: Value) {
    let Some((first, rest)) = keys.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let entry = map.entry(first.to_string()).or_insert(Value::Null);
        insert(entry, rest, value);
    }
}
