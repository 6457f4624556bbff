//! Document templating
//!
//! A string of the form `(expr)` anywhere in a document is replaced by the
//! value of `expr`. A leading backslash (`\(literal)`) keeps the string as is.

use serde_json::{Map, Value};

use super::{Error, Evaluator};
use crate::bindings::Bindings;

/// Return the inner expression of a `(expr)` string
pub fn as_expression(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('(') && trimmed.ends_with(')') {
        Some(&trimmed[1..trimmed.len() - 1])
    } else {
        None
    }
}

/// Resolve every templated string in `value`
///
/// `object` is what `@` refers to while evaluating.
pub fn resolve(
    evaluator: &dyn Evaluator,
    value: &Value,
    bindings: &Bindings,
    object: &Value,
) -> Result<Value, Error> {
    match value {
        Value::String(text) => {
            if let Some(escaped) = text.strip_prefix("\\(") {
                return Ok(Value::String(format!("({escaped}")));
            }
            match as_expression(text) {
                Some(expr) => evaluator.evaluate(expr, bindings, object),
                None => Ok(value.clone()),
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(evaluator, item, bindings, object))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), resolve(evaluator, item, bindings, object)?);
            }
            Ok(Value::Object(out))
        }
        _ => Ok(value.clone()),
    }
}

/// Resolve a single string, requiring a string result
pub fn resolve_string(
    evaluator: &dyn Evaluator,
    text: &str,
    bindings: &Bindings,
) -> Result<String, Error> {
    match resolve(evaluator, &Value::String(text.to_string()), bindings, &Value::Null)? {
        Value::String(s) => Ok(s),
        other => Err(Error::Runtime(format!(
            "expected '{text}' to evaluate to a string, got {}",
            super::type_name(&other)
        ))),
    }
}
