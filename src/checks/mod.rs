//! Assertion trees and expectations
//!
//! A check tree is a document compared against an actual object:
//!
//! - plain mapping keys descend into the matching field
//! - `(expr)` keys project the current node through `expr`
//! - sequences compare element by element
//! - `(expr)` scalar leaves are evaluated and compared with the node
//! - other scalars compare by equality, numbers by value
//!
//! Failures carry the path where they happened, e.g.
//! `spec.replicas: Invalid value: 2: Expected value: 3`.

use std::fmt;

use serde_json::Value;

use crate::bindings::Bindings;
use crate::common::Result;
use crate::expressions::{template, values_equal, Evaluator};
use crate::model::Expectation;

/// One mismatch between a check tree and an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub path: String,
    pub message: String,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Result of evaluating a list of expectations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectOutcome {
    /// No expectation matched the object
    NotApplicable,
    /// Every applicable expectation held
    Passed,
    /// An applicable expectation failed
    Failed(Vec<CheckFailure>),
}

/// Compare `object` against the check tree `expected`
pub fn check(
    evaluator: &dyn Evaluator,
    object: &Value,
    expected: &Value,
    bindings: &Bindings,
) -> Result<Vec<CheckFailure>> {
    let mut failures = Vec::new();
    check_node(evaluator, object, expected, bindings, "", &mut failures)?;
    Ok(failures)
}

/// Whether `object` satisfies the check tree
pub fn matches(
    evaluator: &dyn Evaluator,
    object: &Value,
    expected: &Value,
    bindings: &Bindings,
) -> Result<bool> {
    Ok(check(evaluator, object, expected, bindings)?.is_empty())
}

/// Evaluate expectations in order
///
/// An expectation whose `match` does not hold is skipped. The first
/// applicable expectation whose `check` fails decides the outcome.
pub fn expect(
    evaluator: &dyn Evaluator,
    expectations: &[Expectation],
    object: &Value,
    bindings: &Bindings,
) -> Result<ExpectOutcome> {
    let mut applicable = false;
    for expectation in expectations {
        if let Some(matcher) = &expectation.matcher {
            if !matches(evaluator, object, matcher, bindings)? {
                continue;
            }
        }
        applicable = true;
        let failures = check(evaluator, object, &expectation.check, bindings)?;
        if !failures.is_empty() {
            return Ok(ExpectOutcome::Failed(failures));
        }
    }
    Ok(if applicable {
        ExpectOutcome::Passed
    } else {
        ExpectOutcome::NotApplicable
    })
}

fn join_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

fn check_node(
    evaluator: &dyn Evaluator,
    actual: &Value,
    expected: &Value,
    bindings: &Bindings,
    path: &str,
    failures: &mut Vec<CheckFailure>,
) -> Result<()> {
    match expected {
        Value::Object(fields) => {
            for (key, sub) in fields {
                if let Some(expr) = template::as_expression(key) {
                    let projected = evaluator.evaluate(expr, bindings, actual)?;
                    check_node(
                        evaluator,
                        &projected,
                        sub,
                        bindings,
                        &join_path(path, key),
                        failures,
                    )?;
                    continue;
                }
                let field_path = join_path(path, key);
                match actual.as_object() {
                    Some(map) => match map.get(key) {
                        Some(value) => {
                            check_node(evaluator, value, sub, bindings, &field_path, failures)?
                        }
                        None => failures.push(CheckFailure {
                            path: field_path,
                            message: "Required value: field not found in the input object"
                                .to_string(),
                        }),
                    },
                    None => failures.push(CheckFailure {
                        path: field_path,
                        message: format!(
                            "Invalid type: expected a mapping, got {}",
                            crate::expressions::type_name(actual)
                        ),
                    }),
                }
            }
        }
        Value::Array(items) => match actual.as_array() {
            Some(values) if values.len() == items.len() => {
                for (i, (value, sub)) in values.iter().zip(items).enumerate() {
                    let item_path = format!("{path}[{i}]");
                    check_node(evaluator, value, sub, bindings, &item_path, failures)?;
                }
            }
            Some(values) => failures.push(CheckFailure {
                path: path.to_string(),
                message: format!(
                    "Invalid value: {}: Expected value: {} (lengths of sequences don't match)",
                    values.len(),
                    items.len()
                ),
            }),
            None => failures.push(CheckFailure {
                path: path.to_string(),
                message: format!(
                    "Invalid type: expected a sequence, got {}",
                    crate::expressions::type_name(actual)
                ),
            }),
        },
        Value::String(text) if template::as_expression(text).is_some() => {
            let resolved = template::resolve(evaluator, expected, bindings, actual)?;
            if !values_equal(actual, &resolved) {
                failures.push(CheckFailure {
                    path: path.to_string(),
                    message: format!(
                        "Invalid value: {}: Expected value: {}",
                        render(actual),
                        render(&resolved)
                    ),
                });
            }
        }
        _ => {
            let expected = template::resolve(evaluator, expected, bindings, actual)?;
            if !values_equal(actual, &expected) {
                failures.push(CheckFailure {
                    path: path.to_string(),
                    message: format!(
                        "Invalid value: {}: Expected value: {}",
                        render(actual),
                        render(&expected)
                    ),
                });
            }
        }
    }
    Ok(())
}
