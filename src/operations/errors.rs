//! Assertion failure reports with a resource diff

use std::fmt;

use serde_json::{Map, Value};

use crate::checks::CheckFailure;
use crate::expressions::template;

/// Check failures for one candidate object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceError {
    pub identity: String,
    pub failures: Vec<CheckFailure>,
    pub diff: String,
}

impl ResourceError {
    pub fn new(identity: impl Into<String>, expected: &Value, actual: &Value, failures: Vec<CheckFailure>) -> Self {
        Self {
            identity: identity.into(),
            failures,
            diff: diff(expected, actual),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(self.identity.len().max(20));
        writeln!(f, "{rule}")?;
        writeln!(f, "{}", self.identity)?;
        writeln!(f, "{rule}")?;
        let mut lines: Vec<String> = self.failures.iter().map(|c| format!("* {c}")).collect();
        lines.sort();
        for line in lines {
            writeln!(f, "{line}")?;
        }
        if !self.diff.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.diff)?;
        }
        Ok(())
    }
}

/// Keep only the parts of `actual` that `expected` talks about
///
/// Projection keys (`(expr)`) are dropped since they do not name a field.
pub fn tidy(expected: &Value, actual: &Value) -> Value {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => {
            let mut out = Map::new();
            for (key, sub) in expected {
                if template::as_expression(key).is_some() {
                    continue;
                }
                if let Some(value) = actual.get(key) {
                    out.insert(key.clone(), tidy(sub, value));
                }
            }
            Value::Object(out)
        }
        (Value::Array(expected), Value::Array(actual)) => Value::Array(
            actual
                .iter()
                .enumerate()
                .map(|(i, value)| match expected.get(i) {
                    Some(sub) => tidy(sub, value),
                    None => value.clone(),
                })
                .collect(),
        ),
        _ => actual.clone(),
    }
}

fn strip_projections(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| template::as_expression(key).is_none())
                .map(|(key, value)| (key.clone(), strip_projections(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_projections).collect()),
        other => other.clone(),
    }
}

/// Line diff of the expected tree against the tidied actual object
pub fn diff(expected: &Value, actual: &Value) -> String {
    let expected_yaml = serde_yaml::to_string(&strip_projections(expected)).unwrap_or_default();
    let actual_yaml = serde_yaml::to_string(&tidy(expected, actual)).unwrap_or_default();
    if expected_yaml == actual_yaml {
        return String::new();
    }
    let left: Vec<&str> = expected_yaml.lines().collect();
    let right: Vec<&str> = actual_yaml.lines().collect();

    let mut out = String::from("--- expected\n+++ actual\n");
    for line in line_diff(&left, &right) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Longest-common-subsequence line diff
fn line_diff(left: &[&str], right: &[&str]) -> Vec<String> {
    let (n, m) = (left.len(), right.len());
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if left[i] == right[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if left[i] == right[j] {
            out.push(format!("  {}", left[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(format!("- {}", left[i]));
            i += 1;
        } else {
            out.push(format!("+ {}", right[j]));
            j += 1;
        }
    }
    out.extend(left[i..].iter().map(|l| format!("- {l}")));
    out.extend(right[j..].iter().map(|r| format!("+ {r}")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tidy_keeps_expected_keys() {
        let expected = json!({"metadata": {"name": "a"}, "data": {"k": "v"}, "(length(data))": 1});
        let actual = json!({
            "metadata": {"name": "a", "uid": "123", "resourceVersion": "7"},
            "data": {"k": "x", "other": "y"},
            "kind": "ConfigMap"
        });
        assert_eq!(
            tidy(&expected, &actual),
            json!({"metadata": {"name": "a"}, "data": {"k": "x", "other": "y"}})
        );
    }

    #[test]
    fn test_diff_marks_changed_lines() {
        let expected = json!({"data": {"k": "v"}});
        let actual = json!({"data": {"k": "x"}});
        let diff = diff(&expected, &actual);
        assert!(diff.starts_with("--- expected\n+++ actual\n"));
        assert!(diff.contains("-   k: v"));
        assert!(diff.contains("+   k: x"));
        assert!(diff.contains("  data:"));
    }

    #[test]
    fn test_display_sorts_failures() {
        let err = ResourceError::new(
            "v1/ConfigMap @ ns/a",
            &json!({"data": {"k": "v"}}),
            &json!({"data": {"k": "v"}}),
            vec![
                CheckFailure { path: "z".into(), message: "Required value".into() },
                CheckFailure { path: "a".into(), message: "Required value".into() },
            ],
        );
        let text = err.to_string();
        let a = text.find("* a:").unwrap();
        let z = text.find("* z:").unwrap();
        assert!(a < z);
        assert!(text.starts_with("--------------------\nv1/ConfigMap @ ns/a\n"));
    }
}
