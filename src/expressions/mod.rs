//! Expression evaluation
//!
//! Assertions, outputs and templated documents embed small path-query
//! expressions such as `($error != null)` or
//! `(status.conditions[?type == 'Ready'].status | [0])`. The engine only
//! depends on the [`Evaluator`] trait; [`Jmes`] is the built-in
//! implementation, a JMESPath dialect where `$name` reads a binding.

mod functions;
mod interpreter;
mod lexer;
mod parser;
pub mod template;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;

use crate::bindings::Bindings;

pub use functions::{ArgType, FunctionRegistry, Handler};
use parser::{parse, Ast};

/// Errors raised while parsing or evaluating an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function {name}() expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: String,
        actual: usize,
    },

    #[error("function {name}() argument {index} must be {expected}, got {actual}")]
    ArgumentType {
        name: String,
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("variable not defined: ${0}")]
    UndefinedVariable(String),

    #[error("{0}")]
    Runtime(String),
}

/// Evaluates an expression against a binding scope and a current object (`@`)
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expression: &str, bindings: &Bindings, value: &Value)
        -> Result<Value, Error>;
}

/// Built-in JMESPath dialect with a parsed-expression cache
pub struct Jmes {
    functions: FunctionRegistry,
    cache: Mutex<HashMap<String, Arc<Ast>>>,
}

impl Jmes {
    pub fn new(functions: FunctionRegistry) -> Self {
        Self {
            functions,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn compile(&self, expression: &str) -> Result<Arc<Ast>, Error> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ast) = cache.get(expression) {
            return Ok(ast.clone());
        }
        let ast = Arc::new(parse(expression)?);
        cache.insert(expression.to_string(), ast.clone());
        Ok(ast)
    }
}

impl Default for Jmes {
    fn default() -> Self {
        Self::new(FunctionRegistry::with_builtins())
    }
}

impl Evaluator for Jmes {
    fn evaluate(
        &self,
        expression: &str,
        bindings: &Bindings,
        value: &Value,
    ) -> Result<Value, Error> {
        let ast = self.compile(expression)?;
        interpreter::Interpreter::new(bindings, &self.functions).eval(&ast, value)
    }
}

/// Truthiness: `false`, `null` and empty strings, arrays and objects are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

/// Structural equality where numbers compare by value (`1 == 1.0`)
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

/// Type name as reported in error messages and by `type()`
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build a number value, preferring integers when lossless
pub fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: &str, value: Value) -> Value {
        Jmes::default()
            .evaluate(expr, &Bindings::new(), &value)
            .unwrap()
    }

    #[test]
    fn test_field_access() {
        let obj = json!({"metadata": {"name": "quick-start"}});
        assert_eq!(eval("metadata.name", obj.clone()), json!("quick-start"));
        assert_eq!(eval("metadata.missing", obj), Value::Null);
    }

    #[test]
    fn test_bindings_are_variables() {
        let bindings = Bindings::new().register("error", json!("boom"));
        let result = Jmes::default()
            .evaluate("$error != null", &bindings, &Value::Null)
            .unwrap();
        assert_eq!(result, json!(true));
    }

    #[test]
    fn test_undefined_variable() {
        let err = Jmes::default()
            .evaluate("$nope", &Bindings::new(), &Value::Null)
            .unwrap_err();
        assert_eq!(err, Error::UndefinedVariable("nope".into()));
    }

    #[test]
    fn test_filter_and_pipe() {
        let obj = json!({"status": {"conditions": [
            {"type": "Available", "status": "False"},
            {"type": "Ready", "status": "True"}
        ]}});
        assert_eq!(
            eval("status.conditions[?type == 'Ready'].status | [0]", obj),
            json!("True")
        );
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert_eq!(eval("`2` > `1.5`", Value::Null), json!(true));
    }

    #[test]
    fn test_compiled_expressions_are_cached() {
        let jmes = Jmes::default();
        jmes.evaluate("a.b", &Bindings::new(), &json!({})).unwrap();
        jmes.evaluate("a.b", &Bindings::new(), &json!({})).unwrap();
        assert_eq!(jmes.cache.lock().unwrap().len(), 1);
    }
}
