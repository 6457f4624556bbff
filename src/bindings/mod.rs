//! Binding scopes
//!
//! A [`Bindings`] value is a persistent linked scope: registering a name
//! returns a child that shares its parent and shadows earlier entries.
//! Parents are never mutated, so a step can hand the same scope to
//! independent catch and finally items without one leaking into another.

pub mod outputs;

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::common::{Error, Result};
use crate::expressions::{template, Evaluator};
use crate::model::Binding;

pub use outputs::{process_outputs, register_outputs, Outputs};

static BINDING_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\w+|\(.+\))$").expect("binding name pattern compiles"));
static RESOLVED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+$").expect("identifier pattern compiles"));

/// Names the engine registers itself
pub const RESERVED_NAMES: [&str; 6] = ["namespace", "client", "error", "values", "stdout", "stderr"];

struct Node {
    name: String,
    value: Value,
    parent: Option<Arc<Node>>,
}

/// Immutable, layered key/value scope
#[derive(Clone, Default)]
pub struct Bindings {
    head: Option<Arc<Node>>,
}

impl Bindings {
    /// An empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a child scope where `name` resolves to `value`
    pub fn register(&self, name: impl Into<String>, value: Value) -> Self {
        Self {
            head: Some(Arc::new(Node {
                name: name.into(),
                value,
                parent: self.head.clone(),
            })),
        }
    }

    /// Look up the innermost value registered under `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            if current.name == name {
                return Some(&current.value);
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// Visible names, innermost first, without shadowed duplicates
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            if !names.contains(&current.name.as_str()) {
                names.push(&current.name);
            }
            node = current.parent.as_deref();
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Validate a declared binding or output name
pub fn check_name(name: &str) -> Result<()> {
    if !BINDING_NAME.is_match(name) {
        return Err(Error::InvalidBindingName(name.to_string()));
    }
    check_reserved(name)
}

fn check_reserved(name: &str) -> Result<()> {
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::ReservedBindingName(name.to_string()));
    }
    Ok(())
}

/// Resolve a declared name, evaluating `(expr)` names against the scope
pub fn resolve_name(evaluator: &dyn Evaluator, name: &str, bindings: &Bindings) -> Result<String> {
    check_name(name)?;
    let resolved = match template::as_expression(name) {
        Some(expr) => match evaluator.evaluate(expr, bindings, &Value::Null)? {
            Value::String(s) => s,
            other => return Err(Error::InvalidBindingName(other.to_string())),
        },
        None => name.to_string(),
    };
    if !RESOLVED_NAME.is_match(&resolved) {
        return Err(Error::InvalidBindingName(resolved));
    }
    check_reserved(&resolved)?;
    Ok(resolved)
}

/// Register declared bindings in order, each visible to the next
pub fn register_bindings(
    evaluator: &dyn Evaluator,
    bindings: &Bindings,
    object: &Value,
    declared: &[Binding],
) -> Result<Bindings> {
    let mut scope = bindings.clone();
    for binding in declared {
        let name = resolve_name(evaluator, &binding.name, &scope)?;
        let value = template::resolve(evaluator, &binding.value, &scope, object)?;
        tracing::trace!(binding = %name, "registering binding");
        scope = scope.register(name, value);
    }
    Ok(scope)
}
