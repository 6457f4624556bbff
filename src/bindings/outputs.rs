//! Output resolution
//!
//! Outputs are evaluated in declaration order. Each one is registered into
//! the scope before the next is evaluated, and an output whose `match`
//! does not hold is skipped without error.

use indexmap::IndexMap;
use serde_json::Value;

use super::{resolve_name, Bindings};
use crate::checks;
use crate::common::Result;
use crate::expressions::{template, Evaluator};
use crate::model::Output;

/// Outputs produced by an operation, in declaration order
pub type Outputs = IndexMap<String, Value>;

/// Resolve `declared` outputs against `object`
///
/// Returns the extended scope together with the produced outputs.
pub fn process_outputs(
    evaluator: &dyn Evaluator,
    bindings: &Bindings,
    object: &Value,
    declared: &[Output],
) -> Result<(Bindings, Outputs)> {
    let mut scope = bindings.clone();
    let mut outputs = Outputs::new();
    for output in declared {
        if let Some(matcher) = &output.matcher {
            if !checks::matches(evaluator, object, matcher, &scope)? {
                tracing::debug!(output = %output.name, "output skipped, match does not hold");
                continue;
            }
        }
        let name = resolve_name(evaluator, &output.name, &scope)?;
        let value = template::resolve(evaluator, &output.value, &scope, object)?;
        scope = scope.register(name.clone(), value.clone());
        outputs.insert(name, value);
    }
    Ok((scope, outputs))
}

/// Register previously produced outputs into a scope
pub fn register_outputs(bindings: &Bindings, outputs: &Outputs) -> Bindings {
    outputs
        .iter()
        .fold(bindings.clone(), |scope, (name, value)| {
            scope.register(name.clone(), value.clone())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::expressions::Jmes;
    use serde_json::json;

    fn output(name: &str, value: Value, matcher: Option<Value>) -> Output {
        Output {
            name: name.to_string(),
            value,
            matcher,
        }
    }

    #[test]
    fn test_outputs_see_earlier_outputs() {
        let object = json!({"metadata": {"name": "web"}});
        let declared = vec![
            output("name", json!("(metadata.name)"), None),
            output("url", json!("(concat($name, '.svc'))"), None),
        ];
        let (scope, outputs) =
            process_outputs(&Jmes::default(), &Bindings::new(), &object, &declared).unwrap();
        assert_eq!(outputs["url"], json!("web.svc"));
        assert_eq!(scope.get("name"), Some(&json!("web")));
        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["name", "url"]);
    }

    #[test]
    fn test_output_cannot_hide_error() {
        let declared = vec![output("error", json!("none"), None)];
        let err = process_outputs(&Jmes::default(), &Bindings::new(), &json!({}), &declared).unwrap_err();
        assert!(matches!(err, Error::ReservedBindingName(name) if name == "error"));
    }

    #[test]
    fn test_unmatched_output_is_absent() {
        let object = json!({"kind": "ConfigMap"});
        let declared = vec![
            output("skipped", json!("x"), Some(json!({"kind": "Secret"}))),
            output("kept", json!("y"), Some(json!({"kind": "ConfigMap"}))),
        ];
        let (scope, outputs) =
            process_outputs(&Jmes::default(), &Bindings::new(), &object, &declared).unwrap();
        assert!(!outputs.contains_key("skipped"));
        assert!(scope.get("skipped").is_none());
        assert_eq!(outputs["kept"], json!("y"));
    }

    #[test]
    fn test_register_outputs() {
        let mut outputs = Outputs::new();
        outputs.insert("a".into(), json!(1));
        let scope = register_outputs(&Bindings::new(), &outputs);
        assert_eq!(scope.get("a"), Some(&json!(1)));
    }
}
