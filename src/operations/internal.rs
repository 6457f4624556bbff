//! Shared reconciler steps: preparation, expectation handling, cleanup

use serde_json::Value;

use super::OperationContext;
use crate::bindings::{process_outputs, Bindings, Outputs};
use crate::checks::{self, ExpectOutcome};
use crate::common::{Error, Result};
use crate::expressions::template;
use crate::model::{Expectation, Output};
use crate::resource::ResourceExt;

/// Display identity of a resource document
pub fn identity(resource: &Value) -> String {
    if resource.has_type() {
        let mut key = resource.object_key();
        if key.name.is_empty() {
            key.name = "*".to_string();
        }
        key.to_string()
    } else {
        "(bindings)".to_string()
    }
}

/// Template the whole document when enabled, then assign the namespace
pub async fn prepare(ctx: &OperationContext, resource: &Value) -> Result<Value> {
    let mut object = if ctx.template {
        template::resolve(ctx.evaluator.as_ref(), resource, &ctx.bindings, &Value::Null)?
    } else {
        resource.clone()
    };
    namespace(ctx, &mut object).await?;
    Ok(object)
}

/// Template only the identity fields of a check tree, then assign the namespace
///
/// An expression-valued name is left as is, see [`candidates`]. Everything else in the tree keeps its `(expr)` strings since they are
/// evaluated against the candidate objects.
pub async fn prepare_check(ctx: &OperationContext, resource: &Value) -> Result<Value> {
    let mut object = resource.clone();
    if ctx.template {
        let evaluator = ctx.evaluator.as_ref();
        if let Some(map) = object.as_object_mut() {
            for field in ["apiVersion", "kind"] {
                if let Some(value) = map.get_mut(field) {
                    *value = template::resolve(evaluator, value, &ctx.bindings, &Value::Null)?;
                }
            }
            if let Some(metadata) = map.get_mut("metadata").and_then(Value::as_object_mut) {
                for field in ["name", "namespace", "labels"] {
                    let Some(value) = metadata.get_mut(field) else {
                        continue;
                    };
                    // an expression name filters the listed candidates
                    if field == "name" && value.as_str().and_then(template::as_expression).is_some() {
                        continue;
                    }
                    *value = template::resolve(evaluator, value, &ctx.bindings, &Value::Null)?;
                }
            }
        }
    }
    namespace(ctx, &mut object).await?;
    Ok(object)
}

async fn namespace(ctx: &OperationContext, object: &mut Value) -> Result<()> {
    if let Some(namespacer) = &ctx.namespacer {
        namespacer.apply(ctx.client.as_ref(), object).await?;
    }
    Ok(())
}

/// Bindings with the synthetic `error` binding set
pub fn with_error(bindings: &Bindings, error: Option<&Error>) -> Bindings {
    let value = match error {
        Some(e) => Value::String(e.to_string()),
        None => Value::Null,
    };
    bindings.register("error", value)
}

/// Evaluate expectations against an operation result
///
/// `error` is the failure of the write, if any. A failing applicable
/// expectation wins. When no expectation applies the write error is
/// returned unchanged. Otherwise outputs are resolved against `object`.
pub fn handle_check(
    ctx: &OperationContext,
    object: &Value,
    expect: &[Expectation],
    outputs: &[Output],
    error: Option<Error>,
) -> Result<Outputs> {
    let evaluator = ctx.evaluator.as_ref();
    let bindings = with_error(&ctx.bindings, error.as_ref());

    match checks::expect(evaluator, expect, object, &bindings)? {
        ExpectOutcome::Failed(failures) => return Err(Error::Check(failures)),
        ExpectOutcome::NotApplicable => {
            if let Some(error) = error {
                return Err(error);
            }
        }
        ExpectOutcome::Passed => {
            if let Some(error) = &error {
                tracing::debug!(error = %error, "error matched by expectation");
            }
        }
    }

    let (_, outputs) = process_outputs(evaluator, &bindings, object, outputs)?;
    Ok(outputs)
}

/// Template a single optional string field
pub fn render(ctx: &OperationContext, text: Option<&str>) -> Result<String> {
    let text = text.unwrap_or_default();
    if !ctx.template {
        return Ok(text.to_string());
    }
    Ok(template::resolve_string(ctx.evaluator.as_ref(), text, &ctx.bindings)?)
}

/// Objects in the cluster a prepared document refers to
///
/// A plain name is fetched directly; a missing object yields no candidate.
/// Without a name, or when the name is itself an expression, objects of
/// the type are listed within the namespace and filtered by labels.
pub async fn candidates(ctx: &OperationContext, object: &Value) -> Result<Vec<Value>> {
    let name = object.name();
    if !name.is_empty() && template::as_expression(name).is_none() {
        return match ctx.client.get(&object.object_key()).await {
            Ok(found) => Ok(vec![found]),
            Err(e) if e.is_not_found() => Ok(vec![]),
            Err(e) => Err(e.into()),
        };
    }
    let selector = object.label_selector();
    Ok(ctx
        .client
        .list(
            object.api_version(),
            object.kind(),
            object.namespace(),
            selector.as_deref(),
        )
        .await?)
}

/// Record a created object for deletion at teardown
pub fn register_cleanup(ctx: &OperationContext, object: &Value) {
    if let Some(queue) = &ctx.cleanup {
        queue.push(ctx.client.clone(), object.clone());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::cleanup::CleanupQueue;
    use crate::client::{DeletionPropagation, MemoryClient};
    use crate::clusters::ApiConfig;
    use crate::expressions::Jmes;
    use crate::namespacer::Namespacer;
    use crate::operations::retry::RetryPolicy;

    /// Context over an in-memory client with short deadlines
    pub fn context(client: Arc<MemoryClient>) -> OperationContext {
        OperationContext {
            evaluator: Arc::new(Jmes::default()),
            bindings: Bindings::new().register("namespace", Value::String("test-ns".into())),
            client,
            cluster: ApiConfig::default(),
            namespacer: Some(Namespacer::new("test-ns")),
            cleanup: Some(CleanupQueue::new()),
            template: true,
            retry: RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(200)),
            deletion_propagation: DeletionPropagation::Background,
            base_path: PathBuf::from("."),
            cancel: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use serde_json::json;
    use std::sync::Arc;

    fn expectation(matcher: Option<Value>, check: Value) -> Expectation {
        Expectation { matcher, check }
    }

    #[test]
    fn test_write_error_without_expectations_is_returned() {
        let ctx = testing::context(Arc::new(MemoryClient::new()));
        let err = handle_check(&ctx, &json!({}), &[], &[], Some(Error::AlreadyExists)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
    }

    #[test]
    fn test_expected_error_is_converted() {
        let ctx = testing::context(Arc::new(MemoryClient::new()));
        let expect = [expectation(
            None,
            json!({"($error)": "the resource already exists in the cluster"}),
        )];
        let outputs = handle_check(&ctx, &json!({}), &expect, &[], Some(Error::AlreadyExists)).unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_failing_expectation_wins() {
        let ctx = testing::context(Arc::new(MemoryClient::new()));
        let expect = [expectation(None, json!({"($error != null)": true}))];
        let err = handle_check(&ctx, &json!({"kind": "ConfigMap"}), &expect, &[], None).unwrap_err();
        assert!(matches!(err, Error::Check(_)));
    }

    #[test]
    fn test_unmatched_expectation_does_not_apply() {
        let ctx = testing::context(Arc::new(MemoryClient::new()));
        let expect = [expectation(Some(json!({"kind": "Secret"})), json!({"($error)": "x"}))];
        let outputs = handle_check(&ctx, &json!({"kind": "ConfigMap"}), &expect, &[], None).unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_outputs_resolved_in_order() {
        let ctx = testing::context(Arc::new(MemoryClient::new()));
        let outputs = [
            Output {
                name: "first".into(),
                value: json!("(metadata.name)"),
                matcher: None,
            },
            Output {
                name: "second".into(),
                value: json!("(join('-', [$first, 'x']))"),
                matcher: None,
            },
        ];
        let produced = handle_check(
            &ctx,
            &json!({"metadata": {"name": "cm"}}),
            &[],
            &outputs,
            None,
        )
        .unwrap();
        assert_eq!(produced["second"], json!("cm-x"));
    }

    #[tokio::test]
    async fn test_prepare_templates_and_namespaces() {
        let ctx = testing::context(Arc::new(MemoryClient::new()));
        let object = prepare(
            &ctx,
            &json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}, "data": {"ns": "($namespace)"}}),
        )
        .await
        .unwrap();
        assert_eq!(object["data"]["ns"], json!("test-ns"));
        assert_eq!(object.namespace(), Some("test-ns"));
    }

    #[tokio::test]
    async fn test_candidates_by_name_and_labels() {
        let memory = Arc::new(MemoryClient::new());
        for (name, app) in [("a", "web"), ("b", "web"), ("c", "db")] {
            memory.insert(json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": name, "namespace": "test-ns", "labels": {"app": app}}
            }));
        }
        let ctx = testing::context(memory);

        let by_name = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "c", "namespace": "test-ns"}});
        assert_eq!(candidates(&ctx, &by_name).await.unwrap().len(), 1);

        let missing = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "z", "namespace": "test-ns"}});
        assert!(candidates(&ctx, &missing).await.unwrap().is_empty());

        let by_labels = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"namespace": "test-ns", "labels": {"app": "web"}}});
        assert_eq!(candidates(&ctx, &by_labels).await.unwrap().len(), 2);

        let by_expression = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "(starts_with(@, 'a'))", "namespace": "test-ns"}});
        assert_eq!(candidates(&ctx, &by_expression).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_prepare_check_keeps_expression_name() {
        let memory = Arc::new(MemoryClient::new());
        for name in ["alpha", "beta"] {
            memory.insert(json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": name, "namespace": "test-ns", "labels": {"owner": "test-ns"}}}));
        }
        let ctx = testing::context(memory);
        let check = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "(starts_with(@, 'a'))", "labels": {"owner": "($namespace)"}}
        });
        let prepared = prepare_check(&ctx, &check).await.unwrap();
        assert_eq!(prepared["metadata"]["name"], json!("(starts_with(@, 'a'))"));
        assert_eq!(prepared["metadata"]["labels"]["owner"], json!("test-ns"));
        assert_eq!(prepared.namespace(), Some("test-ns"));
        assert_eq!(candidates(&ctx, &prepared).await.unwrap().len(), 2);
    }

    #[test]
    fn test_render_optional_text() {
        let ctx = testing::context(Arc::new(MemoryClient::new()));
        assert_eq!(render(&ctx, None).unwrap(), "");
        assert_eq!(render(&ctx, Some("($namespace)")).unwrap(), "test-ns");
    }

    #[tokio::test]
    async fn test_prepare_check_keeps_check_expressions() {
        let ctx = testing::context(Arc::new(MemoryClient::new()));
        let object = prepare_check(
            &ctx,
            &json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "($namespace)"}, "(length(data))": 1}),
        )
        .await
        .unwrap();
        assert_eq!(object.name(), "test-ns");
        assert_eq!(object["(length(data))"], json!(1));
    }
}
