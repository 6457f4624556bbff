//! Wait: poll resources for deletion, a condition or a JSONPath value
//!
//! An empty namespace targets the test namespace for namespaced kinds,
//! `*` targets every namespace.

use async_trait::async_trait;
use serde_json::Value;

use super::internal::render;
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::client::ObjectKey;
use crate::common::{Error, Result};
use crate::model::{OperationKind, WaitFor, WaitOperation};
use crate::resource::ResourceExt;

pub struct Wait {
    op: WaitOperation,
}

/// Query with every template resolved
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    name: String,
    selector: String,
}

/// Turn `{.status.phase}` into `$.status.phase`
fn jsonpath_query(path: &str) -> String {
    let inner = path
        .trim()
        .strip_prefix('{')
        .and_then(|p| p.strip_suffix('}'))
        .unwrap_or(path.trim());
    if inner.starts_with('$') {
        inner.to_string()
    } else if inner.starts_with('.') || inner.starts_with('[') {
        format!("${inner}")
    } else {
        format!("$.{inner}")
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn condition_met(object: &Value, name: &str, expected: &str) -> bool {
    object
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|c| c.get("type").and_then(Value::as_str).is_some_and(|t| t.eq_ignore_ascii_case(name)))
        .any(|c| {
            c.get("status")
                .map(text_of)
                .is_some_and(|s| s.eq_ignore_ascii_case(expected))
        })
}

fn jsonpath_met(object: &Value, query: &str, expected: Option<&str>) -> Result<bool> {
    let found = jsonpath_lib::select(object, query)
        .map_err(|e| Error::Validation(format!("invalid jsonpath '{query}': {e:?}")))?;
    Ok(match expected {
        Some(expected) => found.iter().any(|v| text_of(v) == expected),
        None => !found.is_empty(),
    })
}

impl Wait {
    pub fn new(op: WaitOperation) -> Self {
        Self { op }
    }

    async fn resolve(&self, ctx: &OperationContext) -> Result<Target> {
        let query = &self.op.query;
        let api_version = render(ctx, Some(&query.api_version))?;
        let kind = render(ctx, Some(&query.kind))?;
        let name = render(ctx, query.name.as_deref())?;
        let selector = render(ctx, query.selector.as_deref())?;
        if !name.is_empty() && !selector.is_empty() {
            return Err(Error::Validation(
                "name cannot be provided when a selector is specified".to_string(),
            ));
        }
        let namespaced = ctx.client.is_namespaced(&api_version, &kind).await?;
        let namespace = match render(ctx, query.namespace.as_deref())?.as_str() {
            _ if !namespaced => None,
            "*" => None,
            "" => ctx.namespacer.as_ref().map(|n| n.namespace().to_string()),
            ns => Some(ns.to_string()),
        };
        Ok(Target {
            api_version,
            kind,
            namespace,
            name,
            selector,
        })
    }

    async fn candidates(&self, ctx: &OperationContext, target: &Target) -> Result<Vec<Value>> {
        if !target.name.is_empty() {
            let key = ObjectKey::new(
                &target.api_version,
                &target.kind,
                target.namespace.as_deref(),
                &target.name,
            );
            return match ctx.client.get(&key).await {
                Ok(found) => Ok(vec![found]),
                Err(e) if e.is_not_found() => Ok(vec![]),
                Err(e) => Err(e.into()),
            };
        }
        let selector = Some(target.selector.as_str()).filter(|s| !s.is_empty());
        Ok(ctx
            .client
            .list(
                &target.api_version,
                &target.kind,
                target.namespace.as_deref(),
                selector,
            )
            .await?)
    }

    async fn attempt(&self, ctx: &OperationContext, target: &Target) -> Result<Outputs> {
        let found = self.candidates(ctx, target).await?;
        match &self.op.wait_for {
            WaitFor::Deletion(_) => {
                if found.is_empty() {
                    return Ok(Outputs::new());
                }
                return Err(Error::WaitNotSatisfied(format!(
                    "{} resource(s) still present",
                    found.len()
                )));
            }
            _ if found.is_empty() => return Err(Error::NoCandidates),
            WaitFor::Condition { name, value } => {
                let expected = value.as_deref().unwrap_or("True");
                if let Some(pending) = found.iter().find(|o| !condition_met(o, name, expected)) {
                    return Err(Error::WaitNotSatisfied(format!(
                        "{}: condition {name}={expected} not met",
                        pending.object_key()
                    )));
                }
            }
            WaitFor::JsonPath { path, value } => {
                let query = jsonpath_query(path);
                for object in &found {
                    if !jsonpath_met(object, &query, value.as_deref())? {
                        return Err(Error::WaitNotSatisfied(format!(
                            "{}: {path} does not match {}",
                            object.object_key(),
                            value.as_deref().unwrap_or("any value")
                        )));
                    }
                }
            }
        }
        Ok(Outputs::new())
    }
}

#[async_trait]
impl Reconciler for Wait {
    fn kind(&self) -> OperationKind {
        OperationKind::Wait
    }

    fn target(&self) -> String {
        let query = &self.op.query;
        match (&query.name, &query.selector) {
            (Some(name), _) => format!("{}/{} {name}", query.api_version, query.kind),
            (None, Some(selector)) => format!("{}/{} -l {selector}", query.api_version, query.kind),
            (None, None) => format!("{}/{}", query.api_version, query.kind),
        }
    }

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs> {
        let target = self.resolve(ctx).await?;
        ctx.retry
            .run(&ctx.cancel, || self.attempt(ctx, &target))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::model::ResourceQuery;
    use crate::operations::internal::testing::context;
    use serde_json::{json, Map};
    use std::sync::Arc;
    use std::time::Duration;

    fn pod(name: &str, ready: &str, phase: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "test-ns", "labels": {"app": "web"}},
            "status": {
                "phase": phase,
                "conditions": [{"type": "Ready", "status": ready}]
            }
        })
    }

    fn wait(name: Option<&str>, wait_for: WaitFor) -> Wait {
        Wait::new(WaitOperation {
            query: ResourceQuery {
                api_version: "v1".into(),
                kind: "Pod".into(),
                name: name.map(str::to_string),
                selector: name.is_none().then(|| "app=web".to_string()),
                ..Default::default()
            },
            wait_for,
            clusters: Default::default(),
            timeout: None,
        })
    }

    #[test]
    fn test_jsonpath_query() {
        assert_eq!(jsonpath_query("{.status.phase}"), "$.status.phase");
        assert_eq!(jsonpath_query(".status.phase"), "$.status.phase");
        assert_eq!(jsonpath_query("$.status"), "$.status");
    }

    #[test]
    fn test_condition_met_is_case_insensitive() {
        let object = pod("a", "true", "Running");
        assert!(condition_met(&object, "ready", "True"));
        assert!(!condition_met(&object, "Ready", "False"));
        assert!(!condition_met(&object, "Initialized", "True"));
    }

    #[tokio::test]
    async fn test_condition_on_all_selected() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(pod("a", "True", "Running"));
        memory.insert(pod("b", "False", "Pending"));
        let ctx = context(memory.clone());
        let key = pod("b", "", "").object_key();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            memory.set_status(&key, json!({"conditions": [{"type": "Ready", "status": "True"}]}));
        });
        wait(
            None,
            WaitFor::Condition {
                name: "Ready".into(),
                value: None,
            },
        )
        .exec(&ctx)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_jsonpath_value() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(pod("a", "True", "Running"));
        let ctx = context(memory);
        wait(
            Some("a"),
            WaitFor::JsonPath {
                path: "{.status.phase}".into(),
                value: Some("Running".into()),
            },
        )
        .exec(&ctx)
        .await
        .unwrap();

        let err = wait(
            Some("a"),
            WaitFor::JsonPath {
                path: "{.status.phase}".into(),
                value: Some("Succeeded".into()),
            },
        )
        .exec(&ctx)
        .await
        .unwrap_err();
        assert!(matches!(err, Error::WaitNotSatisfied(_)));
    }

    #[tokio::test]
    async fn test_deletion() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone());
        wait(Some("gone"), WaitFor::Deletion(Map::new()))
            .exec(&ctx)
            .await
            .unwrap();

        memory.insert(pod("a", "True", "Running"));
        let err = wait(Some("a"), WaitFor::Deletion(Map::new()))
            .exec(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WaitNotSatisfied(_)));
    }

    #[tokio::test]
    async fn test_condition_without_candidates() {
        let ctx = context(Arc::new(MemoryClient::new()));
        let err = wait(
            Some("missing"),
            WaitFor::Condition {
                name: "Ready".into(),
                value: None,
            },
        )
        .exec(&ctx)
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoCandidates));
    }
}
