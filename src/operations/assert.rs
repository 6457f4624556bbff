//! Assert: poll until some resource satisfies a check tree

use async_trait::async_trait;
use serde_json::Value;

use super::errors::ResourceError;
use super::internal::{candidates, identity, prepare_check};
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::checks;
use crate::common::{Error, Result};
use crate::model::OperationKind;
use crate::resource::ResourceExt;

pub struct Assert {
    resource: Value,
}

impl Assert {
    pub fn new(resource: Value) -> Self {
        Self { resource }
    }

    async fn attempt(&self, ctx: &OperationContext, expected: &Value) -> Result<Outputs> {
        let evaluator = ctx.evaluator.as_ref();

        // untyped documents assert on bindings only
        if !expected.has_type() {
            let failures = checks::check(evaluator, &Value::Null, expected, &ctx.bindings)?;
            return if failures.is_empty() {
                Ok(Outputs::new())
            } else {
                Err(Error::Check(failures))
            };
        }

        let found = candidates(ctx, expected).await?;
        if found.is_empty() {
            return Err(Error::NoCandidates);
        }

        let mut errors = Vec::with_capacity(found.len());
        for candidate in &found {
            let failures = checks::check(evaluator, candidate, expected, &ctx.bindings)?;
            if failures.is_empty() {
                return Ok(Outputs::new());
            }
            errors.push(Error::Resource(Box::new(ResourceError::new(
                identity(candidate),
                expected,
                candidate,
                failures,
            ))));
        }
        Err(Error::Multiple(errors))
    }
}

#[async_trait]
impl Reconciler for Assert {
    fn kind(&self) -> OperationKind {
        OperationKind::Assert
    }

    fn target(&self) -> String {
        identity(&self.resource)
    }

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs> {
        let expected = prepare_check(ctx, &self.resource).await?;
        ctx.retry
            .run(&ctx.cancel, || self.attempt(ctx, &expected))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryClient, Verb};
    use crate::operations::internal::testing::context;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn deployment(name: &str, ready: i64) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "test-ns", "labels": {"app": "web"}},
            "spec": {"replicas": 2},
            "status": {"readyReplicas": ready}
        })
    }

    #[tokio::test]
    async fn test_passes_when_any_candidate_matches() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(deployment("a", 0));
        memory.insert(deployment("b", 2));
        let ctx = context(memory);
        Assert::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"labels": {"app": "web"}},
            "status": {"readyReplicas": 2}
        }))
        .exec(&ctx)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_eventually_consistent_status() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(deployment("web", 0));
        let ctx = context(memory.clone());
        let key = deployment("web", 0).object_key();
        let writer = {
            let memory = memory.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                memory.set_status(&key, json!({"readyReplicas": 2}));
            })
        };
        Assert::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "(status.readyReplicas == spec.replicas)": true
        }))
        .exec(&ctx)
        .await
        .unwrap();
        writer.await.unwrap();
        assert!(memory.calls(Verb::Get) > 1);
    }

    #[tokio::test]
    async fn test_failure_reports_every_candidate() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(deployment("web", 1));
        let ctx = context(memory);
        let err = Assert::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "status": {"readyReplicas": 2}
        }))
        .exec(&ctx)
        .await
        .unwrap_err();

        let Error::Multiple(errors) = err else {
            panic!("expected per-candidate errors");
        };
        assert_eq!(errors.len(), 1);
        let message = errors[0].to_string();
        assert!(message.contains("apps/v1/Deployment @ test-ns/web"));
        assert!(message.contains("status.readyReplicas: Invalid value: 1: Expected value: 2"));
        assert!(message.contains("--- expected"));
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let ctx = context(Arc::new(MemoryClient::new()));
        let err = Assert::new(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "x"}}))
            .exec(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoCandidates));
    }

    #[tokio::test]
    async fn test_untyped_document_checks_bindings() {
        let ctx = context(Arc::new(MemoryClient::new()));
        Assert::new(json!({"($namespace)": "test-ns"}))
            .exec(&ctx)
            .await
            .unwrap();
        let err = Assert::new(json!({"($namespace)": "other"}))
            .exec(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Check(_)));
    }
}
