//! Error: poll until no resource satisfies a check tree

use async_trait::async_trait;
use serde_json::Value;

use super::internal::{candidates, identity, prepare_check};
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::checks;
use crate::common::{Error, Result};
use crate::model::OperationKind;
use crate::resource::ResourceExt;

/// Negated assertion
pub struct Refute {
    resource: Value,
}

impl Refute {
    pub fn new(resource: Value) -> Self {
        Self { resource }
    }

    async fn attempt(&self, ctx: &OperationContext, expected: &Value) -> Result<Outputs> {
        let evaluator = ctx.evaluator.as_ref();
        if !expected.has_type() {
            if checks::matches(evaluator, &Value::Null, expected, &ctx.bindings)? {
                return Err(Error::UnexpectedMatch(identity(expected)));
            }
            return Ok(Outputs::new());
        }
        for candidate in candidates(ctx, expected).await? {
            if checks::matches(evaluator, &candidate, expected, &ctx.bindings)? {
                return Err(Error::UnexpectedMatch(identity(&candidate)));
            }
        }
        Ok(Outputs::new())
    }
}

#[async_trait]
impl Reconciler for Refute {
    fn kind(&self) -> OperationKind {
        OperationKind::Error
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
    use crate::client::MemoryClient;
    use crate::operations::internal::testing::context;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(phase: &str) -> Value {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "migrate", "namespace": "test-ns"},
            "status": {"phase": phase}
        })
    }

    fn failed_job() -> Value {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "migrate"},
            "status": {"phase": "Failed"}
        })
    }

    #[tokio::test]
    async fn test_absent_resource_passes() {
        let ctx = context(Arc::new(MemoryClient::new()));
        Refute::new(failed_job()).exec(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_matching_resource_passes() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(job("Succeeded"));
        let ctx = context(memory);
        Refute::new(failed_job()).exec(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_persistent_match_fails_at_deadline() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(job("Failed"));
        let ctx = context(memory);
        let err = Refute::new(failed_job()).exec(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedMatch(ref who) if who.contains("migrate")));
    }

    #[tokio::test]
    async fn test_match_that_goes_away_passes() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(job("Failed"));
        let ctx = context(memory.clone());
        let key = job("Failed").object_key();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            memory.set_status(&key, json!({"phase": "Running"}));
        });
        Refute::new(failed_job()).exec(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_untyped_document() {
        let ctx = context(Arc::new(MemoryClient::new()));
        Refute::new(json!({"($namespace)": "other"})).exec(&ctx).await.unwrap();
        let err = Refute::new(json!({"($namespace)": "test-ns"}))
            .exec(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedMatch(ref who) if who == "(bindings)"));
    }
}
