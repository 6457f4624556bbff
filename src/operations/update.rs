//! Update: replace an existing resource at its current version

use async_trait::async_trait;
use serde_json::Value;

use super::internal::{handle_check, identity, prepare};
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::common::{Error, Result};
use crate::model::{Expectation, OperationKind, Output};
use crate::resource::ResourceExt;

pub struct Update {
    resource: Value,
    expect: Vec<Expectation>,
    outputs: Vec<Output>,
}

impl Update {
    pub fn new(resource: Value, expect: Vec<Expectation>, outputs: Vec<Output>) -> Self {
        Self {
            resource,
            expect,
            outputs,
        }
    }

    /// A missing resource is retried: it may still be created elsewhere
    async fn attempt(&self, ctx: &OperationContext, desired: &Value) -> Result<Outputs> {
        let current = match ctx.client.get(&desired.object_key()).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Err(Error::ResourceMissing),
            Err(e) => return Err(e.into()),
        };
        let mut desired = desired.clone();
        if let Some(version) = current.resource_version() {
            desired.set_resource_version(version);
        }
        match ctx.client.update(&desired).await {
            Ok(updated) => handle_check(ctx, &updated, &self.expect, &self.outputs, None),
            Err(e) => handle_check(ctx, &desired, &self.expect, &self.outputs, Some(e.into())),
        }
    }
}

#[async_trait]
impl Reconciler for Update {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn target(&self) -> String {
        identity(&self.resource)
    }

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs> {
        let desired = prepare(ctx, &self.resource).await?;
        ctx.retry
            .run(&ctx.cancel, || self.attempt(ctx, &desired))
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

    fn configmap(value: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "test-ns"},
            "data": {"mode": value}
        })
    }

    #[tokio::test]
    async fn test_updates_existing_resource() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(configmap("old"));
        let ctx = context(memory.clone());
        Update::new(configmap("new"), vec![], vec![]).exec(&ctx).await.unwrap();
        let stored = memory.object(&configmap("x").object_key()).unwrap();
        assert_eq!(stored["data"]["mode"], json!("new"));
        assert_eq!(stored.resource_version(), Some("2"));
    }

    #[tokio::test]
    async fn test_missing_resource_retried_until_deadline() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone());
        let err = Update::new(configmap("new"), vec![], vec![]).exec(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::ResourceMissing));
        assert!(memory.calls(Verb::Get) > 1);
        assert_eq!(memory.calls(Verb::Update), 0);
    }
}
