//! Patch: merge the desired fields into an existing resource

use async_trait::async_trait;
use serde_json::Value;

use super::internal::{handle_check, identity, prepare};
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::client::patch::create_merge_patch;
use crate::common::{Error, Result};
use crate::model::{Expectation, OperationKind, Output};
use crate::resource::ResourceExt;

pub struct Patch {
    resource: Value,
    expect: Vec<Expectation>,
    outputs: Vec<Output>,
}

impl Patch {
    pub fn new(resource: Value, expect: Vec<Expectation>, outputs: Vec<Output>) -> Self {
        Self {
            resource,
            expect,
            outputs,
        }
    }

    async fn attempt(&self, ctx: &OperationContext, desired: &Value) -> Result<Outputs> {
        let key = desired.object_key();
        let current = match ctx.client.get(&key).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Err(Error::ResourceMissing),
            Err(e) => return Err(e.into()),
        };
        let patch = create_merge_patch(&current, desired);
        match ctx.client.patch(&key, &patch).await {
            Ok(patched) => handle_check(ctx, &patched, &self.expect, &self.outputs, None),
            Err(e) => handle_check(ctx, desired, &self.expect, &self.outputs, Some(e.into())),
        }
    }
}

#[async_trait]
impl Reconciler for Patch {
    fn kind(&self) -> OperationKind {
        OperationKind::Patch
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

    #[tokio::test]
    async fn test_patch_merges_fields() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "test-ns", "labels": {"app": "web"}},
            "spec": {"replicas": 1, "paused": false}
        }));
        let ctx = context(memory.clone());
        let desired = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 3}
        });
        Patch::new(desired.clone(), vec![], vec![]).exec(&ctx).await.unwrap();

        let mut key = desired.object_key();
        key.namespace = Some("test-ns".into());
        let stored = memory.object(&key).unwrap();
        assert_eq!(stored["spec"], json!({"replicas": 3, "paused": false}));
        assert_eq!(stored["metadata"]["labels"]["app"], json!("web"));
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_created() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone());
        let err = Patch::new(
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "gone"}}),
            vec![],
            vec![],
        )
        .exec(&ctx)
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ResourceMissing));
        assert_eq!(memory.calls(Verb::Create), 0);
    }
}
