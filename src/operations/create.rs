//! Create: the resource must not exist yet

use async_trait::async_trait;
use serde_json::Value;

use super::internal::{handle_check, identity, prepare, register_cleanup};
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::common::{Error, Result};
use crate::model::{Expectation, OperationKind, Output};
use crate::resource::ResourceExt;

pub struct Create {
    resource: Value,
    expect: Vec<Expectation>,
    outputs: Vec<Output>,
}

impl Create {
    pub fn new(resource: Value, expect: Vec<Expectation>, outputs: Vec<Output>) -> Self {
        Self {
            resource,
            expect,
            outputs,
        }
    }

    async fn attempt(&self, ctx: &OperationContext, desired: &Value) -> Result<Outputs> {
        match ctx.client.get(&desired.object_key()).await {
            // an existing object is final: retrying cannot make it go away
            Ok(_) => handle_check(
                ctx,
                desired,
                &self.expect,
                &self.outputs,
                Some(Error::AlreadyExists),
            )
            .map_err(Error::terminal),
            Err(e) if e.is_not_found() => match ctx.client.create(desired).await {
                // the object now exists, a retry would only see it as already existing
                Ok(created) => {
                    register_cleanup(ctx, &created);
                    handle_check(ctx, &created, &self.expect, &self.outputs, None)
                        .map_err(Error::terminal)
                }
                Err(e) => handle_check(ctx, desired, &self.expect, &self.outputs, Some(e.into())),
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Reconciler for Create {
    fn kind(&self) -> OperationKind {
        OperationKind::Create
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

    fn secret() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "token", "namespace": "test-ns"},
            "stringData": {"token": "abc"}
        })
    }

    #[tokio::test]
    async fn test_creates_and_registers_cleanup() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone());
        Create::new(secret(), vec![], vec![]).exec(&ctx).await.unwrap();
        assert_eq!(memory.calls(Verb::Create), 1);
        assert_eq!(ctx.cleanup.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_resource_fails_without_retry() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(secret());
        let ctx = context(memory.clone());
        let err = Create::new(secret(), vec![], vec![]).exec(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
        assert_eq!(memory.calls(Verb::Get), 1);
        assert_eq!(memory.calls(Verb::Create), 0);
    }

    #[tokio::test]
    async fn test_existing_resource_expected() {
        let memory = Arc::new(MemoryClient::new());
        memory.insert(secret());
        let ctx = context(memory.clone());
        let expect = vec![Expectation {
            matcher: None,
            check: json!({"($error)": "the resource already exists in the cluster"}),
        }];
        Create::new(secret(), expect, vec![]).exec(&ctx).await.unwrap();
        assert!(ctx.cleanup.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmet_expectation_after_create_is_final() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone());
        let expect = vec![Expectation {
            matcher: None,
            check: json!({"($error != `null`)": true}),
        }];
        let err = Create::new(secret(), expect, vec![]).exec(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Check(_)));
        assert_eq!(memory.calls(Verb::Create), 1);
        assert_eq!(memory.calls(Verb::Get), 1);
        // the created object is still cleaned up
        assert_eq!(ctx.cleanup.as_ref().unwrap().len(), 1);
    }
}
