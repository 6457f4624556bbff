//! Apply: create the resource when missing, merge-patch it otherwise

use async_trait::async_trait;
use serde_json::Value;

use super::internal::{handle_check, identity, prepare, register_cleanup};
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::client::patch::create_merge_patch;
use crate::common::Result;
use crate::model::{Expectation, OperationKind, Output};
use crate::resource::ResourceExt;

pub struct Apply {
    resource: Value,
    expect: Vec<Expectation>,
    outputs: Vec<Output>,
}

impl Apply {
    pub fn new(resource: Value, expect: Vec<Expectation>, outputs: Vec<Output>) -> Self {
        Self {
            resource,
            expect,
            outputs,
        }
    }

    async fn attempt(&self, ctx: &OperationContext, desired: &Value) -> Result<Outputs> {
        let key = desired.object_key();
        match ctx.client.get(&key).await {
            Err(e) if e.is_not_found() => match ctx.client.create(desired).await {
                Ok(created) => {
                    register_cleanup(ctx, &created);
                    handle_check(ctx, &created, &self.expect, &self.outputs, None)
                }
                Err(e) => handle_check(ctx, desired, &self.expect, &self.outputs, Some(e.into())),
            },
            Err(e) => Err(e.into()),
            Ok(current) => {
                let patch = create_merge_patch(&current, desired);
                match ctx.client.patch(&key, &patch).await {
                    Ok(patched) => handle_check(ctx, &patched, &self.expect, &self.outputs, None),
                    Err(e) => {
                        handle_check(ctx, desired, &self.expect, &self.outputs, Some(e.into()))
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Reconciler for Apply {
    fn kind(&self) -> OperationKind {
        OperationKind::Apply
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
