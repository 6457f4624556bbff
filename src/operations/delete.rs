//! Delete: remove matching resources and wait until they are gone

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::internal::{candidates, handle_check, identity, prepare};
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::client::DeletionPropagation;
use crate::common::{Error, Result};
use crate::model::{Expectation, OperationKind};
use crate::resource::ResourceExt;

pub struct Delete {
    resource: Value,
    expect: Vec<Expectation>,
    propagation: Option<DeletionPropagation>,
}

impl Delete {
    pub fn new(
        resource: Value,
        expect: Vec<Expectation>,
        propagation: Option<DeletionPropagation>,
    ) -> Self {
        Self {
            resource,
            expect,
            propagation,
        }
    }

    /// Delete every candidate, returning the ones actually removed
    async fn delete_candidates(
        &self,
        ctx: &OperationContext,
        target: &Value,
    ) -> Result<(Vec<Value>, Vec<Error>)> {
        let propagation = self.propagation.unwrap_or(ctx.deletion_propagation);
        let found = ctx
            .retry
            .run(&ctx.cancel, || candidates(ctx, target))
            .await?;

        let mut deleted = Vec::new();
        let mut errors = Vec::new();
        for candidate in found {
            let key = candidate.object_key();
            let error = match ctx.client.delete(&key, propagation).await {
                Ok(()) => {
                    tracing::debug!(resource = %key, %propagation, "deleted");
                    deleted.push(candidate.clone());
                    None
                }
                Err(e) if e.is_not_found() => None,
                Err(e) => Some(e.into()),
            };
            if let Err(e) = handle_check(ctx, &candidate, &self.expect, &[], error) {
                errors.push(e);
            }
        }
        Ok((deleted, errors))
    }
}

#[async_trait]
impl Reconciler for Delete {
    fn kind(&self) -> OperationKind {
        OperationKind::Delete
    }

    fn target(&self) -> String {
        identity(&self.resource)
    }

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs> {
        let start = Instant::now();
        let target = prepare(ctx, &self.resource).await?;
        let (deleted, mut errors) = self.delete_candidates(ctx, &target).await?;

        let remaining = ctx.retry.timeout.saturating_sub(start.elapsed());
        let policy = ctx.retry.with_timeout(remaining);
        for object in &deleted {
            let key = object.object_key();
            let gone = policy
                .run(&ctx.cancel, || async {
                    match ctx.client.get(&key).await {
                        Ok(_) => Err(Error::WaitNotSatisfied(format!("{key} is still present"))),
                        Err(e) if e.is_not_found() => Ok(()),
                        Err(e) => Err(e.into()),
                    }
                })
                .await;
            if let Err(e) = gone {
                errors.push(e);
            }
        }

        match errors.len() {
            0 => Ok(Outputs::new()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}
