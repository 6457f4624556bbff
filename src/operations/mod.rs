//! Operation reconcilers
//!
//! Each operation kind has a reconciler that drives one target toward the
//! declared state. Reconcilers that talk to the cluster run inside the
//! shared [`RetryPolicy`](retry::RetryPolicy) so transient failures and
//! eventual consistency are absorbed until the operation deadline.

pub mod apply;
pub mod assert;
pub mod command;
pub mod create;
pub mod delete;
pub mod error;
pub mod errors;
pub mod internal;
pub mod kubectl;
pub mod patch;
pub mod retry;
pub mod script;
pub mod sleep;
pub mod update;
pub mod wait;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::bindings::{Bindings, Outputs};
use crate::cleanup::CleanupQueue;
use crate::client::{Client, DeletionPropagation};
use crate::clusters::ApiConfig;
use crate::common::Result;
use crate::expressions::Evaluator;
use crate::model::{loader, ObjectReference, Operation, OperationKind};
use crate::namespacer::Namespacer;
use retry::RetryPolicy;

/// Everything a reconciler needs from its surroundings
#[derive(Clone)]
pub struct OperationContext {
    pub evaluator: Arc<dyn Evaluator>,
    pub bindings: Bindings,
    pub client: Arc<dyn Client>,
    pub cluster: ApiConfig,
    pub namespacer: Option<Namespacer>,
    /// `None` when created resources must be kept
    pub cleanup: Option<CleanupQueue>,
    pub template: bool,
    pub retry: RetryPolicy,
    pub deletion_propagation: DeletionPropagation,
    /// Directory of the test document, used as the working directory
    pub base_path: PathBuf,
    pub cancel: CancellationToken,
}

/// Per-kind execution logic
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Human readable target, used in events and reports
    fn target(&self) -> String;

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs>;
}

/// Resources named by `file` or given inline
fn sources(base: &Path, file: Option<&str>, resource: Option<&Value>) -> Result<Vec<Value>> {
    match (file, resource) {
        (Some(file), _) => loader::load_resources(base, file),
        (None, Some(resource)) => Ok(vec![resource.clone()]),
        (None, None) => Ok(vec![]),
    }
}

fn reference_object(reference: &ObjectReference) -> Value {
    let mut metadata = Map::new();
    if let Some(name) = &reference.name {
        metadata.insert("name".into(), json!(name));
    }
    if let Some(namespace) = &reference.namespace {
        metadata.insert("namespace".into(), json!(namespace));
    }
    if !reference.labels.is_empty() {
        metadata.insert("labels".into(), json!(reference.labels));
    }
    json!({
        "apiVersion": reference.api_version,
        "kind": reference.kind,
        "metadata": metadata,
    })
}

/// Turn an operation into reconcilers, one per target resource
pub fn build(operation: &Operation, base: &Path) -> Result<Vec<Box<dyn Reconciler>>> {
    let reconcilers: Vec<Box<dyn Reconciler>> = match operation {
        Operation::Apply(op) => sources(base, op.file.as_deref(), op.resource.as_ref())?
            .into_iter()
            .map(|r| Box::new(apply::Apply::new(r, op.expect.clone(), op.outputs.clone())) as Box<dyn Reconciler>)
            .collect(),
        Operation::Create(op) => sources(base, op.file.as_deref(), op.resource.as_ref())?
            .into_iter()
            .map(|r| Box::new(create::Create::new(r, op.expect.clone(), op.outputs.clone())) as Box<dyn Reconciler>)
            .collect(),
        Operation::Patch(op) => sources(base, op.file.as_deref(), op.resource.as_ref())?
            .into_iter()
            .map(|r| Box::new(patch::Patch::new(r, op.expect.clone(), op.outputs.clone())) as Box<dyn Reconciler>)
            .collect(),
        Operation::Update(op) => sources(base, op.file.as_deref(), op.resource.as_ref())?
            .into_iter()
            .map(|r| Box::new(update::Update::new(r, op.expect.clone(), op.outputs.clone())) as Box<dyn Reconciler>)
            .collect(),
        Operation::Assert(op) => sources(base, op.file.as_deref(), op.resource.as_ref())?
            .into_iter()
            .map(|r| Box::new(assert::Assert::new(r)) as Box<dyn Reconciler>)
            .collect(),
        Operation::Error(op) => sources(base, op.file.as_deref(), op.resource.as_ref())?
            .into_iter()
            .map(|r| Box::new(error::Refute::new(r)) as Box<dyn Reconciler>)
            .collect(),
        Operation::Delete(op) => {
            let targets = match &op.reference {
                Some(reference) => vec![reference_object(reference)],
                None => sources(base, op.file.as_deref(), op.resource.as_ref())?,
            };
            targets
                .into_iter()
                .map(|r| {
                    Box::new(delete::Delete::new(r, op.expect.clone(), op.deletion_propagation_policy))
                        as Box<dyn Reconciler>
                })
                .collect()
        }
        Operation::Wait(op) => vec![Box::new(wait::Wait::new(op.clone()))],
        Operation::Command(op) => vec![Box::new(command::Command::new(op.clone()))],
        Operation::Script(op) => vec![Box::new(script::Script::new(op.clone()))],
        Operation::Sleep(op) => vec![Box::new(sleep::Sleep::new(op.duration))],
        Operation::Get(op) => vec![Box::new(kubectl::Kubectl::new(kubectl::Request::Get(op.clone())))],
        Operation::Describe(op) => {
            vec![Box::new(kubectl::Kubectl::new(kubectl::Request::Describe(op.clone())))]
        }
        Operation::Events(op) => {
            vec![Box::new(kubectl::Kubectl::new(kubectl::Request::Events(op.clone())))]
        }
        Operation::PodLogs(op) => {
            vec![Box::new(kubectl::Kubectl::new(kubectl::Request::PodLogs(op.clone())))]
        }
        Operation::Proxy(op) => vec![Box::new(kubectl::Kubectl::new(kubectl::Request::Proxy(op.clone())))],
    };
    Ok(reconcilers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TryOperation;

    #[test]
    fn test_build_expands_multi_document_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("maps.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n",
        )
        .unwrap();
        let entry: TryOperation =
            serde_json::from_value(json!({"apply": {"file": "maps.yaml"}})).unwrap();
        let reconcilers = build(&entry.operation, dir.path()).unwrap();
        assert_eq!(reconcilers.len(), 2);
        assert_eq!(reconcilers[0].kind(), OperationKind::Apply);
        assert!(reconcilers[1].target().contains("ConfigMap"));
    }

    #[test]
    fn test_delete_reference_becomes_object() {
        let entry: TryOperation = serde_json::from_value(json!({"delete": {"ref": {
            "apiVersion": "v1",
            "kind": "Pod",
            "labels": {"app": "web"}
        }}}))
        .unwrap();
        let reconcilers = build(&entry.operation, Path::new(".")).unwrap();
        assert_eq!(reconcilers.len(), 1);
        assert_eq!(reconcilers[0].kind(), OperationKind::Delete);
    }
}
