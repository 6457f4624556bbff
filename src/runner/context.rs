//! Execution scope handed from the runner to tests, steps and operations
//!
//! An [`ExecContext`] is a value: every level derives a new one with its
//! own bindings, cluster selection and overrides, and the parent is never
//! touched. Only the cleanup queue is shared, and it is replaced per step.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::events::EventSink;
use crate::bindings::{register_bindings, register_outputs, Bindings, Outputs};
use crate::cleanup::CleanupQueue;
use crate::client::DeletionPropagation;
use crate::clusters::Registry;
use crate::common::config::Timeouts;
use crate::common::Result;
use crate::expressions::Evaluator;
use crate::model::{Binding, ClusterSelection, ClusterSpec, OperationKind, TimeoutsSpec};
use crate::namespacer::Namespacer;
use crate::operations::retry::RetryPolicy;
use crate::operations::OperationContext;

#[derive(Clone)]
pub struct ExecContext {
    pub evaluator: Arc<dyn Evaluator>,
    pub registry: Registry,
    pub sink: Arc<dyn EventSink>,
    pub bindings: Bindings,
    /// Selected cluster, `None` for the default one
    pub cluster: Option<String>,
    pub timeouts: Timeouts,
    pub poll_interval: Duration,
    pub template: bool,
    pub skip_delete: bool,
    pub deletion_propagation: DeletionPropagation,
    pub namespacer: Option<Namespacer>,
    pub cleanup: Option<CleanupQueue>,
    pub base_path: PathBuf,
    pub cancel: CancellationToken,
    pub test: String,
    pub step: String,
}

impl ExecContext {
    /// Register declared bindings, each visible to the next
    pub fn with_bindings(&self, declared: &[Binding]) -> Result<Self> {
        if declared.is_empty() {
            return Ok(self.clone());
        }
        let bindings =
            register_bindings(self.evaluator.as_ref(), &self.bindings, &Value::Null, declared)?;
        Ok(Self {
            bindings,
            ..self.clone()
        })
    }

    pub fn with_binding(&self, name: &str, value: Value) -> Self {
        Self {
            bindings: self.bindings.register(name, value),
            ..self.clone()
        }
    }

    pub fn with_outputs(&self, outputs: &Outputs) -> Self {
        Self {
            bindings: register_outputs(&self.bindings, outputs),
            ..self.clone()
        }
    }

    /// Register additional clusters and switch to `cluster` when given
    pub fn with_clusters(
        &self,
        clusters: &BTreeMap<String, ClusterSpec>,
        cluster: Option<&String>,
    ) -> Self {
        let registry = if clusters.is_empty() {
            self.registry.clone()
        } else {
            self.registry.register_specs(clusters, &self.base_path)
        };
        Self {
            registry,
            cluster: cluster.cloned().or_else(|| self.cluster.clone()),
            ..self.clone()
        }
    }

    pub fn with_timeouts(&self, spec: &TimeoutsSpec) -> Self {
        Self {
            timeouts: self.timeouts.combine(spec),
            ..self.clone()
        }
    }

    pub fn with_overrides(
        &self,
        template: Option<bool>,
        skip_delete: Option<bool>,
        propagation: Option<DeletionPropagation>,
    ) -> Self {
        Self {
            template: template.unwrap_or(self.template),
            skip_delete: skip_delete.unwrap_or(self.skip_delete),
            deletion_propagation: propagation.unwrap_or(self.deletion_propagation),
            ..self.clone()
        }
    }

    /// Queue receiving resources created from now on, unless they are kept
    pub fn with_cleanup(&self, queue: CleanupQueue) -> Self {
        Self {
            cleanup: (!self.skip_delete).then_some(queue),
            ..self.clone()
        }
    }

    /// Concrete context for one operation
    ///
    /// The deadline is the operation's own timeout, else the configured one
    /// for its kind after test and step overrides.
    pub fn operation(
        &self,
        kind: OperationKind,
        timeout: Option<Duration>,
        template: Option<bool>,
        selection: Option<&ClusterSelection>,
    ) -> Result<OperationContext> {
        let scope = match selection {
            Some(selection) => self.with_clusters(&selection.clusters, selection.cluster.as_ref()),
            None => self.clone(),
        };
        let (cluster, client) = scope.registry.resolve(scope.cluster.as_deref())?;
        let timeout = timeout.unwrap_or_else(|| self.timeouts.for_kind(kind));
        Ok(OperationContext {
            evaluator: self.evaluator.clone(),
            bindings: self.bindings.clone(),
            client,
            cluster,
            namespacer: self.namespacer.clone(),
            cleanup: self.cleanup.clone(),
            template: template.unwrap_or(self.template),
            retry: RetryPolicy::new(self.poll_interval, timeout),
            deletion_propagation: self.deletion_propagation,
            base_path: self.base_path.clone(),
            cancel: self.cancel.clone(),
        })
    }

    pub fn cleanup_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.poll_interval, self.timeouts.cleanup)
    }
}
