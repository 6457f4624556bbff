//! Test execution
//!
//! The [`Runner`] turns loaded tests into a [`Report`]. Each level of the
//! hierarchy has its own executor:
//!
//! - [`scheduler`] bounds how many tests run at once
//! - [`test`] owns the namespace and tears steps down
//! - [`step`] drives the try, catch and finally lists
//! - [`operation`] runs one entry and records it

pub mod context;
pub mod events;
pub mod operation;
pub mod scheduler;
pub mod step;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use context::ExecContext;
pub use events::{EventSink, EventStatus, OperationEvent, RecordingSink, TracingSink};
pub use test::TestOptions;

use crate::bindings::Bindings;
use crate::clusters::Registry;
use crate::common::config::Config;
use crate::expressions::{Evaluator, Jmes};
use crate::model::Test;
use crate::report::Report;

pub struct Runner {
    ctx: ExecContext,
    options: TestOptions,
    parallel: usize,
    name: String,
}

impl Runner {
    /// Runner for `config` over the clusters in `registry`
    ///
    /// Clusters named in the configuration are added to the registry.
    pub fn new(config: &Config, registry: Registry, sink: Arc<dyn EventSink>, cancel: CancellationToken) -> Self {
        let base_path = PathBuf::from(".");
        let registry = registry.register_specs(&config.clusters, &base_path);
        let evaluator: Arc<dyn Evaluator> = Arc::new(Jmes::default());
        let ctx = ExecContext {
            evaluator,
            registry,
            sink,
            bindings: Bindings::new().register("values", Value::Object(Default::default())),
            cluster: None,
            timeouts: config.timeouts,
            poll_interval: config.execution.poll_interval,
            template: config.templating.enabled,
            skip_delete: config.cleanup.skip_delete,
            deletion_propagation: config.deletion.propagation,
            namespacer: None,
            cleanup: None,
            base_path,
            cancel,
            test: String::new(),
            step: String::new(),
        };
        Self {
            ctx,
            options: TestOptions {
                fail_fast: config.execution.fail_fast,
                namespace: config.namespace.name.clone(),
                namespace_template: config.namespace.template.clone(),
                delay_before_cleanup: config.cleanup.delay_before_cleanup,
            },
            parallel: config.execution.parallel,
            name: config.report.name.clone(),
        }
    }

    /// Expose external values to every test as `$values`
    pub fn with_values(self, values: Value) -> Self {
        Self {
            ctx: self.ctx.with_binding("values", values),
            ..self
        }
    }

    /// Run every test and collect the report
    pub async fn run(&self, tests: Vec<Test>) -> Report {
        let mut report = Report::new(self.name.clone());
        tracing::info!(tests = tests.len(), parallel = self.parallel, "starting run");
        report.tests = scheduler::schedule(self.ctx.clone(), tests, self.options.clone(), self.parallel).await;
        report.finish();
        let summary = report.summary();
        tracing::info!(
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, MemoryClient};
    use crate::clusters::{ApiConfig, Cluster, DEFAULT_CLUSTER};
    use serde_json::json;

    #[tokio::test]
    async fn test_runner_uses_configuration() {
        let memory = Arc::new(MemoryClient::new());
        let client: Arc<dyn Client> = memory.clone();
        let registry = Registry::default().register(
            DEFAULT_CLUSTER,
            Arc::new(Cluster::from_client(ApiConfig::default(), client)),
        );
        let config = Config::parse(
            r#"
            [namespace]
            name = "configured"

            [cleanup]
            skip_delete = true

            [report]
            name = "nightly"
            "#,
        )
        .unwrap();
        let sink = Arc::new(RecordingSink::new());
        let runner = Runner::new(&config, registry, sink.clone(), CancellationToken::new());
        let test: Test = serde_json::from_value(json!({
            "apiVersion": "chainsaw.kyverno.io/v1alpha1",
            "kind": "Test",
            "metadata": {"name": "configured"},
            "spec": {"steps": [{"try": [{"create": {"resource": {
                "apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "kept"}
            }}}]}]}
        }))
        .unwrap();

        let report = runner.run(vec![test]).await;
        assert_eq!(report.name, "nightly");
        assert_eq!(report.summary().passed, 1);
        assert_eq!(report.tests[0].namespace.as_deref(), Some("configured"));
        // namespace and config map both kept
        assert_eq!(memory.objects().len(), 2);
        assert!(!sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_values_are_bound() {
        let memory = Arc::new(MemoryClient::new());
        let client: Arc<dyn Client> = memory.clone();
        let registry = Registry::default().register(
            DEFAULT_CLUSTER,
            Arc::new(Cluster::from_client(ApiConfig::default(), client)),
        );
        let config = Config::parse("[cleanup]\nskip_delete = true\n").unwrap();
        let runner = Runner::new(&config, registry, Arc::new(RecordingSink::new()), CancellationToken::new())
            .with_values(json!({"app": {"name": "web"}}));
        let test: Test = serde_json::from_value(json!({
            "apiVersion": "chainsaw.kyverno.io/v1alpha1",
            "kind": "Test",
            "metadata": {"name": "values"},
            "spec": {"steps": [{"try": [{"create": {"resource": {
                "apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "($values.app.name)"}
            }}}]}]}
        }))
        .unwrap();

        let report = runner.run(vec![test]).await;
        assert_eq!(report.summary().passed, 1, "{:?}", report.tests[0].failure());
        let namespace = report.tests[0].namespace.clone().unwrap();
        let key = crate::client::ObjectKey::new("v1", "ConfigMap", Some(namespace.as_str()), "web");
        assert!(memory.object(&key).is_some());
    }
}
