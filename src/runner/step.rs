//! Step executor
//!
//! A step moves through its lists in a fixed order:
//!
//! ```text
//! Idle -> RunningTry -> Succeeded ------------> RunningFinally -> Terminated
//!                    \-> RunningCatch -------/
//! ```
//!
//! Cleanup is not part of the step lifecycle. The test executor tears
//! executed steps down in reverse order once every step has run.

use std::fmt;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::context::ExecContext;
use super::operation;
use crate::cleanup::CleanupQueue;
use crate::model::{CatchFinally, Operation, OperationKind, TestStep};
use crate::report::{OperationReport, Section, StepReport};

/// Lifecycle of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Idle,
    RunningTry,
    Succeeded,
    RunningCatch,
    RunningFinally,
    Terminated,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepState::Idle => "idle",
            StepState::RunningTry => "try",
            StepState::Succeeded => "succeeded",
            StepState::RunningCatch => "catch",
            StepState::RunningFinally => "finally",
            StepState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// An executed step awaiting teardown
pub struct StepRun {
    pub report: StepReport,
    pub state: StepState,
    /// Step scope including try outputs, used by cleanup items
    scope: Option<ExecContext>,
    queue: CleanupQueue,
    cleanup: Vec<CatchFinally>,
}

impl StepRun {
    fn skipped(name: String) -> Self {
        let mut report = StepReport::new(name);
        report.skipped = true;
        report.finish();
        Self {
            report,
            state: StepState::Terminated,
            scope: None,
            queue: CleanupQueue::new(),
            cleanup: Vec::new(),
        }
    }

    pub fn failed(&self) -> bool {
        self.report.failed()
    }

    /// Run cleanup items, then delete what the step created
    ///
    /// Teardown ignores cancellation of the test so that a cancelled run
    /// still removes its resources.
    pub async fn teardown(&mut self) {
        let Some(scope) = self.scope.take() else {
            return;
        };
        let scope = ExecContext {
            cancel: CancellationToken::new(),
            cleanup: None,
            ..scope
        };
        for item in &self.cleanup {
            let op = Operation::from(item.action.clone());
            let _ = operation::run(&scope, &op, item.label(), Section::Cleanup, &mut self.report.operations).await;
        }
        if self.queue.is_empty() {
            return;
        }
        let failures = self
            .queue
            .run(scope.deletion_propagation, scope.cleanup_policy(), &scope.cancel)
            .await;
        let now = chrono::Utc::now();
        for (resource, error) in failures {
            self.report.operations.push(OperationReport {
                name: format!("delete {resource}"),
                kind: OperationKind::Delete,
                section: Section::Cleanup,
                start_time: now,
                end_time: now,
                error: Some(error.to_string()),
                outputs: Default::default(),
            });
        }
        self.report.finish();
    }
}

struct StepExecutor<'a> {
    step: &'a TestStep,
    test_catch: &'a [CatchFinally],
    state: StepState,
    report: StepReport,
}

impl<'a> StepExecutor<'a> {
    fn transition(&mut self, next: StepState) {
        tracing::debug!(step = %self.report.name, from = %self.state, to = %next, "step state");
        self.state = next;
    }

    /// Derive the step scope from the test scope
    fn scope(&self, ctx: &ExecContext, index: usize) -> crate::common::Result<ExecContext> {
        let spec = &self.step.spec;
        let scope = ctx
            .with_timeouts(&spec.timeouts)
            .with_clusters(&spec.clusters, spec.cluster.as_ref())
            .with_overrides(spec.template, spec.skip_delete, spec.deletion_propagation_policy)
            .with_binding("step", json!({"id": index + 1, "name": self.report.name}));
        let scope = ExecContext {
            step: self.report.name.clone(),
            ..scope
        };
        scope.with_bindings(&spec.bindings)
    }

    async fn run_items(&mut self, scope: &ExecContext, items: &[CatchFinally], section: Section) {
        for item in items {
            let op = Operation::from(item.action.clone());
            if let Err(e) = operation::run(scope, &op, item.label(), section, &mut self.report.operations).await {
                tracing::warn!(step = %self.report.name, item = %item.label(), error = %e, "{section:?} item failed");
            }
        }
    }

    async fn run(mut self, ctx: &ExecContext, index: usize) -> StepRun {
        let queue = CleanupQueue::new();
        let mut scope = match self.scope(ctx, index) {
            Ok(scope) => scope.with_cleanup(queue.clone()),
            Err(e) => {
                tracing::error!(step = %self.report.name, error = %e, "failed to prepare step");
                self.report.error = Some(e.to_string());
                self.transition(StepState::Terminated);
                self.report.finish();
                return StepRun {
                    report: self.report,
                    state: self.state,
                    scope: None,
                    queue,
                    cleanup: Vec::new(),
                };
            }
        };

        self.transition(StepState::RunningTry);
        let mut failed = false;
        for entry in &self.step.spec.try_ops {
            let name = entry
                .description
                .clone()
                .unwrap_or_else(|| entry.operation.kind().to_string());
            match operation::run(&scope, &entry.operation, name, Section::Try, &mut self.report.operations).await {
                Ok(outputs) => scope = scope.with_outputs(&outputs),
                Err(e) => {
                    failed = true;
                    if entry.continue_on_error == Some(true) {
                        tracing::warn!(step = %self.report.name, error = %e, "operation failed, continuing");
                        continue;
                    }
                    break;
                }
            }
        }

        if failed {
            self.transition(StepState::RunningCatch);
            let items: Vec<CatchFinally> = self
                .test_catch
                .iter()
                .chain(&self.step.spec.catch)
                .cloned()
                .collect();
            self.run_items(&scope, &items, Section::Catch).await;
        } else {
            self.transition(StepState::Succeeded);
        }

        self.transition(StepState::RunningFinally);
        let finally = self.step.spec.finally.clone();
        self.run_items(&scope, &finally, Section::Finally).await;

        self.transition(StepState::Terminated);
        self.report.finish();
        StepRun {
            report: self.report,
            state: self.state,
            scope: Some(scope),
            queue,
            cleanup: self.step.spec.cleanup.clone(),
        }
    }
}

/// Default name of the step at `index`
pub fn step_name(step: &TestStep, index: usize) -> String {
    step.name
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("step-{}", index + 1))
}

/// Run one step of a test
///
/// `test_catch` holds the test level catch items, which run before the
/// step's own when the step fails.
pub async fn run_step(
    ctx: &ExecContext,
    step: &TestStep,
    index: usize,
    test_catch: &[CatchFinally],
) -> StepRun {
    let name = step_name(step, index);
    if step.spec.skip == Some(true) {
        tracing::info!(test = %ctx.test, step = %name, "step skipped");
        return StepRun::skipped(name);
    }
    let executor = StepExecutor {
        step,
        test_catch,
        state: StepState::Idle,
        report: StepReport::new(name),
    };
    executor.run(ctx, index).await
}

/// Mark a step as skipped without running it
pub fn skip_step(step: &TestStep, index: usize) -> StepRun {
    StepRun::skipped(step_name(step, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryClient, Verb};
    use crate::runner::context::testing::context;
    use crate::runner::events::RecordingSink;
    use serde_json::Value;
    use std::sync::Arc;

    fn step(value: Value) -> TestStep {
        serde_json::from_value(value).unwrap()
    }

    fn configmap(name: &str) -> Value {
        json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name, "namespace": "ns"}})
    }

    fn sections(run: &StepRun) -> Vec<(Section, bool)> {
        run.report
            .operations
            .iter()
            .map(|op| (op.section, op.error.is_some()))
            .collect()
    }

    #[tokio::test]
    async fn test_successful_step_skips_catch() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "try": [{"apply": {"resource": configmap("a")}}],
            "catch": [{"sleep": {"duration": "1ms"}}],
            "finally": [{"sleep": {"duration": "1ms"}}]
        }));
        let run = run_step(&ctx, &step, 0, &[]).await;
        assert_eq!(run.report.name, "step-1");
        assert_eq!(run.state, StepState::Terminated);
        assert!(!run.failed());
        assert_eq!(sections(&run), vec![(Section::Try, false), (Section::Finally, false)]);
    }

    #[tokio::test]
    async fn test_failure_runs_test_then_step_catch() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "name": "broken",
            "try": [
                {"assert": {"resource": configmap("missing")}},
                {"apply": {"resource": configmap("never")}}
            ],
            "catch": [{"description": "step catch", "sleep": {"duration": "1ms"}}]
        }));
        let test_catch: Vec<CatchFinally> =
            serde_json::from_value(json!([{"description": "test catch", "sleep": {"duration": "1ms"}}])).unwrap();

        let run = run_step(&ctx, &step, 3, &test_catch).await;
        assert!(run.failed());
        let names: Vec<_> = run.report.operations.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["assert", "test catch", "step catch"]);
        assert_eq!(memory.calls(Verb::Create), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_catch_outputs_are_reported() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "try": [{"assert": {"resource": configmap("missing")}}],
            "catch": [{"command": {
                "entrypoint": "echo",
                "args": ["diagnostics"],
                "outputs": [{"name": "dump", "value": "(trim_space($stdout))"}]
            }}]
        }));
        let run = run_step(&ctx, &step, 0, &[]).await;
        let catch = &run.report.operations[1];
        assert_eq!(catch.section, Section::Catch);
        assert_eq!(catch.outputs["dump"], json!("diagnostics"));
        assert!(run.report.operations[0].outputs.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_items_do_not_stop_their_list() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "try": [{"assert": {"resource": configmap("missing")}}],
            "catch": [
                {"command": {"entrypoint": "false"}},
                {"sleep": {"duration": "1ms"}}
            ],
            "finally": [
                {"command": {"entrypoint": "false"}},
                {"sleep": {"duration": "1ms"}}
            ]
        }));
        let run = run_step(&ctx, &step, 0, &[]).await;
        assert_eq!(
            sections(&run),
            vec![
                (Section::Try, true),
                (Section::Catch, true),
                (Section::Catch, false),
                (Section::Finally, true),
                (Section::Finally, false),
            ]
        );
        assert_eq!(run.state, StepState::Terminated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_catch_outputs_stay_out_of_finally() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "try": [{"assert": {"resource": configmap("missing")}}],
            "catch": [{"command": {
                "entrypoint": "echo",
                "args": ["collected"],
                "outputs": [{"name": "diag", "value": "(trim_space($stdout))"}]
            }}],
            "finally": [{"command": {
                "entrypoint": "echo",
                "env": [{"name": "DIAG", "value": "($diag)"}]
            }}]
        }));
        let run = run_step(&ctx, &step, 0, &[]).await;
        let operations = &run.report.operations;
        assert_eq!(operations[1].outputs["diag"], json!("collected"));
        assert_eq!(operations[2].section, Section::Finally);
        let error = operations[2].error.as_deref().unwrap();
        assert!(error.contains("$diag"), "{error}");
    }

    #[tokio::test]
    async fn test_continue_on_error() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "try": [
                {"continueOnError": true, "assert": {"resource": configmap("missing")}},
                {"apply": {"resource": configmap("after")}}
            ]
        }));
        let run = run_step(&ctx, &step, 0, &[]).await;
        assert!(run.failed());
        assert_eq!(memory.calls(Verb::Create), 1);
    }

    #[tokio::test]
    async fn test_try_outputs_flow_to_later_operations_only() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "try": [
                {"apply": {
                    "resource": configmap("first"),
                    "outputs": [{"name": "suffix", "value": "('second')"}]
                }},
                {"apply": {"resource": configmap("($suffix)")}}
            ]
        }));
        let run = run_step(&ctx, &step, 0, &[]).await;
        assert!(!run.failed(), "{:?}", run.report);
        let names: Vec<_> = memory
            .objects()
            .iter()
            .map(|o| o["metadata"]["name"].clone())
            .collect();
        assert!(names.contains(&json!("second")));
        assert!(ctx.bindings.get("suffix").is_none());
    }

    #[tokio::test]
    async fn test_teardown_deletes_created_resources() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "try": [{"create": {"resource": configmap("a")}}],
            "cleanup": [{"sleep": {"duration": "1ms"}}]
        }));
        let mut run = run_step(&ctx, &step, 0, &[]).await;
        assert_eq!(memory.objects().len(), 1);
        run.teardown().await;
        assert!(memory.objects().is_empty());
        assert_eq!(run.report.operations.last().map(|op| op.section), Some(Section::Cleanup));
        assert!(!run.failed());
    }

    #[tokio::test]
    async fn test_skip_delete_keeps_resources() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "skipDelete": true,
            "try": [{"create": {"resource": configmap("kept")}}]
        }));
        let mut run = run_step(&ctx, &step, 0, &[]).await;
        run.teardown().await;
        assert_eq!(memory.objects().len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_step() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({"skip": true, "try": [{"apply": {"resource": configmap("a")}}]}));
        let run = run_step(&ctx, &step, 1, &[]).await;
        assert!(run.report.skipped);
        assert_eq!(run.report.name, "step-2");
        assert_eq!(memory.calls(Verb::Create), 0);
    }

    #[tokio::test]
    async fn test_step_binding() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory.clone(), Arc::new(RecordingSink::new()));
        let step = step(json!({
            "name": "named",
            "try": [{"apply": {"resource": {
                "apiVersion": "v1", "kind": "ConfigMap",
                "metadata": {"name": "($step.name)", "namespace": "ns"}
            }}}]
        }));
        run_step(&ctx, &step, 0, &[]).await;
        assert_eq!(memory.objects()[0]["metadata"]["name"], json!("named"));
    }

    #[tokio::test]
    async fn test_invalid_binding_fails_step() {
        let memory = Arc::new(MemoryClient::new());
        let ctx = context(memory, Arc::new(RecordingSink::new()));
        let step = step(json!({
            "bindings": [{"name": "$bad name", "value": 1}],
            "try": []
        }));
        let run = run_step(&ctx, &step, 0, &[]).await;
        assert!(run.failed());
        assert!(run.report.error.is_some());
    }
}
