//! Bounded test scheduling
//!
//! Concurrent tests share a pool of `parallel` slots. Tests that opt out
//! of concurrency run afterwards, one at a time. Reports keep the input
//! order whatever the completion order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::context::ExecContext;
use super::test::{run_test, TestOptions};
use crate::model::Test;
use crate::report::{Status, TestReport};

/// Shared state of one scheduling pass
struct Shared {
    ctx: ExecContext,
    options: TestOptions,
    /// Set once any test failed, for run-wide fail-fast
    failed: AtomicBool,
}

impl Shared {
    async fn run(&self, test: &Test, index: usize) -> TestReport {
        if self.options.fail_fast && self.failed.load(Ordering::SeqCst) {
            tracing::info!(test = %test.metadata.name, "skipped after an earlier failure");
            let mut report = TestReport::new(
                test.metadata.name.clone(),
                &test.base_path,
                test.spec.concurrent.unwrap_or(true),
            );
            report.skipped = true;
            report.finish();
            return report;
        }
        let ctx = ExecContext {
            cancel: self.ctx.cancel.child_token(),
            ..self.ctx.clone()
        };
        let report = run_test(&ctx, test, index, &self.options).await;
        if report.status() == Status::Failed {
            self.failed.store(true, Ordering::SeqCst);
        }
        report
    }
}

fn lost(test: &Test) -> TestReport {
    let mut report = TestReport::new(test.metadata.name.clone(), &test.base_path, true);
    report.error = Some("test task terminated unexpectedly".to_string());
    report.finish();
    report
}

/// Run `tests` and return their reports in input order
pub async fn schedule(
    ctx: ExecContext,
    tests: Vec<Test>,
    options: TestOptions,
    parallel: usize,
) -> Vec<TestReport> {
    let tests: Vec<Arc<Test>> = tests.into_iter().map(Arc::new).collect();
    let mut reports: Vec<TestReport> = tests.iter().map(|test| lost(test)).collect();
    let shared = Arc::new(Shared {
        ctx,
        options,
        failed: AtomicBool::new(false),
    });
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));

    let mut joins = JoinSet::new();
    for (index, test) in tests.iter().enumerate() {
        if test.spec.concurrent == Some(false) {
            continue;
        }
        let shared = shared.clone();
        let semaphore = semaphore.clone();
        let test = test.clone();
        joins.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (index, shared.run(&test, index).await)
        });
    }
    while let Some(result) = joins.join_next().await {
        match result {
            Ok((index, report)) => reports[index] = report,
            Err(e) => tracing::error!(error = %e, "test task failed"),
        }
    }

    for (index, test) in tests.iter().enumerate() {
        if test.spec.concurrent == Some(false) {
            reports[index] = shared.run(test, index).await;
        }
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::runner::context::testing::context;
    use crate::runner::events::RecordingSink;
    use serde_json::json;

    fn test(name: &str, concurrent: bool, steps: serde_json::Value) -> Test {
        serde_json::from_value(json!({
            "apiVersion": "chainsaw.kyverno.io/v1alpha1",
            "kind": "Test",
            "metadata": {"name": name},
            "spec": {"concurrent": concurrent, "steps": steps}
        }))
        .unwrap()
    }

    fn sleeping(name: &str, concurrent: bool) -> Test {
        test(name, concurrent, json!([{"try": [{"sleep": {"duration": "10ms"}}]}]))
    }

    #[tokio::test]
    async fn test_reports_keep_input_order() {
        let ctx = context(Arc::new(MemoryClient::new()), Arc::new(RecordingSink::new()));
        let tests = vec![
            sleeping("a", true),
            sleeping("b", false),
            sleeping("c", true),
        ];
        let reports = schedule(ctx, tests, TestOptions::default(), 2).await;
        let names: Vec<_> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(reports.iter().all(|r| r.status() == Status::Passed));
        assert!(!reports[1].concurrent);
    }

    #[tokio::test]
    async fn test_run_wide_fail_fast() {
        let ctx = context(Arc::new(MemoryClient::new()), Arc::new(RecordingSink::new()));
        let failing = test(
            "failing",
            false,
            json!([{"try": [{"assert": {"resource": {
                "apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "missing"}
            }}}]}]),
        );
        let tests = vec![failing, sleeping("after", false)];
        let options = TestOptions {
            fail_fast: true,
            ..Default::default()
        };
        let reports = schedule(ctx, tests, options, 1).await;
        assert_eq!(reports[0].status(), Status::Failed);
        assert_eq!(reports[1].status(), Status::Skipped);
    }

    #[tokio::test]
    async fn test_cancellation_reaches_running_tests() {
        let ctx = context(Arc::new(MemoryClient::new()), Arc::new(RecordingSink::new()));
        let cancel = ctx.cancel.clone();
        let tests = vec![test(
            "long",
            true,
            json!([{"try": [{"sleep": {"duration": "1h"}}]}]),
        )];
        let handle = tokio::spawn(schedule(ctx, tests, TestOptions::default(), 1));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        let reports = handle.await.unwrap();
        assert_eq!(reports[0].status(), Status::Failed);
    }
}
