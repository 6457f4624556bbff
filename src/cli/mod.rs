//! CLI command handling
//!
//! Loads configuration and tests, runs them and prints the summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::clusters::{Cluster, Registry, DEFAULT_CLUSTER};
use crate::commands::{Commands, TestArgs};
use crate::common::config::Config;
use crate::common::paths;
use crate::common::{Error, Result};
use crate::model::loader;
use crate::model::values as model_values;
use crate::model::{Test, TimeoutsSpec};
use crate::report::{self, Report, Status};
use crate::runner::{Runner, TracingSink};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Test(args) => run_tests(args, cancel).await,
        Commands::Lint { paths, config } => {
            let config = Config::load(config.as_deref())?;
            let tests = load_tests(&paths, &config.discovery.test_file)?;
            println!("{} test(s) are valid", tests.len());
            Ok(())
        }
    }
}

/// Apply command line flags on top of the configuration file
pub fn apply_overrides(config: &mut Config, args: &TestArgs) {
    if let Some(parallel) = args.parallel {
        config.execution.parallel = parallel.max(1);
    }
    if let Some(interval) = args.poll_interval {
        config.execution.poll_interval = interval;
    }
    if args.fail_fast {
        config.execution.fail_fast = true;
    }
    if args.skip_delete {
        config.cleanup.skip_delete = true;
    }
    if args.no_template {
        config.templating.enabled = false;
    }
    if let Some(delay) = args.delay_before_cleanup {
        config.cleanup.delay_before_cleanup = Some(delay);
    }
    if let Some(propagation) = args.deletion_propagation {
        config.deletion.propagation = propagation;
    }
    if let Some(namespace) = &args.namespace {
        config.namespace.name = Some(namespace.clone());
    }
    config.timeouts = config.timeouts.combine(&TimeoutsSpec {
        apply: args.apply_timeout,
        assert: args.assert_timeout,
        cleanup: args.cleanup_timeout,
        delete: args.delete_timeout,
        error: args.error_timeout,
        exec: args.exec_timeout,
    });
    if let Some(format) = args.report_format {
        config.report.format = Some(format);
    }
    if let Some(path) = &args.report_path {
        config.report.path = path.clone();
    }
    if let Some(name) = &args.report_name {
        config.report.name = name.clone();
    }
}

/// Registry with the default cluster taken from the kubeconfig
fn default_registry(args: &TestArgs) -> Registry {
    let registry = Registry::default();
    match args.kube_config.clone().or_else(paths::default_kubeconfig) {
        Some(path) => {
            tracing::debug!(kubeconfig = %path.display(), context = ?args.kube_context, "default cluster");
            registry.register(
                DEFAULT_CLUSTER,
                Arc::new(Cluster::from_kubeconfig(path, args.kube_context.clone())),
            )
        }
        None => {
            tracing::warn!("no kubeconfig found, operations need an explicit cluster");
            registry
        }
    }
}

/// Discover and parse every test below `paths`
pub fn load_tests(paths: &[PathBuf], test_file: &str) -> Result<Vec<Test>> {
    let mut tests = Vec::new();
    for file in loader::discover(paths, test_file)? {
        tracing::debug!(file = %file.display(), "loading tests");
        tests.extend(loader::load_tests(&file)?);
    }
    Ok(tests)
}

/// Value files merged in order, then `--set` assignments
pub fn load_values(args: &TestArgs) -> Result<serde_json::Value> {
    let mut values = model_values::load(&args.values)?;
    for assignments in &args.set {
        model_values::set(&mut values, assignments)?;
    }
    Ok(values)
}

async fn run_tests(args: TestArgs, cancel: CancellationToken) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let tests = load_tests(&args.paths, &config.discovery.test_file)?;
    if tests.is_empty() {
        println!("No tests found");
        return Ok(());
    }
    println!("Running {} test(s)...", tests.len());

    let runner = Runner::new(&config, default_registry(&args), Arc::new(TracingSink), cancel)
        .with_values(load_values(&args)?);
    let report = runner.run(tests).await;

    print_summary(&report);
    if let Some(format) = config.report.format {
        let path = report::save(&report, format, &config.report.path, &config.report.name)?;
        println!("Report written to {}", path.display());
    }

    match report.summary().failed {
        0 => Ok(()),
        failed => Err(Error::TestsFailed(failed)),
    }
}

fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

fn print_summary(report: &Report) {
    println!();
    for test in &report.tests {
        match test.status() {
            Status::Passed => println!(
                "--- {}: {} ({})",
                "PASS".green().bold(),
                test.name,
                format_duration(test.duration())
            ),
            Status::Skipped => println!("--- {}: {}", "SKIP".yellow().bold(), test.name),
            Status::Failed => {
                println!(
                    "--- {}: {} ({})",
                    "FAIL".red().bold(),
                    test.name,
                    format_duration(test.duration())
                );
                if let Some(failure) = test.failure() {
                    println!("    {}", failure.red());
                }
            }
        }
    }

    let summary = report.summary();
    println!();
    println!("Tests Summary...");
    println!("- Passed  tests {}", summary.passed);
    println!("- Failed  tests {}", summary.failed);
    println!("- Skipped tests {}", summary.skipped);
    println!("Done in {}.", format_duration(report.duration()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DeletionPropagation;

    #[test]
    fn test_flags_override_configuration() {
        let mut config = Config::parse(
            r#"
            [timeouts]
            assert = "45s"

            [execution]
            parallel = 8
            "#,
        )
        .unwrap();
        let args = TestArgs {
            parallel: Some(2),
            skip_delete: true,
            exec_timeout: Some(Duration::from_secs(9)),
            deletion_propagation: Some(DeletionPropagation::Orphan),
            ..Default::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.execution.parallel, 2);
        assert!(config.cleanup.skip_delete);
        assert_eq!(config.timeouts.assert, Duration::from_secs(45));
        assert_eq!(config.timeouts.exec, Duration::from_secs(9));
        assert_eq!(config.deletion.propagation, DeletionPropagation::Orphan);
    }

    #[test]
    fn test_values_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("values.yaml");
        std::fs::write(&file, "image:\n  repo: nginx\n  tag: stable\n").unwrap();
        let args = TestArgs {
            values: vec![file],
            set: vec!["image.tag=dev".into()],
            ..Default::default()
        };
        let values = load_values(&args).unwrap();
        assert_eq!(values, serde_json::json!({"image": {"repo": "nginx", "tag": "dev"}}));
    }

    #[test]
    fn test_load_tests_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let case = dir.path().join("basic");
        std::fs::create_dir(&case).unwrap();
        std::fs::write(
            case.join("chainsaw-test.yaml"),
            r#"
apiVersion: chainsaw.kyverno.io/v1alpha1
kind: Test
metadata:
  name: basic
spec:
  steps:
  - try:
    - sleep:
        duration: 1s
"#,
        )
        .unwrap();
        std::fs::write(case.join("resource.yaml"), "kind: ConfigMap\n").unwrap();

        let tests = load_tests(&[dir.path().to_path_buf()], "chainsaw-test").unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].metadata.name, "basic");
        assert_eq!(tests[0].base_path, case);
    }
}
