//! CLI command definitions
//!
//! Defines the clap commands for the chainsaw CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::client::DeletionPropagation;
use crate::report::ReportFormat;

#[derive(Subcommand)]
pub enum Commands {
    /// Run tests found below the given directories
    Test(TestArgs),

    /// Parse test files and report validation errors without running them
    Lint {
        /// Test files or directories
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Configuration file (default: platform config dir)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct TestArgs {
    /// Test directories (default: current directory)
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Configuration file (default: platform config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Kubeconfig of the default cluster (default: $KUBECONFIG or ~/.kube/config)
    #[arg(long)]
    pub kube_config: Option<PathBuf>,

    /// Kubeconfig context of the default cluster
    #[arg(long)]
    pub kube_context: Option<String>,

    /// Maximum number of tests running concurrently
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Use this namespace instead of a generated one
    #[arg(long)]
    pub namespace: Option<String>,

    /// Keep resources created by tests
    #[arg(long)]
    pub skip_delete: bool,

    /// Stop at the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Disable expression templating in resources
    #[arg(long)]
    pub no_template: bool,

    /// Propagation policy for cleanup deletions
    #[arg(long, value_parser = parse_propagation)]
    pub deletion_propagation: Option<DeletionPropagation>,

    /// Interval between reconciliation attempts, e.g. 500ms
    #[arg(long, value_parser = parse_duration)]
    pub poll_interval: Option<std::time::Duration>,

    /// Default apply timeout, e.g. 10s
    #[arg(long, value_parser = parse_duration)]
    pub apply_timeout: Option<std::time::Duration>,

    /// Default assert timeout
    #[arg(long, value_parser = parse_duration)]
    pub assert_timeout: Option<std::time::Duration>,

    /// Default error timeout
    #[arg(long, value_parser = parse_duration)]
    pub error_timeout: Option<std::time::Duration>,

    /// Default delete timeout
    #[arg(long, value_parser = parse_duration)]
    pub delete_timeout: Option<std::time::Duration>,

    /// Default cleanup timeout
    #[arg(long, value_parser = parse_duration)]
    pub cleanup_timeout: Option<std::time::Duration>,

    /// Default exec timeout
    #[arg(long, value_parser = parse_duration)]
    pub exec_timeout: Option<std::time::Duration>,

    /// Wait before tearing each test down
    #[arg(long, value_parser = parse_duration)]
    pub delay_before_cleanup: Option<std::time::Duration>,

    /// YAML files exposed to tests as `$values`, merged in order
    #[arg(long = "values")]
    pub values: Vec<PathBuf>,

    /// Set values on top of the value files (key.path=value, comma separated)
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Write a report in this format
    #[arg(long, value_enum)]
    pub report_format: Option<ReportFormat>,

    /// Directory the report is written to
    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Report file name without extension
    #[arg(long)]
    pub report_name: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write full logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn parse_duration(value: &str) -> Result<std::time::Duration, String> {
    crate::common::duration::parse(value)
}

fn parse_propagation(value: &str) -> Result<DeletionPropagation, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("invalid propagation policy '{value}', expected Orphan, Background or Foreground"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[derive(Parser)]
    struct Cli {
        #[command(subcommand)]
        command: Commands,
    }

    #[test]
    fn test_parse_test_flags() {
        let cli = Cli::try_parse_from([
            "chainsaw",
            "test",
            "e2e",
            "--parallel",
            "2",
            "--assert-timeout",
            "1m",
            "--deletion-propagation",
            "Foreground",
            "--report-format",
            "junit",
            "--values",
            "base.yaml",
            "--values",
            "ci.yaml",
            "--set",
            "image.tag=dev",
            "-vv",
        ])
        .unwrap();
        let Commands::Test(args) = cli.command else {
            panic!("expected test command");
        };
        assert_eq!(args.paths, vec![PathBuf::from("e2e")]);
        assert_eq!(args.parallel, Some(2));
        assert_eq!(args.assert_timeout, Some(Duration::from_secs(60)));
        assert_eq!(args.deletion_propagation, Some(DeletionPropagation::Foreground));
        assert_eq!(args.report_format, Some(ReportFormat::Junit));
        assert_eq!(args.values, vec![PathBuf::from("base.yaml"), PathBuf::from("ci.yaml")]);
        assert_eq!(args.set, vec!["image.tag=dev".to_string()]);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(Cli::try_parse_from(["chainsaw", "test", "--exec-timeout", "soon"]).is_err());
    }
}
