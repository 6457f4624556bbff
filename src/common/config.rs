//! Configuration file handling
//!
//! The TOML configuration supplies the defaults every test inherits:
//! per-kind timeouts, execution settings, cleanup policy and the named
//! clusters available to operations. Command line flags override it.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::duration::{option as duration_option, serde_duration};
use super::paths::config_path;
use super::Result;
use crate::client::DeletionPropagation;
use crate::model::{ClusterSpec, OperationKind, TimeoutsSpec};
use crate::report::ReportFormat;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Default timeouts per operation kind
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Cleanup settings
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Deletion settings
    #[serde(default)]
    pub deletion: DeletionConfig,

    /// Namespace settings
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Templating settings
    #[serde(default)]
    pub templating: TemplatingConfig,

    /// Test discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Report settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Additional named clusters
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterSpec>,
}

/// Timeouts per operation kind
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    #[serde(default = "default_apply", with = "serde_duration")]
    pub apply: Duration,
    #[serde(default = "default_assert", with = "serde_duration")]
    pub assert: Duration,
    #[serde(default = "default_cleanup", with = "serde_duration")]
    pub cleanup: Duration,
    #[serde(default = "default_delete", with = "serde_duration")]
    pub delete: Duration,
    #[serde(default = "default_error", with = "serde_duration")]
    pub error: Duration,
    #[serde(default = "default_exec", with = "serde_duration")]
    pub exec: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            apply: default_apply(),
            assert: default_assert(),
            cleanup: default_cleanup(),
            delete: default_delete(),
            error: default_error(),
            exec: default_exec(),
        }
    }
}

impl Timeouts {
    /// Override the fields set in `spec`, keeping the rest
    pub fn combine(&self, spec: &TimeoutsSpec) -> Self {
        Self {
            apply: spec.apply.unwrap_or(self.apply),
            assert: spec.assert.unwrap_or(self.assert),
            cleanup: spec.cleanup.unwrap_or(self.cleanup),
            delete: spec.delete.unwrap_or(self.delete),
            error: spec.error.unwrap_or(self.error),
            exec: spec.exec.unwrap_or(self.exec),
        }
    }

    /// Default deadline for an operation kind
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Apply
            | OperationKind::Create
            | OperationKind::Patch
            | OperationKind::Update => self.apply,
            OperationKind::Assert => self.assert,
            OperationKind::Error => self.error,
            OperationKind::Delete => self.delete,
            OperationKind::Command
            | OperationKind::Script
            | OperationKind::Get
            | OperationKind::Describe
            | OperationKind::Events
            | OperationKind::PodLogs
            | OperationKind::Proxy
            | OperationKind::Wait
            | OperationKind::Sleep => self.exec,
        }
    }
}

fn default_apply() -> Duration {
    Duration::from_secs(5)
}
fn default_assert() -> Duration {
    Duration::from_secs(30)
}
fn default_cleanup() -> Duration {
    Duration::from_secs(30)
}
fn default_delete() -> Duration {
    Duration::from_secs(15)
}
fn default_error() -> Duration {
    Duration::from_secs(30)
}
fn default_exec() -> Duration {
    Duration::from_secs(5)
}

/// Execution settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum number of tests running at once
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Stop a test at its first failing step
    #[serde(default)]
    pub fail_fast: bool,

    /// Interval between reconciliation attempts
    #[serde(default = "default_poll_interval", with = "serde_duration")]
    pub poll_interval: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            fail_fast: false,
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_parallel() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// Cleanup settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupConfig {
    /// Leave created resources in place
    #[serde(default)]
    pub skip_delete: bool,

    /// Wait before tearing a test down
    #[serde(default, with = "duration_option")]
    pub delay_before_cleanup: Option<Duration>,
}

/// Deletion settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeletionConfig {
    /// Propagation policy for resources deleted during cleanup
    #[serde(default)]
    pub propagation: DeletionPropagation,
}

/// Namespace settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamespaceConfig {
    /// Use this namespace instead of generating one per test
    #[serde(default)]
    pub name: Option<String>,

    /// Merged into every namespace created for a test
    #[serde(default)]
    pub template: Option<serde_json::Value>,
}

/// Templating settings
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TemplatingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Test discovery settings
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Base name of test files (`<name>.yaml` / `<name>.yml`)
    #[serde(default = "default_test_file")]
    pub test_file: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            test_file: default_test_file(),
        }
    }
}

fn default_test_file() -> String {
    "chainsaw-test".to_string()
}

/// Report settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Report format, no report is written when unset
    #[serde(default)]
    pub format: Option<ReportFormat>,

    /// Directory the report is written to
    #[serde(default = "default_report_path")]
    pub path: PathBuf,

    /// Report file name without extension
    #[serde(default = "default_report_name")]
    pub name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: None,
            path: default_report_path(),
            name: default_report_name(),
        }
    }
}

fn default_report_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_report_name() -> String {
    "chainsaw-report".to_string()
}

impl Config {
    /// Load configuration from `path`, or from the default config file
    ///
    /// Returns default configuration if no file exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => config_path().filter(|p| p.exists()),
        };
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| super::Error::file_read(&path, e))?;
                Self::parse(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeouts.apply, Duration::from_secs(5));
        assert_eq!(config.timeouts.assert, Duration::from_secs(30));
        assert_eq!(config.timeouts.delete, Duration::from_secs(15));
        assert_eq!(config.execution.poll_interval, Duration::from_secs(1));
        assert!(config.templating.enabled);
        assert_eq!(config.deletion.propagation, DeletionPropagation::Background);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
            [timeouts]
            apply = "10s"

            [execution]
            parallel = 2
            fail_fast = true
            poll_interval = "250ms"

            [cleanup]
            skip_delete = true
            delay_before_cleanup = "1s"

            [deletion]
            propagation = "Foreground"

            [namespace.template.metadata.labels]
            team = "e2e"

            [clusters.remote]
            kubeconfig = "/tmp/remote.kubeconfig"
            context = "kind-remote"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.apply, Duration::from_secs(10));
        assert_eq!(config.timeouts.exec, Duration::from_secs(5));
        assert_eq!(config.execution.parallel, 2);
        assert!(config.execution.fail_fast);
        assert_eq!(config.execution.poll_interval, Duration::from_millis(250));
        assert!(config.cleanup.skip_delete);
        assert_eq!(config.cleanup.delay_before_cleanup, Some(Duration::from_secs(1)));
        assert_eq!(config.deletion.propagation, DeletionPropagation::Foreground);
        assert_eq!(config.clusters["remote"].context.as_deref(), Some("kind-remote"));
        assert_eq!(
            config.namespace.template,
            Some(serde_json::json!({"metadata": {"labels": {"team": "e2e"}}}))
        );
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = Config::parse("[timeouts]\napply = \"soon\"").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }

    #[test]
    fn test_combine_overrides_set_fields_only() {
        let base = Timeouts::default();
        let spec = TimeoutsSpec {
            assert: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let combined = base.combine(&spec);
        assert_eq!(combined.assert, Duration::from_secs(2));
        assert_eq!(combined.apply, base.apply);
    }
}
