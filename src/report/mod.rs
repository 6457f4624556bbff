//! Run reports
//!
//! The runner records every executed operation into a [`Report`]. It is
//! printed as a summary by the CLI and can be saved as JSON or JUnit XML.

pub mod json;
pub mod junit;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bindings::Outputs;
use crate::common::{Error, Result};
use crate::model::OperationKind;

/// Report file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    #[serde(alias = "xml")]
    Junit,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Junit => "xml",
        }
    }
}

/// List an operation ran from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    Try,
    Catch,
    Finally,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub section: Section,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Outputs of catch diagnostics
    #[serde(skip_serializing_if = "Outputs::is_empty")]
    pub outputs: Outputs,
}

impl OperationReport {
    pub fn duration(&self) -> Duration {
        elapsed(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    /// Failure preparing the step scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<OperationReport>,
}

impl StepReport {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            start_time: now,
            end_time: now,
            skipped: false,
            error: None,
            operations: Vec::new(),
        }
    }

    /// Catch diagnostics never fail a step on their own
    pub fn failed(&self) -> bool {
        self.error.is_some()
            || self
                .operations
                .iter()
                .any(|op| op.section != Section::Catch && op.error.is_some())
    }

    /// First failing try operation
    pub fn failure(&self) -> Option<&OperationReport> {
        self.operations
            .iter()
            .find(|op| op.section == Section::Try && op.error.is_some())
            .or_else(|| {
                self.operations
                    .iter()
                    .find(|op| op.section != Section::Catch && op.error.is_some())
            })
    }

    pub fn finish(&mut self) {
        self.end_time = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub name: String,
    pub base_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub concurrent: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Failure outside any operation, such as namespace setup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepReport>,
}

impl TestReport {
    pub fn new(name: impl Into<String>, base_path: &Path, concurrent: bool) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            base_path: base_path.display().to_string(),
            namespace: None,
            concurrent,
            skipped: false,
            start_time: now,
            end_time: now,
            error: None,
            steps: Vec::new(),
        }
    }

    pub fn status(&self) -> Status {
        if self.skipped {
            Status::Skipped
        } else if self.error.is_some() || self.steps.iter().any(StepReport::failed) {
            Status::Failed
        } else {
            Status::Passed
        }
    }

    /// Primary failure cause
    pub fn failure(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        self.steps.iter().find_map(|step| {
            if let Some(error) = &step.error {
                return Some(format!("{}: {error}", step.name));
            }
            step.failure().map(|op| {
                format!(
                    "{} / {}: {}",
                    step.name,
                    op.name,
                    op.error.as_deref().unwrap_or_default()
                )
            })
        })
    }

    pub fn duration(&self) -> Duration {
        elapsed(self.start_time, self.end_time)
    }

    pub fn finish(&mut self) {
        self.end_time = Utc::now();
    }
}

/// Aggregate result of a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tests: Vec<TestReport>,
}

/// Pass, fail and skip counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Report {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            start_time: now,
            end_time: now,
            tests: Vec::new(),
        }
    }

    pub fn summary(&self) -> Summary {
        self.tests
            .iter()
            .fold(Summary::default(), |mut summary, test| {
                match test.status() {
                    Status::Passed => summary.passed += 1,
                    Status::Failed => summary.failed += 1,
                    Status::Skipped => summary.skipped += 1,
                }
                summary
            })
    }

    pub fn duration(&self) -> Duration {
        elapsed(self.start_time, self.end_time)
    }

    pub fn finish(&mut self) {
        self.end_time = Utc::now();
    }
}

fn elapsed(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or_default()
}

/// Serializes a report
pub trait ReportWriter {
    fn write(&self, report: &Report, out: &mut dyn io::Write) -> Result<()>;
}

pub fn writer(format: ReportFormat) -> Box<dyn ReportWriter> {
    match format {
        ReportFormat::Json => Box::new(json::JsonWriter),
        ReportFormat::Junit => Box::new(junit::JunitWriter),
    }
}

/// Write `report` to `<dir>/<name>.<ext>`
pub fn save(report: &Report, format: ReportFormat, dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.{}", format.extension()));
    let mut buffer = Vec::new();
    writer(format).write(report, &mut buffer)?;
    fs::write(&path, buffer).map_err(|e| Error::Internal(format!("failed to write {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "report saved");
    Ok(path)
}
