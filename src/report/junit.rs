//! JUnit XML report
//!
//! Each test becomes a `testsuite` and each executed operation a
//! `testcase`, so a single failing operation is visible on its own.

use std::fmt::Write as _;
use std::io;
use std::time::Duration;

use super::{Report, ReportWriter, Section, TestReport};
use crate::common::{Error, Result};
use crate::model::OperationKind;

#[derive(Debug, Default, Clone, Copy)]
pub struct JunitWriter;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            c => out.push(c),
        }
    }
    out
}

fn seconds(duration: Duration) -> String {
    format!("{:.6}", duration.as_secs_f64())
}

fn failures(test: &TestReport) -> usize {
    test.steps
        .iter()
        .map(|step| {
            usize::from(step.error.is_some())
                + step.operations.iter().filter(|op| op.error.is_some()).count()
        })
        .sum()
}

fn cases(test: &TestReport) -> usize {
    test.steps
        .iter()
        .map(|step| step.operations.len() + usize::from(step.error.is_some()))
        .sum::<usize>()
        .max(1)
}

fn write_suite(xml: &mut String, test: &TestReport) -> std::fmt::Result {
    writeln!(
        xml,
        r#"  <testsuite name="{}" timestamp="{}" time="{}" tests="{}" failures="{}" skipped="{}">"#,
        escape(&test.name),
        test.start_time.to_rfc3339(),
        seconds(test.duration()),
        cases(test),
        failures(test) + usize::from(test.error.is_some()),
        usize::from(test.skipped)
    )?;
    if test.skipped {
        writeln!(xml, r#"    <testcase name="{}" classname="{0}" time="0.000000">"#, escape(&test.name))?;
        writeln!(xml, "      <skipped/>")?;
        writeln!(xml, "    </testcase>")?;
    }
    if let Some(error) = &test.error {
        writeln!(xml, r#"    <testcase name="setup" classname="{}" time="0.000000">"#, escape(&test.name))?;
        writeln!(xml, r#"      <failure message="{}"/>"#, escape(error))?;
        writeln!(xml, "    </testcase>")?;
    }
    for step in &test.steps {
        if let Some(error) = &step.error {
            writeln!(
                xml,
                r#"    <testcase name="{}" classname="{}" time="0.000000">"#,
                escape(&step.name),
                escape(&test.name)
            )?;
            writeln!(xml, r#"      <failure message="{}"/>"#, escape(error))?;
            writeln!(xml, "    </testcase>")?;
        }
        for op in &step.operations {
            let name = match op.section {
                Section::Try => format!("{} / {}", step.name, op.name),
                section => format!("{} / {:?} / {}", step.name, section, op.name).to_lowercase(),
            };
            write!(
                xml,
                r#"    <testcase name="{}" classname="{}" time="{}""#,
                escape(&name),
                escape(&test.name),
                seconds(op.duration())
            )?;
            match &op.error {
                None => writeln!(xml, "/>")?,
                Some(error) => {
                    writeln!(xml, ">")?;
                    let kind = match op.kind {
                        OperationKind::Assert | OperationKind::Error => r#" type="AssertionError""#,
                        _ => "",
                    };
                    writeln!(xml, r#"      <failure message="{}"{kind}/>"#, escape(error))?;
                    writeln!(xml, "    </testcase>")?;
                }
            }
        }
    }
    writeln!(xml, "  </testsuite>")
}

fn render(report: &Report) -> std::result::Result<String, std::fmt::Error> {
    let mut xml = String::new();
    let failed: usize = report
        .tests
        .iter()
        .map(|t| failures(t) + usize::from(t.error.is_some()))
        .sum();
    let total: usize = report.tests.iter().map(cases).sum();

    writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        xml,
        r#"<testsuites name="{}" time="{}" tests="{}" failures="{}">"#,
        escape(&report.name),
        seconds(report.duration()),
        total,
        failed
    )?;
    for test in &report.tests {
        write_suite(&mut xml, test)?;
    }
    writeln!(xml, "</testsuites>")?;
    Ok(xml)
}

impl ReportWriter for JunitWriter {
    fn write(&self, report: &Report, out: &mut dyn io::Write) -> Result<()> {
        let xml = render(report)
            .map_err(|_| Error::Internal("failed to render JUnit report".to_string()))?;
        out.write_all(xml.as_bytes())?;
        Ok(())
    }
}
