//! Test discovery and document loading

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::{Binding, CatchFinally, Operation, Output, Test, API_VERSION};
use crate::bindings::check_name;
use crate::common::{Error, Result};

/// Find test files below `paths`
///
/// A directory containing `<test_file>.yaml` (or `.yml`) is a test
/// directory. Subdirectories are searched recursively and results are
/// sorted for a stable run order.
pub fn discover(paths: &[PathBuf], test_file: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for path in paths {
        if path.is_file() {
            found.push(path.clone());
        } else {
            walk(path, test_file, &mut found)?;
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn walk(dir: &Path, test_file: &str, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::file_read(dir, e))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, test_file, found)?;
            continue;
        }
        let is_test = path.file_stem().and_then(|s| s.to_str()) == Some(test_file)
            && matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
        if is_test {
            found.push(path);
        }
    }
    Ok(())
}

/// Split YAML text into documents, skipping empty ones
pub fn parse_documents(content: &str) -> std::result::Result<Vec<Value>, serde_yaml::Error> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Load every test document from a file
pub fn load_tests(path: &Path) -> Result<Vec<Test>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    parse_documents(&content)
        .map_err(|e| Error::load(path, e))?
        .into_iter()
        .map(|document| {
            let mut test = parse_test(document).map_err(|e| Error::load(path, e))?;
            test.base_path = base.clone();
            Ok(test)
        })
        .collect()
}

/// Parse and validate a single test document
pub fn parse_test(document: Value) -> Result<Test> {
    let test: Test = serde_json::from_value(document).map_err(|e| Error::Validation(e.to_string()))?;
    validate(&test)?;
    Ok(test)
}

/// Load the resources referenced by an operation's `file` field
pub fn load_resources(base: &Path, file: &str) -> Result<Vec<Value>> {
    let path = crate::common::paths::resolve(base, Path::new(file));
    let content = std::fs::read_to_string(&path).map_err(|e| Error::file_read(&path, e))?;
    let documents = parse_documents(&content).map_err(|e| Error::load(&path, e))?;
    if documents.is_empty() {
        return Err(Error::load(&path, "file contains no resources"));
    }
    Ok(documents)
}

fn validate(test: &Test) -> Result<()> {
    if test.api_version != API_VERSION {
        return Err(Error::Validation(format!(
            "unsupported apiVersion '{}', expected '{API_VERSION}'",
            test.api_version
        )));
    }
    if test.kind != "Test" {
        return Err(Error::Validation(format!("unsupported kind '{}'", test.kind)));
    }
    if test.metadata.name.is_empty() {
        return Err(Error::Validation("metadata.name is required".to_string()));
    }
    if test.spec.steps.is_empty() {
        return Err(Error::Validation(format!(
            "test '{}' has no steps",
            test.metadata.name
        )));
    }

    check_bindings(&test.spec.bindings)?;
    check_catch(&test.spec.catch)?;
    for step in &test.spec.steps {
        check_bindings(&step.spec.bindings)?;
        for entry in &step.spec.try_ops {
            check_operation(&entry.operation)?;
        }
        check_catch(&step.spec.catch)?;
        check_catch(&step.spec.finally)?;
        check_catch(&step.spec.cleanup)?;
    }
    Ok(())
}

fn check_bindings(bindings: &[Binding]) -> Result<()> {
    bindings.iter().try_for_each(|b| check_name(&b.name))
}

fn check_outputs(outputs: &[Output]) -> Result<()> {
    outputs.iter().try_for_each(|o| check_name(&o.name))
}

fn check_catch(items: &[CatchFinally]) -> Result<()> {
    items
        .iter()
        .try_for_each(|item| check_operation(&Operation::from(item.action.clone())))
}

fn check_operation(operation: &Operation) -> Result<()> {
    match operation {
        Operation::Apply(op) | Operation::Create(op) | Operation::Patch(op) | Operation::Update(op) => {
            check_source(op.file.as_deref(), op.resource.as_ref())?;
            check_bindings(&op.bindings)?;
            check_outputs(&op.outputs)
        }
        Operation::Assert(op) | Operation::Error(op) => {
            check_source(op.file.as_deref(), op.resource.as_ref())?;
            check_bindings(&op.bindings)
        }
        Operation::Delete(op) => {
            let sources = [op.file.is_some(), op.resource.is_some(), op.reference.is_some()];
            if sources.iter().filter(|s| **s).count() != 1 {
                return Err(Error::Validation(
                    "delete requires exactly one of file, resource or ref".to_string(),
                ));
            }
            check_bindings(&op.bindings)
        }
        Operation::Command(op) => {
            check_bindings(&op.bindings)?;
            check_bindings(&op.env)?;
            check_outputs(&op.outputs)
        }
        Operation::Script(op) => {
            check_bindings(&op.bindings)?;
            check_bindings(&op.env)?;
            check_outputs(&op.outputs)
        }
        Operation::Get(op) => check_query(op.query.name.as_deref(), op.query.selector.as_deref()),
        Operation::Describe(op) => {
            check_query(op.query.name.as_deref(), op.query.selector.as_deref())
        }
        Operation::Events(op) => check_query(op.name.as_deref(), op.selector.as_deref()),
        Operation::PodLogs(op) => check_query(op.name.as_deref(), op.selector.as_deref()),
        Operation::Wait(op) => check_query(op.query.name.as_deref(), op.query.selector.as_deref()),
        Operation::Proxy(op) => check_outputs(&op.outputs),
        Operation::Sleep(_) => Ok(()),
    }
}

fn check_source(file: Option<&str>, resource: Option<&Value>) -> Result<()> {
    match (file, resource) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(Error::Validation(
            "exactly one of file or resource must be specified".to_string(),
        )),
    }
}

fn check_query(name: Option<&str>, selector: Option<&str>) -> Result<()> {
    if name.is_some() && selector.is_some() {
        return Err(Error::Validation(
            "name cannot be provided when a selector is specified".to_string(),
        ));
    }
    Ok(())
}
