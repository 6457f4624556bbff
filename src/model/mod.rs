//! Test document types
//!
//! Tests are YAML documents of kind `Test`. Field names follow the
//! camelCase conventions of Kubernetes manifests. Operation entries are
//! closed sum types: an entry naming zero or several operations is
//! rejected while the document is parsed.

pub mod loader;
pub mod values;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::DeletionPropagation;
use crate::common::duration::option as duration_option;

/// API version of test documents
pub const API_VERSION: &str = "chainsaw.kyverno.io/v1alpha1";

/// A named value registered into the binding scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub value: Value,
}

/// A binding produced from an operation result, optionally gated by `match`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub value: Value,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub matcher: Option<Value>,
}

/// A `match`/`check` pair validating an operation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub matcher: Option<Value>,
    pub check: Value,
}

/// Additional cluster declared by a test, step or operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub kubeconfig: String,
    #[serde(default)]
    pub context: Option<String>,
}

/// Per-kind timeout overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsSpec {
    #[serde(default, with = "duration_option")]
    pub apply: Option<Duration>,
    #[serde(default, with = "duration_option")]
    pub assert: Option<Duration>,
    #[serde(default, with = "duration_option")]
    pub cleanup: Option<Duration>,
    #[serde(default, with = "duration_option")]
    pub delete: Option<Duration>,
    #[serde(default, with = "duration_option")]
    pub error: Option<Duration>,
    #[serde(default, with = "duration_option")]
    pub exec: Option<Duration>,
}

/// Object metadata of a test document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A test document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub spec: TestSpec,
    /// Directory the test was loaded from
    #[serde(skip)]
    pub base_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutsSpec,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterSpec>,
    #[serde(default)]
    pub skip: Option<bool>,
    #[serde(default)]
    pub concurrent: Option<bool>,
    #[serde(default)]
    pub skip_delete: Option<bool>,
    #[serde(default)]
    pub template: Option<bool>,
    #[serde(default)]
    pub fail_fast: Option<bool>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Merged into the Namespace object created for the test
    #[serde(default)]
    pub namespace_template: Option<Value>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub catch: Vec<CatchFinally>,
    #[serde(default, with = "duration_option")]
    pub delay_before_cleanup: Option<Duration>,
    #[serde(default)]
    pub deletion_propagation_policy: Option<DeletionPropagation>,
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

/// A step of a test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub spec: StepSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutsSpec,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterSpec>,
    #[serde(default)]
    pub skip: Option<bool>,
    #[serde(default)]
    pub skip_delete: Option<bool>,
    #[serde(default)]
    pub template: Option<bool>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub deletion_propagation_policy: Option<DeletionPropagation>,
    #[serde(default, rename = "try")]
    pub try_ops: Vec<TryOperation>,
    #[serde(default)]
    pub catch: Vec<CatchFinally>,
    #[serde(default)]
    pub finally: Vec<CatchFinally>,
    #[serde(default)]
    pub cleanup: Vec<CatchFinally>,
}

/// Operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Apply,
    Assert,
    Command,
    Create,
    Delete,
    Describe,
    Error,
    Events,
    Get,
    Patch,
    PodLogs,
    Proxy,
    Script,
    Sleep,
    Update,
    Wait,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Apply => "apply",
            OperationKind::Assert => "assert",
            OperationKind::Command => "command",
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
            OperationKind::Describe => "describe",
            OperationKind::Error => "error",
            OperationKind::Events => "events",
            OperationKind::Get => "get",
            OperationKind::Patch => "patch",
            OperationKind::PodLogs => "podLogs",
            OperationKind::Proxy => "proxy",
            OperationKind::Script => "script",
            OperationKind::Sleep => "sleep",
            OperationKind::Update => "update",
            OperationKind::Wait => "wait",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster selection shared by most operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSelection {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterSpec>,
}

/// Apply, Create, Patch and Update payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOperation {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub resource: Option<Value>,
    #[serde(default)]
    pub template: Option<bool>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub expect: Vec<Expectation>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Assert and Error payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOperation {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub resource: Option<Value>,
    #[serde(default)]
    pub template: Option<bool>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Reference to objects by type plus name or labels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Delete payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOperation {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub resource: Option<Value>,
    #[serde(default, rename = "ref")]
    pub reference: Option<ObjectReference>,
    #[serde(default)]
    pub template: Option<bool>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub expect: Vec<Expectation>,
    #[serde(default)]
    pub deletion_propagation_policy: Option<DeletionPropagation>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Objects addressed by collectors and waits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuery {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
}

/// Get payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOperation {
    #[serde(flatten)]
    pub query: ResourceQuery,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Describe payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeOperation {
    #[serde(flatten)]
    pub query: ResourceQuery,
    #[serde(default)]
    pub show_events: Option<bool>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Events payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsOperation {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// PodLogs payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodLogsOperation {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub tail: Option<i64>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Proxy payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOperation {
    #[serde(default = "default_core_version")]
    pub api_version: String,
    #[serde(default = "default_proxy_kind")]
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

fn default_core_version() -> String {
    "v1".to_string()
}

fn default_proxy_kind() -> String {
    "Service".to_string()
}

/// Command payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOperation {
    pub entrypoint: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub env: Vec<Binding>,
    #[serde(default)]
    pub skip_log_output: bool,
    #[serde(default)]
    pub check: Option<Value>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Script payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOperation {
    pub content: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub shell_args: Option<Vec<String>>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub env: Vec<Binding>,
    #[serde(default)]
    pub skip_log_output: bool,
    #[serde(default)]
    pub check: Option<Value>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Sleep payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepOperation {
    #[serde(with = "crate::common::duration::serde_duration")]
    pub duration: Duration,
}

/// Condition a wait polls for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitFor {
    Deletion(Map<String, Value>),
    Condition {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
    JsonPath {
        path: String,
        #[serde(default)]
        value: Option<String>,
    },
}

/// Wait payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitOperation {
    #[serde(flatten)]
    pub query: ResourceQuery,
    #[serde(rename = "for")]
    pub wait_for: WaitFor,
    #[serde(flatten)]
    pub clusters: ClusterSelection,
    #[serde(default, with = "duration_option")]
    pub timeout: Option<Duration>,
}

/// Operation allowed in a `try` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Apply(ResourceOperation),
    Assert(CheckOperation),
    Command(CommandOperation),
    Create(ResourceOperation),
    Delete(DeleteOperation),
    Describe(DescribeOperation),
    Error(CheckOperation),
    Events(EventsOperation),
    Get(GetOperation),
    Patch(ResourceOperation),
    PodLogs(PodLogsOperation),
    Proxy(ProxyOperation),
    Script(ScriptOperation),
    Sleep(SleepOperation),
    Update(ResourceOperation),
    Wait(WaitOperation),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Apply(_) => OperationKind::Apply,
            Operation::Assert(_) => OperationKind::Assert,
            Operation::Command(_) => OperationKind::Command,
            Operation::Create(_) => OperationKind::Create,
            Operation::Delete(_) => OperationKind::Delete,
            Operation::Describe(_) => OperationKind::Describe,
            Operation::Error(_) => OperationKind::Error,
            Operation::Events(_) => OperationKind::Events,
            Operation::Get(_) => OperationKind::Get,
            Operation::Patch(_) => OperationKind::Patch,
            Operation::PodLogs(_) => OperationKind::PodLogs,
            Operation::Proxy(_) => OperationKind::Proxy,
            Operation::Script(_) => OperationKind::Script,
            Operation::Sleep(_) => OperationKind::Sleep,
            Operation::Update(_) => OperationKind::Update,
            Operation::Wait(_) => OperationKind::Wait,
        }
    }

    /// Bindings declared on the operation itself
    pub fn bindings(&self) -> &[Binding] {
        match self {
            Operation::Apply(op)
            | Operation::Create(op)
            | Operation::Patch(op)
            | Operation::Update(op) => &op.bindings,
            Operation::Assert(op) | Operation::Error(op) => &op.bindings,
            Operation::Delete(op) => &op.bindings,
            Operation::Command(op) => &op.bindings,
            Operation::Script(op) => &op.bindings,
            _ => &[],
        }
    }

    /// Timeout override declared on the operation
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Operation::Apply(op)
            | Operation::Create(op)
            | Operation::Patch(op)
            | Operation::Update(op) => op.timeout,
            Operation::Assert(op) | Operation::Error(op) => op.timeout,
            Operation::Delete(op) => op.timeout,
            Operation::Command(op) => op.timeout,
            Operation::Script(op) => op.timeout,
            Operation::Describe(op) => op.timeout,
            Operation::Events(op) => op.timeout,
            Operation::Get(op) => op.timeout,
            Operation::PodLogs(op) => op.timeout,
            Operation::Proxy(op) => op.timeout,
            Operation::Wait(op) => op.timeout,
            Operation::Sleep(_) => None,
        }
    }

    /// Templating override declared on the operation
    pub fn template(&self) -> Option<bool> {
        match self {
            Operation::Apply(op)
            | Operation::Create(op)
            | Operation::Patch(op)
            | Operation::Update(op) => op.template,
            Operation::Assert(op) | Operation::Error(op) => op.template,
            Operation::Delete(op) => op.template,
            _ => None,
        }
    }

    /// Cluster selection declared on the operation
    pub fn clusters(&self) -> Option<&ClusterSelection> {
        match self {
            Operation::Apply(op)
            | Operation::Create(op)
            | Operation::Patch(op)
            | Operation::Update(op) => Some(&op.clusters),
            Operation::Assert(op) | Operation::Error(op) => Some(&op.clusters),
            Operation::Delete(op) => Some(&op.clusters),
            Operation::Command(op) => Some(&op.clusters),
            Operation::Script(op) => Some(&op.clusters),
            Operation::Describe(op) => Some(&op.clusters),
            Operation::Events(op) => Some(&op.clusters),
            Operation::Get(op) => Some(&op.clusters),
            Operation::PodLogs(op) => Some(&op.clusters),
            Operation::Proxy(op) => Some(&op.clusters),
            Operation::Wait(op) => Some(&op.clusters),
            Operation::Sleep(_) => None,
        }
    }
}

/// Action allowed in `catch`, `finally` and `cleanup` lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CatchAction {
    Command(CommandOperation),
    Delete(DeleteOperation),
    Describe(DescribeOperation),
    Events(EventsOperation),
    Get(GetOperation),
    PodLogs(PodLogsOperation),
    Script(ScriptOperation),
    Sleep(SleepOperation),
    Wait(WaitOperation),
}

impl From<CatchAction> for Operation {
    fn from(action: CatchAction) -> Self {
        match action {
            CatchAction::Command(op) => Operation::Command(op),
            CatchAction::Delete(op) => Operation::Delete(op),
            CatchAction::Describe(op) => Operation::Describe(op),
            CatchAction::Events(op) => Operation::Events(op),
            CatchAction::Get(op) => Operation::Get(op),
            CatchAction::PodLogs(op) => Operation::PodLogs(op),
            CatchAction::Script(op) => Operation::Script(op),
            CatchAction::Sleep(op) => Operation::Sleep(op),
            CatchAction::Wait(op) => Operation::Wait(op),
        }
    }
}

impl CatchFinally {
    /// Description or the action kind, for reports
    pub fn label(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| Operation::from(self.action.clone()).kind().to_string())
    }
}

impl CatchAction {
    pub fn kind(&self) -> OperationKind {
        Operation::from(self.clone()).kind()
    }
}

/// Split an entry into its single operation key and the shared fields
///
/// `shared` names the keys that may accompany the operation.
fn single_operation(
    mut entry: Map<String, Value>,
    shared: &[&str],
) -> Result<(Map<String, Value>, Value), String> {
    let mut common = Map::new();
    for key in shared {
        if let Some(value) = entry.remove(*key) {
            common.insert((*key).to_string(), value);
        }
    }
    match entry.len() {
        1 => Ok((common, Value::Object(entry))),
        0 => Err("an operation must be specified".to_string()),
        _ => Err(format!(
            "exactly one operation must be specified, found {}",
            entry.keys().cloned().collect::<Vec<_>>().join(", ")
        )),
    }
}

/// Entry of a `try` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Map<String, Value>")]
pub struct TryOperation {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub continue_on_error: Option<bool>,
    #[serde(flatten)]
    pub operation: Operation,
}

impl TryFrom<Map<String, Value>> for TryOperation {
    type Error = String;

    fn try_from(entry: Map<String, Value>) -> Result<Self, Self::Error> {
        let (common, operation) = single_operation(entry, &["description", "continueOnError"])?;
        let operation: Operation =
            serde_json::from_value(operation).map_err(|e| e.to_string())?;
        Ok(Self {
            description: common
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            continue_on_error: common.get("continueOnError").and_then(Value::as_bool),
            operation,
        })
    }
}

/// Entry of a `catch`, `finally` or `cleanup` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Map<String, Value>")]
pub struct CatchFinally {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub action: CatchAction,
}

impl TryFrom<Map<String, Value>> for CatchFinally {
    type Error = String;

    fn try_from(entry: Map<String, Value>) -> Result<Self, Self::Error> {
        let (common, action) = single_operation(entry, &["description"])?;
        let action: CatchAction = serde_json::from_value(action).map_err(|e| e.to_string())?;
        Ok(Self {
            description: common
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            action,
        })
    }
}
