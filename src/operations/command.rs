//! Subprocess execution shared by commands, scripts and kubectl collectors
//!
//! The process gets the test namespace in `NAMESPACE` and, when the
//! operation targets a configured cluster, a generated kubeconfig in
//! `KUBECONFIG`. Captured output is registered as the `stdout`, `stderr`
//! and `error` bindings. A `check` tree, when present, decides the outcome
//! instead of the exit status.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use super::internal::with_error;
use super::{OperationContext, Reconciler};
use crate::bindings::{process_outputs, resolve_name, Bindings, Outputs};
use crate::checks;
use crate::clusters::kubeconfig;
use crate::common::{Error, Result};
use crate::expressions::template;
use crate::model::{Binding, CommandOperation, OperationKind, Output};

static ENV_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?:\{(\w+)\}|(\w+))").expect("valid env reference regex"));

/// Expand `$NAME` and `${NAME}` from `env`, then the process environment
///
/// Unknown variables expand to an empty string.
pub fn expand_env(text: &str, env: &[(String, String)]) -> String {
    ENV_REFERENCE
        .replace_all(text, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            env.iter()
                .rev()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .or_else(|| std::env::var(name).ok())
                .unwrap_or_default()
        })
        .into_owned()
}

/// Resolve declared environment variables; values must be strings
pub fn resolve_env(ctx: &OperationContext, declared: &[Binding]) -> Result<Vec<(String, String)>> {
    let evaluator = ctx.evaluator.as_ref();
    declared
        .iter()
        .map(|binding| {
            let name = resolve_name(evaluator, &binding.name, &ctx.bindings)?;
            let value = if ctx.template {
                template::resolve(evaluator, &binding.value, &ctx.bindings, &Value::Null)?
            } else {
                binding.value.clone()
            };
            match value {
                Value::String(value) => Ok((name, value)),
                _ => Err(Error::InvalidEnv(name)),
            }
        })
        .collect()
}

/// A fully resolved process to run
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Appended after `args` without variable expansion
    pub script: Option<String>,
    pub env: Vec<(String, String)>,
    pub work_dir: Option<PathBuf>,
    pub check: Option<Value>,
    pub outputs: Vec<Output>,
    pub skip_log_output: bool,
}

struct Captured {
    stdout: String,
    stderr: String,
    error: Option<Error>,
}

impl Invocation {
    /// Run the process once within the operation deadline
    pub async fn run(&self, ctx: &OperationContext) -> Result<Outputs> {
        let mut env = self.env.clone();
        if let Some(namespacer) = &ctx.namespacer {
            env.push(("NAMESPACE".to_string(), namespacer.namespace().to_string()));
        }
        // kept alive until the process exits
        let kubeconfig_file = if ctx.cluster.server.is_empty() {
            None
        } else {
            let mut file = tempfile::Builder::new()
                .prefix("chainsaw-kubeconfig-")
                .suffix(".yaml")
                .tempfile()?;
            file.write_all(kubeconfig::render(&ctx.cluster)?.as_bytes())?;
            env.push((
                "KUBECONFIG".to_string(),
                file.path().display().to_string(),
            ));
            Some(file)
        };

        let mut args: Vec<String> = self.args.iter().map(|arg| expand_env(arg, &env)).collect();
        args.extend(self.script.clone());
        let captured = self.spawn(ctx, &args, &env).await?;
        drop(kubeconfig_file);

        if !self.skip_log_output {
            for line in captured.stdout.lines() {
                tracing::info!(program = %self.program, "| {line}");
            }
            for line in captured.stderr.lines() {
                tracing::warn!(program = %self.program, "| {line}");
            }
        }

        let evaluator = ctx.evaluator.as_ref();
        let bindings: Bindings = with_error(&ctx.bindings, captured.error.as_ref())
            .register("stdout", Value::String(captured.stdout))
            .register("stderr", Value::String(captured.stderr));

        match &self.check {
            Some(check) => {
                let failures = checks::check(evaluator, &Value::Null, check, &bindings)?;
                if !failures.is_empty() {
                    return Err(Error::Check(failures));
                }
            }
            None => {
                if let Some(error) = captured.error {
                    return Err(error);
                }
            }
        }

        let (_, outputs) = process_outputs(evaluator, &bindings, &Value::Null, &self.outputs)?;
        Ok(outputs)
    }

    async fn spawn(
        &self,
        ctx: &OperationContext,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Captured> {
        let work_dir = match &self.work_dir {
            Some(dir) => crate::common::paths::resolve(&ctx.base_path, dir),
            None => ctx.base_path.clone(),
        };
        tracing::debug!(program = %self.program, ?args, work_dir = %work_dir.display(), "spawning process");

        let child = tokio::process::Command::new(&self.program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CommandFailed(format!("failed to start {}: {e}", self.program)))?;

        let timeout = ctx.retry.timeout;
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            output = tokio::time::timeout(timeout, child.wait_with_output()) => match output {
                Ok(output) => output?,
                Err(_) => return Err(Error::Timeout(timeout)),
            },
        };

        let error = if output.status.success() {
            None
        } else {
            Some(Error::CommandFailed(match output.status.code() {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            }))
        };
        Ok(Captured {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            error,
        })
    }
}

/// Run an entrypoint with arguments
pub struct Command {
    op: CommandOperation,
}

impl Command {
    pub fn new(op: CommandOperation) -> Self {
        Self { op }
    }
}

#[async_trait]
impl Reconciler for Command {
    fn kind(&self) -> OperationKind {
        OperationKind::Command
    }

    fn target(&self) -> String {
        self.op.entrypoint.clone()
    }

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs> {
        Invocation {
            program: self.op.entrypoint.clone(),
            args: self.op.args.clone(),
            script: None,
            env: resolve_env(ctx, &self.op.env)?,
            work_dir: self.op.work_dir.as_ref().map(PathBuf::from),
            check: self.op.check.clone(),
            outputs: self.op.outputs.clone(),
            skip_log_output: self.op.skip_log_output,
        }
        .run(ctx)
        .await
    }
}
