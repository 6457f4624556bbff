//! Run inline shell content

use std::path::PathBuf;

use async_trait::async_trait;

use super::command::{resolve_env, Invocation};
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::common::Result;
use crate::model::{OperationKind, ScriptOperation};

const DEFAULT_SHELL: &str = "sh";

pub struct Script {
    op: ScriptOperation,
}

impl Script {
    pub fn new(op: ScriptOperation) -> Self {
        Self { op }
    }
}

#[async_trait]
impl Reconciler for Script {
    fn kind(&self) -> OperationKind {
        OperationKind::Script
    }

    fn target(&self) -> String {
        self.op.content.lines().next().unwrap_or_default().to_string()
    }

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs> {
        Invocation {
            program: self
                .op
                .shell
                .clone()
                .unwrap_or_else(|| DEFAULT_SHELL.to_string()),
            args: self
                .op
                .shell_args
                .clone()
                .unwrap_or_else(|| vec!["-c".to_string()]),
            // the shell expands variables in the content itself
            script: Some(self.op.content.clone()),
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
