//! Running one operation entry: scope, reconcilers, events and report

use chrono::Utc;
use tokio::time::Instant;

use super::context::ExecContext;
use super::events::{EventStatus, OperationEvent};
use crate::bindings::{register_outputs, Outputs};
use crate::common::Result;
use crate::model::{Operation, OperationKind};
use crate::operations::{self, OperationContext, Reconciler};
use crate::report::{OperationReport, Section};

fn emit(
    ctx: &ExecContext,
    kind: OperationKind,
    resource: &str,
    status: EventStatus,
    started: Instant,
    error: Option<String>,
) {
    ctx.sink.emit(OperationEvent {
        test: ctx.test.clone(),
        step: ctx.step.clone(),
        kind,
        resource: resource.to_string(),
        status,
        elapsed: started.elapsed(),
        error,
    });
}

async fn prepare(ctx: &ExecContext, operation: &Operation) -> Result<(OperationContext, Vec<Box<dyn Reconciler>>)> {
    let scope = ctx.with_bindings(operation.bindings())?;
    let op_ctx = scope.operation(
        operation.kind(),
        operation.timeout(),
        operation.template(),
        operation.clusters(),
    )?;
    let reconcilers = operations::build(operation, &ctx.base_path)?;
    Ok((op_ctx, reconcilers))
}

/// Execute every reconciler of an operation in order
///
/// Outputs of one target are visible to the next. The first error stops
/// the operation.
pub async fn execute(ctx: &ExecContext, operation: &Operation) -> Result<Outputs> {
    let kind = operation.kind();
    let started = Instant::now();
    let (mut op_ctx, reconcilers) = match prepare(ctx, operation).await {
        Ok(prepared) => prepared,
        Err(e) => {
            emit(ctx, kind, "", EventStatus::Error, started, Some(e.to_string()));
            return Err(e);
        }
    };

    let mut produced = Outputs::new();
    for reconciler in reconcilers {
        let target = reconciler.target();
        let started = Instant::now();
        emit(ctx, kind, &target, EventStatus::Run, started, None);
        match reconciler.exec(&op_ctx).await {
            Ok(outputs) => {
                emit(ctx, kind, &target, EventStatus::Done, started, None);
                op_ctx.bindings = register_outputs(&op_ctx.bindings, &outputs);
                produced.extend(outputs);
            }
            Err(e) => {
                emit(ctx, kind, &target, EventStatus::Error, started, Some(e.to_string()));
                return Err(e);
            }
        }
    }
    Ok(produced)
}

/// Execute an operation and record it
pub async fn run(
    ctx: &ExecContext,
    operation: &Operation,
    name: String,
    section: Section,
    reports: &mut Vec<OperationReport>,
) -> Result<Outputs> {
    let start_time = Utc::now();
    let result = execute(ctx, operation).await;
    reports.push(OperationReport {
        name,
        kind: operation.kind(),
        section,
        start_time,
        end_time: Utc::now(),
        error: result.as_ref().err().map(ToString::to_string),
        outputs: match (&result, section) {
            (Ok(outputs), Section::Catch) => outputs.clone(),
            _ => Outputs::new(),
        },
    });
    result
}
