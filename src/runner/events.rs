//! Per-operation events
//!
//! Every reconciler run emits a `run` event when it starts and a `done` or
//! `error` event when it finishes. The CLI logs them through tracing; tests
//! record them.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use crate::model::OperationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Run,
    Done,
    Error,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "RUN"),
            Self::Done => write!(f, "DONE"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationEvent {
    pub test: String,
    pub step: String,
    pub kind: OperationKind,
    pub resource: String,
    pub status: EventStatus,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// Receiver of operation events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OperationEvent);
}

/// Logs events as tracing records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: OperationEvent) {
        match event.status {
            EventStatus::Run => tracing::info!(
                test = %event.test,
                step = %event.step,
                "{:<8} {:<5} {}",
                event.kind,
                event.status,
                event.resource
            ),
            EventStatus::Done => tracing::info!(
                test = %event.test,
                step = %event.step,
                elapsed = ?event.elapsed,
                "{:<8} {:<5} {}",
                event.kind,
                event.status,
                event.resource
            ),
            EventStatus::Error => tracing::error!(
                test = %event.test,
                step = %event.step,
                elapsed = ?event.elapsed,
                error = event.error.as_deref().unwrap_or_default(),
                "{:<8} {:<5} {}",
                event.kind,
                event.status,
                event.resource
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<OperationEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OperationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: OperationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
