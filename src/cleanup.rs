//! Deferred deletion of created resources
//!
//! Every object created by a test is recorded here together with the
//! client that created it. At teardown the queue is drained in reverse
//! registration order. There is no dependency-aware ordering.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, DeletionPropagation};
use crate::common::{Error, Result};
use crate::operations::retry::RetryPolicy;
use crate::resource::ResourceExt;

/// One pending deletion
#[derive(Clone)]
pub struct CleanupEntry {
    pub client: Arc<dyn Client>,
    pub object: Value,
}

/// Test-local queue of objects to delete at teardown
#[derive(Clone, Default)]
pub struct CleanupQueue {
    entries: Arc<Mutex<Vec<CleanupEntry>>>,
}

impl CleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CleanupEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an object for deletion at teardown
    pub fn push(&self, client: Arc<dyn Client>, object: Value) {
        tracing::debug!(resource = %object.object_key(), "cleanup registered");
        self.lock().push(CleanupEntry { client, object });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every entry, most recently registered first
    pub fn drain(&self) -> Vec<CleanupEntry> {
        let mut entries = std::mem::take(&mut *self.lock());
        entries.reverse();
        entries
    }

    /// Delete every queued object and wait until it is gone
    ///
    /// Entries are independent: a failure is recorded and the next entry
    /// is still processed. Already deleted objects count as success.
    pub async fn run(
        &self,
        propagation: DeletionPropagation,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Vec<(String, Error)> {
        let mut failures = Vec::new();
        for entry in self.drain() {
            let key = entry.object.object_key();
            if let Err(e) = delete_and_wait(entry.client.as_ref(), &entry.object, propagation, policy, cancel).await {
                tracing::warn!(resource = %key, error = %e, "cleanup failed");
                failures.push((key.to_string(), e));
            }
        }
        failures
    }
}

/// Delete `object`, tolerating absence, then poll until it disappears
pub async fn delete_and_wait(
    client: &dyn Client,
    object: &Value,
    propagation: DeletionPropagation,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let key = object.object_key();
    match client.delete(&key, propagation).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    policy
        .run(cancel, || async {
            match client.get(&key).await {
                Ok(_) => Err(Error::WaitNotSatisfied(format!("{key} is still present"))),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
}
