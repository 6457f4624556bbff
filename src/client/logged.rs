//! Client wrapper emitting one tracing event per call

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use super::{Client, ClientError, DeletionPropagation, ObjectKey};
use crate::resource::ResourceExt;

/// Wraps a [`Client`] and logs every call without changing its result
pub struct LoggedClient {
    cluster: String,
    inner: Arc<dyn Client>,
}

impl LoggedClient {
    pub fn new(cluster: impl Into<String>, inner: Arc<dyn Client>) -> Self {
        Self {
            cluster: cluster.into(),
            inner,
        }
    }

    fn record<T>(
        &self,
        verb: &str,
        resource: &str,
        started: Instant,
        result: &Result<T, ClientError>,
    ) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(_) => tracing::debug!(
                cluster = %self.cluster,
                verb,
                resource,
                elapsed_ms,
                "client call"
            ),
            Err(e) => tracing::debug!(
                cluster = %self.cluster,
                verb,
                resource,
                elapsed_ms,
                error = %e,
                "client call failed"
            ),
        }
    }
}

#[async_trait]
impl Client for LoggedClient {
    async fn get(&self, key: &ObjectKey) -> Result<Value, ClientError> {
        let started = Instant::now();
        let result = self.inner.get(key).await;
        self.record("get", &key.to_string(), started, &result);
        result
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let started = Instant::now();
        let result = self.inner.list(api_version, kind, namespace, selector).await;
        let target = format!(
            "{api_version}/{kind} @ {}{}",
            namespace.unwrap_or("*"),
            selector.map(|s| format!(" ({s})")).unwrap_or_default()
        );
        self.record("list", &target, started, &result);
        result
    }

    async fn create(&self, object: &Value) -> Result<Value, ClientError> {
        let started = Instant::now();
        let result = self.inner.create(object).await;
        self.record("create", &object.object_key().to_string(), started, &result);
        result
    }

    async fn update(&self, object: &Value) -> Result<Value, ClientError> {
        let started = Instant::now();
        let result = self.inner.update(object).await;
        self.record("update", &object.object_key().to_string(), started, &result);
        result
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value, ClientError> {
        let started = Instant::now();
        let result = self.inner.patch(key, patch).await;
        self.record("patch", &key.to_string(), started, &result);
        result
    }

    async fn delete(
        &self,
        key: &ObjectKey,
        propagation: DeletionPropagation,
    ) -> Result<(), ClientError> {
        let started = Instant::now();
        let result = self.inner.delete(key, propagation).await;
        self.record("delete", &key.to_string(), started, &result);
        result
    }

    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool, ClientError> {
        self.inner.is_namespaced(api_version, kind).await
    }

    async fn resource_name(&self, api_version: &str, kind: &str) -> Result<String, ClientError> {
        self.inner.resource_name(api_version, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_wrapper_is_transparent() {
        let memory = Arc::new(MemoryClient::new());
        let client = LoggedClient::new("default", memory.clone());
        let obj = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a", "namespace": "ns"}});
        let created = client.create(&obj).await.unwrap();
        assert_eq!(client.get(&created.object_key()).await.unwrap(), created);
        assert!(client.create(&obj).await.unwrap_err().is_already_exists());
        assert_eq!(memory.calls(crate::client::Verb::Create), 2);
    }
}
