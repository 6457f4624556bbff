//! Default namespace assignment

use serde_json::Value;

use crate::client::Client;
use crate::common::Result;
use crate::resource::ResourceExt;

/// Assigns the test namespace to namespaced objects that have none
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespacer {
    namespace: String,
}

impl Namespacer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Set the namespace on `object` when its kind is namespaced
    ///
    /// Objects without a type are left untouched.
    pub async fn apply(&self, client: &dyn Client, object: &mut Value) -> Result<()> {
        if !object.has_type() || object.namespace().is_some() {
            return Ok(());
        }
        if client
            .is_namespaced(object.api_version(), object.kind())
            .await?
        {
            object.set_namespace(&self.namespace);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_assigns_namespace_to_namespaced_kinds() {
        let client = MemoryClient::new();
        let namespacer = Namespacer::new("chainsaw-test");

        let mut configmap = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}});
        namespacer.apply(&client, &mut configmap).await.unwrap();
        assert_eq!(configmap.namespace(), Some("chainsaw-test"));

        let mut namespace = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "b"}});
        namespacer.apply(&client, &mut namespace).await.unwrap();
        assert_eq!(namespace.namespace(), None);
    }

    #[tokio::test]
    async fn test_keeps_explicit_namespace() {
        let client = MemoryClient::new();
        let mut object = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "a", "namespace": "other"}
        });
        Namespacer::new("chainsaw-test")
            .apply(&client, &mut object)
            .await
            .unwrap();
        assert_eq!(object.namespace(), Some("other"));
    }
}
