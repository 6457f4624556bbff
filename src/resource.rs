//! Accessors over untyped resource documents

use serde_json::{Map, Value};

use crate::client::ObjectKey;

/// Split `group/version` into its parts; the core group is empty
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Kubernetes-style metadata access on a JSON document
pub trait ResourceExt {
    fn api_version(&self) -> &str;
    fn kind(&self) -> &str;
    fn name(&self) -> &str;
    fn namespace(&self) -> Option<&str>;
    fn resource_version(&self) -> Option<&str>;
    fn labels(&self) -> Option<&Map<String, Value>>;
    fn set_namespace(&mut self, namespace: &str);
    fn set_resource_version(&mut self, version: &str);

    /// Whether the document names a type (`apiVersion` and `kind`)
    fn has_type(&self) -> bool {
        !self.api_version().is_empty() && !self.kind().is_empty()
    }

    /// Identity used by the API client
    fn object_key(&self) -> ObjectKey {
        ObjectKey {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            namespace: self.namespace().map(str::to_string),
            name: self.name().to_string(),
        }
    }

    /// Plain `key=value` label selector built from string labels
    fn label_selector(&self) -> Option<String> {
        let labels = self.labels()?;
        let parts: Vec<String> = labels
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| format!("{k}={v}")))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }
}

fn metadata_mut(value: &mut Value) -> Option<&mut Map<String, Value>> {
    let object = value.as_object_mut()?;
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    metadata.as_object_mut()
}

impl ResourceExt for Value {
    fn api_version(&self) -> &str {
        self.get("apiVersion").and_then(Value::as_str).unwrap_or_default()
    }

    fn kind(&self) -> &str {
        self.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn namespace(&self) -> Option<&str> {
        self.pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
    }

    fn resource_version(&self) -> Option<&str> {
        self.pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
    }

    fn labels(&self) -> Option<&Map<String, Value>> {
        self.pointer("/metadata/labels").and_then(Value::as_object)
    }

    fn set_namespace(&mut self, namespace: &str) {
        if let Some(metadata) = metadata_mut(self) {
            metadata.insert("namespace".into(), Value::String(namespace.to_string()));
        }
    }

    fn set_resource_version(&mut self, version: &str) {
        if let Some(metadata) = metadata_mut(self) {
            metadata.insert("resourceVersion".into(), Value::String(version.to_string()));
        }
    }
}
