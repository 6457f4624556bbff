//! API client abstraction
//!
//! Operations talk to a cluster through the [`Client`] trait: generic
//! get/list/create/update/merge-patch/delete over JSON documents, plus the
//! type mapping needed to namespace objects and address them by resource
//! name. [`HttpClient`] talks to a real API server, [`MemoryClient`] keeps
//! everything in process.

pub mod http;
pub mod logged;
pub mod memory;
pub mod patch;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use http::HttpClient;
pub use logged::LoggedClient;
pub use memory::{MemoryClient, Verb};

/// Identity of a single object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} @ {}/{}", self.api_version, self.kind, ns, self.name),
            None => write!(f, "{}/{} @ {}", self.api_version, self.kind, self.name),
        }
    }
}

/// Deletion propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletionPropagation {
    Orphan,
    #[default]
    Background,
    Foreground,
}

impl fmt::Display for DeletionPropagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeletionPropagation::Orphan => "Orphan",
            DeletionPropagation::Background => "Background",
            DeletionPropagation::Foreground => "Foreground",
        };
        f.write_str(s)
    }
}

/// Errors returned by API clients
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("Operation cannot be fulfilled on {kind} \"{name}\": {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("no matches for kind \"{kind}\" in version \"{api_version}\"")]
    UnknownKind { api_version: String, kind: String },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ClientError {
    pub fn not_found(key: &ObjectKey) -> Self {
        Self::NotFound {
            kind: key.kind.clone(),
            name: key.name.clone(),
        }
    }

    pub fn already_exists(key: &ObjectKey) -> Self {
        Self::AlreadyExists {
            kind: key.kind.clone(),
            name: key.name.clone(),
        }
    }

    pub fn conflict(key: &ObjectKey, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind: key.kind.clone(),
            name: key.name.clone(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }

    /// Invalid objects never become valid by waiting
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClientError::Invalid(_))
    }
}

/// Generic structured-document client
#[async_trait]
pub trait Client: Send + Sync {
    /// Fetch a single object
    async fn get(&self, key: &ObjectKey) -> Result<Value, ClientError>;

    /// List objects of a type, optionally restricted to a namespace and label selector
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<Value>, ClientError>;

    /// Create an object, failing if it already exists
    async fn create(&self, object: &Value) -> Result<Value, ClientError>;

    /// Replace an object; a set `resourceVersion` must match the stored one
    async fn update(&self, object: &Value) -> Result<Value, ClientError>;

    /// Apply a JSON merge patch
    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value, ClientError>;

    /// Delete an object
    async fn delete(
        &self,
        key: &ObjectKey,
        propagation: DeletionPropagation,
    ) -> Result<(), ClientError>;

    /// Whether objects of this type live in a namespace
    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool, ClientError>;

    /// Plural resource name for a type (`Deployment` -> `deployments`)
    async fn resource_name(&self, api_version: &str, kind: &str) -> Result<String, ClientError>;
}

/// Naive pluralization used when no discovery information is available
pub fn guess_plural(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y') {
        if stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            format!("{lower}s")
        } else {
            format!("{stem}ies")
        }
    } else {
        format!("{lower}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("v1", "ConfigMap", Some("ns"), "cm");
        assert_eq!(key.to_string(), "v1/ConfigMap @ ns/cm");
        let key = ObjectKey::new("v1", "Namespace", None, "ns");
        assert_eq!(key.to_string(), "v1/Namespace @ ns");
    }

    #[test]
    fn test_guess_plural() {
        assert_eq!(guess_plural("Deployment"), "deployments");
        assert_eq!(guess_plural("Ingress"), "ingresses");
        assert_eq!(guess_plural("NetworkPolicy"), "networkpolicies");
        assert_eq!(guess_plural("Gateway"), "gateways");
    }

    #[test]
    fn test_error_classification() {
        let key = ObjectKey::new("v1", "Pod", Some("ns"), "p");
        assert!(ClientError::not_found(&key).is_not_found());
        assert!(ClientError::not_found(&key).is_retryable());
        assert!(!ClientError::Invalid("bad".into()).is_retryable());
        assert_eq!(
            ClientError::not_found(&key).to_string(),
            "Pod \"p\" not found"
        );
    }
}
