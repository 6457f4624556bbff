//! In-process API client
//!
//! Behaves like a minimal API server: resource versions, optimistic
//! concurrency on update and patch, merge patches, label selectors and
//! cluster-scoped kinds. Failures can be injected per verb, and every
//! call is counted, which makes it the backend of choice for exercising
//! reconcilers deterministically.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::patch::apply_merge_patch;
use super::{guess_plural, Client, ClientError, DeletionPropagation, ObjectKey};
use crate::resource::ResourceExt;

/// Client call kinds, used for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Patch,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
        };
        f.write_str(s)
    }
}

const CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PriorityClass",
];

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    version: u64,
    cluster_scoped: HashSet<String>,
    failures: VecDeque<(Verb, ClientError)>,
    calls: HashMap<Verb, usize>,
    deletions: Vec<(ObjectKey, DeletionPropagation)>,
}

/// In-memory [`Client`] implementation
pub struct MemoryClient {
    state: Mutex<State>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        let state = State {
            cluster_scoped: CLUSTER_SCOPED.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an object as-is, assigning a resource version
    pub fn insert(&self, object: Value) {
        let mut state = self.lock();
        let mut object = object;
        let key = state.normalize(&mut object);
        state.version += 1;
        let version = state.version.to_string();
        object.set_resource_version(&version);
        state.objects.insert(key, object);
    }

    /// Make the next `times` calls of `verb` fail with `error`
    pub fn fail_next(&self, verb: Verb, error: ClientError, times: usize) {
        let mut state = self.lock();
        for _ in 0..times {
            state.failures.push_back((verb, error.clone()));
        }
    }

    /// Treat `kind` as cluster scoped
    pub fn set_cluster_scoped(&self, kind: &str) {
        self.lock().cluster_scoped.insert(kind.to_string());
    }

    /// Number of calls made for `verb`
    pub fn calls(&self, verb: Verb) -> usize {
        self.lock().calls.get(&verb).copied().unwrap_or_default()
    }

    /// Stored copy of an object
    pub fn object(&self, key: &ObjectKey) -> Option<Value> {
        self.lock().objects.get(key).cloned()
    }

    /// All stored objects
    pub fn objects(&self) -> Vec<Value> {
        self.lock().objects.values().cloned().collect()
    }

    /// Successful deletions, in call order
    pub fn deletions(&self) -> Vec<(ObjectKey, DeletionPropagation)> {
        self.lock().deletions.clone()
    }

    /// Replace the `status` of a stored object without bumping anything else
    pub fn set_status(&self, key: &ObjectKey, status: Value) -> bool {
        let mut state = self.lock();
        match state.objects.get_mut(key) {
            Some(object) => {
                if let Some(map) = object.as_object_mut() {
                    map.insert("status".into(), status);
                }
                true
            }
            None => false,
        }
    }

    /// Count the call and pop an injected failure for it, if any
    fn enter(&self, verb: Verb) -> Result<std::sync::MutexGuard<'_, State>, ClientError> {
        let mut state = self.lock();
        *state.calls.entry(verb).or_default() += 1;
        if let Some(pos) = state.failures.iter().position(|(v, _)| *v == verb) {
            if let Some((_, error)) = state.failures.remove(pos) {
                return Err(error);
            }
        }
        Ok(state)
    }
}

impl State {
    fn namespaced(&self, kind: &str) -> bool {
        !self.cluster_scoped.contains(kind)
    }

    /// Fix up the namespace of an incoming object and compute its key
    fn normalize(&self, object: &mut Value) -> ObjectKey {
        if self.namespaced(object.kind()) {
            if object.namespace().is_none() {
                object.set_namespace("default");
            }
        } else if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("namespace");
        }
        object.object_key()
    }

    fn key(&self, key: &ObjectKey) -> ObjectKey {
        let mut key = key.clone();
        if !self.namespaced(&key.kind) {
            key.namespace = None;
        } else if key.namespace.is_none() {
            key.namespace = Some("default".to_string());
        }
        key
    }

    fn bump(&mut self, object: &mut Value) {
        self.version += 1;
        let version = self.version.to_string();
        object.set_resource_version(&version);
    }
}

/// Evaluate a label selector (`a=b`, `a!=b`, `a`, `!a`, comma separated)
pub fn selector_matches(selector: &str, object: &Value) -> bool {
    let labels = object.labels();
    let label = |name: &str| labels.and_then(|l| l.get(name)).and_then(Value::as_str);
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                label(k.trim()) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                label(k.trim()) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                label(k.trim()).is_none()
            } else {
                label(term).is_some()
            }
        })
}

#[async_trait]
impl Client for MemoryClient {
    async fn get(&self, key: &ObjectKey) -> Result<Value, ClientError> {
        let state = self.enter(Verb::Get)?;
        let key = state.key(key);
        state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::not_found(&key))
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let state = self.enter(Verb::List)?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.api_version == api_version && key.kind == kind)
            .filter(|(key, _)| match namespace {
                Some(ns) => key.namespace.as_deref() == Some(ns),
                None => true,
            })
            .filter(|(_, object)| selector.map_or(true, |s| selector_matches(s, object)))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, object: &Value) -> Result<Value, ClientError> {
        let mut state = self.enter(Verb::Create)?;
        if !object.has_type() || object.name().is_empty() {
            return Err(ClientError::Invalid(
                "apiVersion, kind and metadata.name are required".to_string(),
            ));
        }
        let mut object = object.clone();
        let key = state.normalize(&mut object);
        if state.objects.contains_key(&key) {
            return Err(ClientError::already_exists(&key));
        }
        state.bump(&mut object);
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, object: &Value) -> Result<Value, ClientError> {
        let mut state = self.enter(Verb::Update)?;
        let mut object = object.clone();
        let key = state.normalize(&mut object);
        let stored = state
            .objects
            .get(&key)
            .ok_or_else(|| ClientError::not_found(&key))?;
        if let Some(version) = object.resource_version() {
            if Some(version) != stored.resource_version() {
                return Err(ClientError::conflict(
                    &key,
                    "the object has been modified; please apply your changes to the latest version and try again",
                ));
            }
        }
        state.bump(&mut object);
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value, ClientError> {
        let mut state = self.enter(Verb::Patch)?;
        let key = state.key(key);
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::not_found(&key))?;
        if let Some(version) = patch.resource_version() {
            if Some(version) != stored.resource_version() {
                return Err(ClientError::conflict(&key, "the object has been modified"));
            }
        }
        let mut patched = apply_merge_patch(&stored, patch);
        if patched == stored {
            return Ok(stored);
        }
        state.bump(&mut patched);
        state.objects.insert(key, patched.clone());
        Ok(patched)
    }

    async fn delete(
        &self,
        key: &ObjectKey,
        propagation: DeletionPropagation,
    ) -> Result<(), ClientError> {
        let mut state = self.enter(Verb::Delete)?;
        let key = state.key(key);
        if state.objects.remove(&key).is_none() {
            return Err(ClientError::not_found(&key));
        }
        if key.kind == "Namespace" {
            state
                .objects
                .retain(|k, _| k.namespace.as_deref() != Some(key.name.as_str()));
        }
        state.deletions.push((key, propagation));
        Ok(())
    }

    async fn is_namespaced(&self, _api_version: &str, kind: &str) -> Result<bool, ClientError> {
        Ok(self.lock().namespaced(kind))
    }

    async fn resource_name(&self, _api_version: &str, kind: &str) -> Result<String, ClientError> {
        Ok(guess_plural(kind))
    }
}
