//! Cluster registry
//!
//! Named clusters map to endpoint configurations. A [`Registry`] is an
//! immutable value: registering a cluster returns a new registry and leaves
//! the original untouched, so tests and steps can add clusters without
//! affecting each other. Each [`Cluster`] resolves its configuration at
//! most once and builds its client lazily, sharing it across all registry
//! copies that contain it.

pub mod kubeconfig;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::client::{Client, HttpClient, LoggedClient};
use crate::common::{Error, Result};

/// Name of the default cluster
pub const DEFAULT_CLUSTER: &str = "";

/// Everything needed to reach an API server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiConfig {
    pub server: String,
    pub ca_data: Option<Vec<u8>>,
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
    pub token: Option<String>,
    pub insecure: bool,
    pub namespace: Option<String>,
}

/// Builds API clients from endpoint configurations
pub trait ClientFactory: Send + Sync {
    fn build(&self, config: &ApiConfig) -> Result<Arc<dyn Client>>;
}

/// Factory producing [`HttpClient`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn build(&self, config: &ApiConfig) -> Result<Arc<dyn Client>> {
        Ok(Arc::new(HttpClient::new(config)?))
    }
}

enum Source {
    Static(ApiConfig),
    Kubeconfig {
        path: PathBuf,
        context: Option<String>,
    },
}

/// A cluster whose configuration and client are resolved on first use
pub struct Cluster {
    source: Source,
    config: OnceCell<std::result::Result<ApiConfig, String>>,
    client: OnceCell<Arc<dyn Client>>,
}

impl Cluster {
    fn with_source(source: Source) -> Self {
        Self {
            source,
            config: OnceCell::new(),
            client: OnceCell::new(),
        }
    }

    /// A cluster with a fixed endpoint configuration
    pub fn from_config(config: ApiConfig) -> Self {
        Self::with_source(Source::Static(config))
    }

    /// A cluster read from a kubeconfig file the first time it is needed
    pub fn from_kubeconfig(path: impl Into<PathBuf>, context: Option<String>) -> Self {
        Self::with_source(Source::Kubeconfig {
            path: path.into(),
            context,
        })
    }

    /// A cluster with a pre-built client
    pub fn from_client(config: ApiConfig, client: Arc<dyn Client>) -> Self {
        let cluster = Self::from_config(config);
        let _ = cluster.client.set(client);
        cluster
    }

    /// Resolved endpoint configuration; resolution runs at most once
    pub fn config(&self) -> Result<ApiConfig> {
        self.config
            .get_or_init(|| match &self.source {
                Source::Static(config) => Ok(config.clone()),
                Source::Kubeconfig { path, context } => {
                    kubeconfig::load(path, context.as_deref()).map_err(|e| e.to_string())
                }
            })
            .clone()
            .map_err(Error::Cluster)
    }
}

/// Immutable name -> cluster mapping plus the client factory
#[derive(Clone)]
pub struct Registry {
    clusters: Arc<HashMap<String, Arc<Cluster>>>,
    factory: Arc<dyn ClientFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(HttpClientFactory))
    }
}

impl Registry {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            clusters: Arc::new(HashMap::new()),
            factory,
        }
    }

    /// Return a registry that additionally maps `name` to `cluster`
    pub fn register(&self, name: impl Into<String>, cluster: Arc<Cluster>) -> Self {
        let mut clusters = (*self.clusters).clone();
        clusters.insert(name.into(), cluster);
        Self {
            clusters: Arc::new(clusters),
            factory: self.factory.clone(),
        }
    }

    /// Register kubeconfig-backed clusters, resolving paths against `base`
    pub fn register_specs<'a>(
        &self,
        specs: impl IntoIterator<Item = (&'a String, &'a crate::model::ClusterSpec)>,
        base: &Path,
    ) -> Self {
        specs.into_iter().fold(self.clone(), |registry, (name, spec)| {
            let path = crate::common::paths::resolve(base, Path::new(&spec.kubeconfig));
            registry.register(
                name.clone(),
                Arc::new(Cluster::from_kubeconfig(path, spec.context.clone())),
            )
        })
    }

    /// Look up a cluster by name
    pub fn lookup(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.get(name).cloned()
    }

    /// Configuration and memoized client for a cluster
    pub fn build(&self, name: &str, cluster: &Cluster) -> Result<(ApiConfig, Arc<dyn Client>)> {
        let config = cluster.config()?;
        let client = cluster.client.get_or_try_init(|| {
            tracing::debug!(cluster = %display_name(name), server = %config.server, "building client");
            let inner = self.factory.build(&config)?;
            Ok::<_, Error>(Arc::new(LoggedClient::new(display_name(name), inner)) as Arc<dyn Client>)
        })?;
        Ok((config, client.clone()))
    }

    /// Look up and build a cluster; `None` selects the default cluster
    pub fn resolve(&self, name: Option<&str>) -> Result<(ApiConfig, Arc<dyn Client>)> {
        let name = name.unwrap_or(DEFAULT_CLUSTER);
        let cluster = self
            .lookup(name)
            .ok_or_else(|| Error::ClusterNotFound(display_name(name).to_string()))?;
        self.build(name, &cluster)
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "default"
    } else {
        name
    }
}
