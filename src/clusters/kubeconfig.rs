//! Kubeconfig reading and writing
//!
//! Only the fields needed to reach an API server are understood: server
//! URL, certificate authority, client certificate/key, bearer token and
//! the context namespace. Operations that shell out to `kubectl` get a
//! freshly rendered kubeconfig for their cluster.

use std::path::Path;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::ApiConfig;
use crate::common::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_context: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    certificate_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    certificate_authority_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    insecure_skip_tls_verify: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_certificate_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_key_data: Option<String>,
}

/// Load an endpoint configuration from a kubeconfig file
///
/// Uses `context` when given, the file's current context otherwise.
pub fn load(path: &Path, context: Option<&str>) -> Result<ApiConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&content, context, base)
}

/// Parse kubeconfig text; relative file references resolve against `base`
pub fn parse(content: &str, context: Option<&str>, base: &Path) -> Result<ApiConfig> {
    let config: Kubeconfig = serde_yaml::from_str(content)?;

    let context_name = context
        .map(str::to_string)
        .or_else(|| config.current_context.clone())
        .ok_or_else(|| Error::Cluster("kubeconfig has no current context".to_string()))?;
    let context = config
        .contexts
        .iter()
        .find(|c| c.name == context_name)
        .map(|c| &c.context)
        .ok_or_else(|| Error::Cluster(format!("context '{context_name}' not found")))?;
    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.cluster)
        .map(|c| &c.cluster)
        .ok_or_else(|| Error::Cluster(format!("cluster '{}' not found", context.cluster)))?;
    let user = config
        .users
        .iter()
        .find(|u| u.name == context.user)
        .map(|u| &u.user);

    let token = match user {
        Some(UserEntry {
            token: Some(token), ..
        }) => Some(token.clone()),
        Some(UserEntry {
            token_file: Some(file),
            ..
        }) => Some(read_file(base, file)?.trim().to_string()),
        _ => None,
    };

    Ok(ApiConfig {
        server: cluster.server.clone(),
        ca_data: data_or_file(
            base,
            &cluster.certificate_authority_data,
            &cluster.certificate_authority,
        )?,
        client_cert: match user {
            Some(u) => data_or_file(base, &u.client_certificate_data, &u.client_certificate)?,
            None => None,
        },
        client_key: match user {
            Some(u) => data_or_file(base, &u.client_key_data, &u.client_key)?,
            None => None,
        },
        token,
        insecure: cluster.insecure_skip_tls_verify.unwrap_or(false),
        namespace: context.namespace.clone(),
    })
}

/// Render a single-context kubeconfig for `config`
pub fn render(config: &ApiConfig) -> Result<String> {
    let encode = |bytes: &Vec<u8>| base64::engine::general_purpose::STANDARD.encode(bytes);
    let kubeconfig = Kubeconfig {
        api_version: Some("v1".to_string()),
        kind: Some("Config".to_string()),
        clusters: vec![NamedCluster {
            name: "cluster".to_string(),
            cluster: ClusterEntry {
                server: config.server.clone(),
                certificate_authority_data: config.ca_data.as_ref().map(encode),
                insecure_skip_tls_verify: config.insecure.then_some(true),
                ..Default::default()
            },
        }],
        contexts: vec![NamedContext {
            name: "context".to_string(),
            context: ContextEntry {
                cluster: "cluster".to_string(),
                user: "user".to_string(),
                namespace: config.namespace.clone(),
            },
        }],
        users: vec![NamedUser {
            name: "user".to_string(),
            user: UserEntry {
                token: config.token.clone(),
                client_certificate_data: config.client_cert.as_ref().map(encode),
                client_key_data: config.client_key.as_ref().map(encode),
                ..Default::default()
            },
        }],
        current_context: Some("context".to_string()),
    };
    Ok(serde_yaml::to_string(&kubeconfig)?)
}

fn read_file(base: &Path, file: &str) -> Result<String> {
    let path = crate::common::paths::resolve(base, Path::new(file));
    std::fs::read_to_string(&path).map_err(|e| Error::file_read(&path, e))
}

fn data_or_file(base: &Path, data: &Option<String>, file: &Option<String>) -> Result<Option<Vec<u8>>> {
    if let Some(data) = data {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| Error::Cluster(format!("invalid base64 data: {e}")))?;
        return Ok(Some(bytes));
    }
    match file {
        Some(file) => Ok(Some(read_file(base, file)?.into_bytes())),
        None => Ok(None),
    }
}
