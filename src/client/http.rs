//! HTTP client for a Kubernetes API server
//!
//! Resource URLs are derived from API discovery, which is fetched once per
//! group/version and cached. Error statuses are mapped onto
//! [`ClientError`] using the `reason` of the returned `Status` object.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{header, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{Client, ClientError, DeletionPropagation, ObjectKey};
use crate::clusters::ApiConfig;
use crate::resource::{split_api_version, ResourceExt};

#[derive(Debug, Clone, Deserialize)]
struct ApiResource {
    name: String,
    kind: String,
    namespaced: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResourceList {
    #[serde(default)]
    resources: Vec<ApiResource>,
}

#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: String,
}

/// [`Client`] backed by the Kubernetes REST API
pub struct HttpClient {
    http: reqwest::Client,
    server: String,
    discovery: RwLock<HashMap<String, Vec<ApiResource>>>,
}

impl HttpClient {
    /// Build a client for the given endpoint configuration
    pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = &config.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ClientError::Invalid(format!("bearer token: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.insecure);

        if let Some(ca) = &config.ca_data {
            let cert = reqwest::Certificate::from_pem(ca)
                .map_err(|e| ClientError::Invalid(format!("certificate authority: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&config.client_cert, &config.client_key) {
            let mut pem = cert.clone();
            pem.push(b'\n');
            pem.extend_from_slice(key);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ClientError::Invalid(format!("client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        let http = builder
            .build()
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            server: config.server.trim_end_matches('/').to_string(),
            discovery: RwLock::new(HashMap::new()),
        })
    }

    fn group_path(api_version: &str) -> String {
        match split_api_version(api_version) {
            ("", version) => format!("/api/{version}"),
            (group, version) => format!("/apis/{group}/{version}"),
        }
    }

    async fn resource(&self, api_version: &str, kind: &str) -> Result<ApiResource, ClientError> {
        if let Some(resources) = self.discovery.read().await.get(api_version) {
            if let Some(found) = resources.iter().find(|r| r.kind == kind) {
                return Ok(found.clone());
            }
        }

        let url = format!("{}{}", self.server, Self::group_path(api_version));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        let list: ApiResourceList = match response.status() {
            StatusCode::NOT_FOUND => ApiResourceList { resources: vec![] },
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| ClientError::Connection(e.to_string()))?,
            _ => return Err(Self::error_from(response, kind, "").await),
        };
        let resources: Vec<ApiResource> = list
            .resources
            .into_iter()
            .filter(|r| !r.name.contains('/'))
            .collect();
        let found = resources.iter().find(|r| r.kind == kind).cloned();
        self.discovery
            .write()
            .await
            .insert(api_version.to_string(), resources);

        found.ok_or_else(|| ClientError::UnknownKind {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        })
    }

    async fn url(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, ClientError> {
        let resource = self.resource(api_version, kind).await?;
        let mut url = format!("{}{}", self.server, Self::group_path(api_version));
        if resource.namespaced {
            if let Some(ns) = namespace {
                url.push_str(&format!("/namespaces/{ns}"));
            }
        }
        url.push('/');
        url.push_str(&resource.name);
        if let Some(name) = name {
            url.push('/');
            url.push_str(name);
        }
        Ok(url)
    }

    async fn error_from(response: reqwest::Response, kind: &str, name: &str) -> ClientError {
        let code = response.status();
        let status: Status = response.json().await.unwrap_or_default();
        let kind = kind.to_string();
        let name = name.to_string();
        match code {
            StatusCode::NOT_FOUND => ClientError::NotFound { kind, name },
            StatusCode::CONFLICT if status.reason == "AlreadyExists" => {
                ClientError::AlreadyExists { kind, name }
            }
            StatusCode::CONFLICT => ClientError::Conflict {
                kind,
                name,
                message: status.message,
            },
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
                ClientError::Invalid(status.message)
            }
            other => ClientError::Api {
                status: other.as_u16(),
                message: status.message,
            },
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<(&Value, &'static str)>,
        kind: &str,
        name: &str,
    ) -> Result<Value, ClientError> {
        let mut request = self.http.request(method, url);
        if let Some((body, content_type)) = body {
            request = request
                .header(header::CONTENT_TYPE, content_type)
                .body(body.to_string());
        }
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, kind, name).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn get(&self, key: &ObjectKey) -> Result<Value, ClientError> {
        let url = self
            .url(&key.api_version, &key.kind, key.namespace.as_deref(), Some(&key.name))
            .await?;
        self.send(Method::GET, &url, None, &key.kind, &key.name).await
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let mut url = self.url(api_version, kind, namespace, None).await?;
        if let Some(selector) = selector {
            url = reqwest::Url::parse_with_params(&url, &[("labelSelector", selector)])
                .map_err(|e| ClientError::Invalid(e.to_string()))?
                .to_string();
        }
        let list = self.send(Method::GET, &url, None, kind, "").await?;
        let items = list
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|mut item| {
                if let Some(map) = item.as_object_mut() {
                    map.insert("apiVersion".into(), Value::String(api_version.to_string()));
                    map.insert("kind".into(), Value::String(kind.to_string()));
                }
                item
            })
            .collect())
    }

    async fn create(&self, object: &Value) -> Result<Value, ClientError> {
        let url = self
            .url(object.api_version(), object.kind(), object.namespace(), None)
            .await?;
        self.send(
            Method::POST,
            &url,
            Some((object, "application/json")),
            object.kind(),
            object.name(),
        )
        .await
    }

    async fn update(&self, object: &Value) -> Result<Value, ClientError> {
        let url = self
            .url(
                object.api_version(),
                object.kind(),
                object.namespace(),
                Some(object.name()),
            )
            .await?;
        self.send(
            Method::PUT,
            &url,
            Some((object, "application/json")),
            object.kind(),
            object.name(),
        )
        .await
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value, ClientError> {
        let url = self
            .url(&key.api_version, &key.kind, key.namespace.as_deref(), Some(&key.name))
            .await?;
        self.send(
            Method::PATCH,
            &url,
            Some((patch, "application/merge-patch+json")),
            &key.kind,
            &key.name,
        )
        .await
    }

    async fn delete(
        &self,
        key: &ObjectKey,
        propagation: DeletionPropagation,
    ) -> Result<(), ClientError> {
        let url = self
            .url(&key.api_version, &key.kind, key.namespace.as_deref(), Some(&key.name))
            .await?;
        let options = json!({
            "apiVersion": "v1",
            "kind": "DeleteOptions",
            "propagationPolicy": propagation.to_string(),
        });
        self.send(
            Method::DELETE,
            &url,
            Some((&options, "application/json")),
            &key.kind,
            &key.name,
        )
        .await
        .map(|_| ())
    }

    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool, ClientError> {
        Ok(self.resource(api_version, kind).await?.namespaced)
    }

    async fn resource_name(&self, api_version: &str, kind: &str) -> Result<String, ClientError> {
        Ok(self.resource(api_version, kind).await?.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_path() {
        assert_eq!(HttpClient::group_path("v1"), "/api/v1");
        assert_eq!(HttpClient::group_path("apps/v1"), "/apis/apps/v1");
    }

    #[test]
    fn test_builds_without_credentials() {
        let config = ApiConfig {
            server: "https://127.0.0.1:6443/".to_string(),
            ..Default::default()
        };
        let client = HttpClient::new(&config).unwrap();
        assert_eq!(client.server, "https://127.0.0.1:6443");
    }
}
