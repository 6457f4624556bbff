//! Diagnostics collected through `kubectl`
//!
//! Get, Describe, Events, PodLogs and Proxy translate into a kubectl
//! invocation run through the command machinery, so they see the same
//! `NAMESPACE` and `KUBECONFIG` environment as user commands. An empty
//! namespace falls back to `$NAMESPACE`, `*` means all namespaces.

use async_trait::async_trait;

use super::command::Invocation;
use super::internal::render;
use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::common::{Error, Result};
use crate::model::{
    DescribeOperation, EventsOperation, GetOperation, OperationKind, Output, PodLogsOperation,
    ProxyOperation,
};
use crate::resource::split_api_version;

/// What to collect
#[derive(Debug, Clone)]
pub enum Request {
    Get(GetOperation),
    Describe(DescribeOperation),
    Events(EventsOperation),
    PodLogs(PodLogsOperation),
    Proxy(ProxyOperation),
}

/// Resource argument for kubectl and whether the kind is cluster scoped
async fn map_resource(ctx: &OperationContext, api_version: &str, kind: &str) -> Result<(String, bool)> {
    if api_version.is_empty() || kind.is_empty() {
        return Err(Error::Validation(
            "failed to map resource, apiVersion and kind must be specified".to_string(),
        ));
    }
    let plural = ctx.client.resource_name(api_version, kind).await?;
    let clustered = !ctx.client.is_namespaced(api_version, kind).await?;
    let resource = match split_api_version(api_version) {
        ("", _) => plural,
        (group, version) => format!("{plural}.{version}.{group}"),
    };
    Ok((resource, clustered))
}

fn exclusive(name: &str, selector: &str) -> Result<()> {
    if !name.is_empty() && !selector.is_empty() {
        return Err(Error::Validation(
            "name cannot be provided when a selector is specified".to_string(),
        ));
    }
    Ok(())
}

fn target_args(args: &mut Vec<String>, name: &str, selector: &str) {
    if !name.is_empty() {
        args.push(name.to_string());
    } else if !selector.is_empty() {
        args.extend(["-l".to_string(), selector.to_string()]);
    }
}

fn namespace_args(args: &mut Vec<String>, namespace: &str, clustered: bool) {
    if clustered {
        return;
    }
    match namespace {
        "*" => args.push("--all-namespaces".to_string()),
        "" => args.extend(["-n".to_string(), "$NAMESPACE".to_string()]),
        ns => args.extend(["-n".to_string(), ns.to_string()]),
    }
}

impl Request {
    fn kind(&self) -> OperationKind {
        match self {
            Request::Get(_) => OperationKind::Get,
            Request::Describe(_) => OperationKind::Describe,
            Request::Events(_) => OperationKind::Events,
            Request::PodLogs(_) => OperationKind::PodLogs,
            Request::Proxy(_) => OperationKind::Proxy,
        }
    }

    fn outputs(&self) -> Vec<Output> {
        match self {
            Request::Proxy(op) => op.outputs.clone(),
            _ => vec![],
        }
    }

    /// kubectl arguments for this request
    pub async fn args(&self, ctx: &OperationContext) -> Result<Vec<String>> {
        match self {
            Request::Get(op) => {
                let name = render(ctx, op.query.name.as_deref())?;
                let selector = render(ctx, op.query.selector.as_deref())?;
                exclusive(&name, &selector)?;
                let api_version = render(ctx, Some(&op.query.api_version))?;
                let kind = render(ctx, Some(&op.query.kind))?;
                let (resource, clustered) = map_resource(ctx, &api_version, &kind).await?;
                let mut args = vec!["get".to_string(), resource];
                target_args(&mut args, &name, &selector);
                namespace_args(&mut args, &render(ctx, op.query.namespace.as_deref())?, clustered);
                let format = render(ctx, op.format.as_deref())?;
                if !format.is_empty() {
                    args.extend(["-o".to_string(), format]);
                }
                Ok(args)
            }
            Request::Describe(op) => {
                let name = render(ctx, op.query.name.as_deref())?;
                let selector = render(ctx, op.query.selector.as_deref())?;
                exclusive(&name, &selector)?;
                let api_version = render(ctx, Some(&op.query.api_version))?;
                let kind = render(ctx, Some(&op.query.kind))?;
                let (resource, clustered) = map_resource(ctx, &api_version, &kind).await?;
                let mut args = vec!["describe".to_string(), resource];
                target_args(&mut args, &name, &selector);
                namespace_args(&mut args, &render(ctx, op.query.namespace.as_deref())?, clustered);
                if let Some(show) = op.show_events {
                    args.push(format!("--show-events={show}"));
                }
                Ok(args)
            }
            Request::Events(op) => {
                let name = render(ctx, op.name.as_deref())?;
                let selector = render(ctx, op.selector.as_deref())?;
                exclusive(&name, &selector)?;
                let mut args = vec!["get".to_string(), "events".to_string()];
                target_args(&mut args, &name, &selector);
                namespace_args(&mut args, &render(ctx, op.namespace.as_deref())?, false);
                let format = render(ctx, op.format.as_deref())?;
                if !format.is_empty() {
                    args.extend(["-o".to_string(), format]);
                }
                Ok(args)
            }
            Request::PodLogs(op) => {
                let name = render(ctx, op.name.as_deref())?;
                let selector = render(ctx, op.selector.as_deref())?;
                if name.is_empty() && selector.is_empty() {
                    return Err(Error::Validation(
                        "a name or selector must be specified".to_string(),
                    ));
                }
                exclusive(&name, &selector)?;
                let mut args = vec!["logs".to_string(), "--prefix".to_string()];
                target_args(&mut args, &name, &selector);
                namespace_args(&mut args, &render(ctx, op.namespace.as_deref())?, false);
                match render(ctx, op.container.as_deref())?.as_str() {
                    "" => args.push("--all-containers".to_string()),
                    container => args.extend(["-c".to_string(), container.to_string()]),
                }
                if let Some(tail) = op.tail {
                    args.extend(["--tail".to_string(), tail.to_string()]);
                }
                Ok(args)
            }
            Request::Proxy(op) => {
                let name = render(ctx, Some(&op.name))?;
                let port = render(ctx, op.port.as_deref())?;
                let path = render(ctx, op.path.as_deref())?;
                let namespace = match render(ctx, op.namespace.as_deref())? {
                    ns if ns.is_empty() => ctx
                        .namespacer
                        .as_ref()
                        .map(|n| n.namespace().to_string())
                        .unwrap_or_else(|| "default".to_string()),
                    ns => ns,
                };
                let (resource, _) = map_resource(ctx, &op.api_version, &op.kind).await?;
                let target = if port.is_empty() { name } else { format!("{name}:{port}") };
                let url = format!(
                    "/api/v1/namespaces/{namespace}/{resource}/{target}/proxy/{}",
                    path.trim_start_matches('/')
                );
                Ok(vec![
                    "get".to_string(),
                    "--raw".to_string(),
                    url.trim_end_matches('/').to_string(),
                ])
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Request::Get(op) => format!("{}/{}", op.query.api_version, op.query.kind),
            Request::Describe(op) => format!("{}/{}", op.query.api_version, op.query.kind),
            Request::Events(op) => op.namespace.clone().unwrap_or_else(|| "events".to_string()),
            Request::PodLogs(op) => op
                .name
                .clone()
                .or_else(|| op.selector.clone())
                .unwrap_or_default(),
            Request::Proxy(op) => format!("{}/{}", op.kind, op.name),
        }
    }
}

/// Reconciler running a kubectl request once
pub struct Kubectl {
    request: Request,
}

impl Kubectl {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

#[async_trait]
impl Reconciler for Kubectl {
    fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    fn target(&self) -> String {
        self.request.describe()
    }

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs> {
        let args = self.request.args(ctx).await?;
        let program = which::which("kubectl")
            .map_err(|e| Error::CommandFailed(format!("kubectl not found: {e}")))?;
        Invocation {
            program: program.display().to_string(),
            args,
            outputs: self.request.outputs(),
            ..Default::default()
        }
        .run(ctx)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::model::ResourceQuery;
    use crate::operations::internal::testing::context;
    use std::sync::Arc;

    fn query(api_version: &str, kind: &str) -> ResourceQuery {
        ResourceQuery {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_args() {
        let ctx = context(Arc::new(MemoryClient::new()));
        let mut q = query("apps/v1", "Deployment");
        q.selector = Some("app=web".into());
        let request = Request::Get(GetOperation {
            query: q,
            format: Some("yaml".into()),
            ..Default::default()
        });
        assert_eq!(
            request.args(&ctx).await.unwrap(),
            ["get", "deployments.v1.apps", "-l", "app=web", "-n", "$NAMESPACE", "-o", "yaml"]
        );
    }

    #[tokio::test]
    async fn test_get_cluster_scoped_and_all_namespaces() {
        let ctx = context(Arc::new(MemoryClient::new()));
        let request = Request::Get(GetOperation {
            query: query("v1", "Namespace"),
            ..Default::default()
        });
        assert_eq!(request.args(&ctx).await.unwrap(), ["get", "namespaces"]);

        let mut q = query("v1", "Pod");
        q.namespace = Some("*".into());
        let request = Request::Get(GetOperation {
            query: q,
            ..Default::default()
        });
        assert_eq!(request.args(&ctx).await.unwrap(), ["get", "pods", "--all-namespaces"]);
    }

    #[tokio::test]
    async fn test_name_and_selector_are_exclusive() {
        let ctx = context(Arc::new(MemoryClient::new()));
        let mut q = query("v1", "Pod");
        q.name = Some("web".into());
        q.selector = Some("app=web".into());
        let err = Request::Describe(DescribeOperation {
            query: q,
            ..Default::default()
        })
        .args(&ctx)
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid test document: name cannot be provided when a selector is specified"
        );
    }

    #[tokio::test]
    async fn test_pod_logs_args() {
        let ctx = context(Arc::new(MemoryClient::new()));
        let request = Request::PodLogs(PodLogsOperation {
            name: Some("web-0".into()),
            namespace: Some("($namespace)".into()),
            tail: Some(10),
            ..Default::default()
        });
        assert_eq!(
            request.args(&ctx).await.unwrap(),
            ["logs", "--prefix", "web-0", "-n", "test-ns", "--all-containers", "--tail", "10"]
        );
        let err = Request::PodLogs(PodLogsOperation::default())
            .args(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_proxy_args() {
        let ctx = context(Arc::new(MemoryClient::new()));
        let request = Request::Proxy(ProxyOperation {
            api_version: "v1".into(),
            kind: "Service".into(),
            name: "web".into(),
            port: Some("80".into()),
            path: Some("/healthz".into()),
            ..Default::default()
        });
        assert_eq!(
            request.args(&ctx).await.unwrap(),
            ["get", "--raw", "/api/v1/namespaces/test-ns/services/web:80/proxy/healthz"]
        );
    }
}
