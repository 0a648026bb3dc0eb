//! Kubernetes REST client

use async_trait::async_trait;
use reaper_cluster_api::{
    ClusterClient, ClusterError, ClusterResult, LabelSelector, NodeInfo, PodInfo, PodScope,
    SYSTEM_NAMESPACE,
};
use reaper_util::NodeName;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Certificate, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::objects::{Node, ObjectList, Pod, Status};

/// Where a pod's service account credentials are mounted
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Default timeout for a single API request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MERGE_PATCH: &str = "application/merge-patch+json";

/// How requests are authorized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerToken {
    /// No Authorization header (e.g. behind `kubectl proxy`)
    None,
    Static(String),
    /// Re-read on every request so rotated tokens are picked up
    File(PathBuf),
}

/// Connection settings for [`KubeClient`]
#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub base_url: String,
    pub token: BearerToken,
    /// Extra PEM root certificate for the API server
    pub ca_cert: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl KubeConfig {
    /// Settings for a pod running inside the cluster
    pub fn in_cluster() -> ClusterResult<Self> {
        let host = env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ClusterError::Internal(
                "KUBERNETES_SERVICE_HOST is not set; use --kube-api-url outside a cluster".into(),
            )
        })?;
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let dir = Path::new(SERVICE_ACCOUNT_DIR);

        Ok(Self {
            base_url: in_cluster_url(&host, &port),
            token: BearerToken::File(dir.join("token")),
            ca_cert: Some(dir.join("ca.crt")),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Settings for a plain API URL without credentials
    pub fn from_url(url: &str) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            token: BearerToken::None,
            ca_cert: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

fn in_cluster_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{host}]:{port}")
    } else {
        format!("https://{host}:{port}")
    }
}

/// [`ClusterClient`] over the Kubernetes REST API
pub struct KubeClient {
    http: Client,
    base_url: String,
    token: BearerToken,
}

impl KubeClient {
    pub fn new(config: KubeConfig) -> ClusterResult<Self> {
        let mut builder = Client::builder().timeout(config.request_timeout);

        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                ClusterError::Internal(format!("Failed to read CA {}: {e}", path.display()))
            })?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| ClusterError::Internal(format!("Invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder
            .build()
            .map_err(|e| ClusterError::Transport(format!("Failed to create HTTP client: {e}")))?;

        info!(url = %config.base_url, "Kubernetes client initialized");

        Ok(Self {
            http,
            base_url: config.base_url,
            token: config.token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, path: &str) -> ClusterResult<RequestBuilder> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Kubernetes API request");

        let builder = self.http.request(method, url);
        let token = match &self.token {
            BearerToken::None => return Ok(builder),
            BearerToken::Static(token) => token.clone(),
            BearerToken::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| {
                    ClusterError::Internal(format!("Failed to read token {}: {e}", path.display()))
                })?
                .trim()
                .to_string(),
        };
        Ok(builder.header(AUTHORIZATION, format!("Bearer {token}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ClusterResult<T> {
        let response = send(self.request(Method::GET, path).await?.query(query)).await?;
        response
            .json()
            .await
            .map_err(|e| ClusterError::Decode(format!("{path}: {e}")))
    }

    async fn merge_patch(&self, path: &str, patch: serde_json::Value) -> ClusterResult<()> {
        let request = self
            .request(Method::PATCH, path)
            .await?
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(patch.to_string());
        send(request).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> ClusterResult<()> {
        match send(self.request(Method::DELETE, path).await?).await {
            Ok(_) => Ok(()),
            Err(ClusterError::NotFound(_)) => {
                debug!(path, "Already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

async fn send(request: RequestBuilder) -> ClusterResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ClusterError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Map a failed response to an error, preferring the server's own message
fn status_error(status: StatusCode, body: &str) -> ClusterError {
    let message = serde_json::from_str::<Status>(body)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::NOT_FOUND => ClusterError::NotFound(message),
        StatusCode::CONFLICT => ClusterError::Conflict(message),
        _ => ClusterError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn node_path(name: &NodeName) -> String {
    format!("/api/v1/nodes/{name}")
}

/// Path and query listing the pods of `scope` on `node`
fn pods_request(node: &NodeName, scope: PodScope) -> (String, Vec<(&'static str, String)>) {
    match scope {
        PodScope::Workloads => (
            "/api/v1/pods".to_string(),
            vec![(
                "fieldSelector",
                format!("spec.nodeName={node},metadata.namespace!={SYSTEM_NAMESPACE}"),
            )],
        ),
        PodScope::ClusterDns => (
            format!("/api/v1/namespaces/{SYSTEM_NAMESPACE}/pods"),
            vec![
                (
                    "labelSelector",
                    format!("{}={}", PodScope::DNS_LABEL_KEY, PodScope::DNS_LABEL_VALUE),
                ),
                ("fieldSelector", format!("spec.nodeName={node}")),
            ],
        ),
    }
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn list_nodes(&self, selector: &LabelSelector) -> ClusterResult<Vec<NodeInfo>> {
        let list: ObjectList<Node> = self
            .get_json("/api/v1/nodes", &[("labelSelector", selector.to_query())])
            .await?;
        list.into_items().into_iter().map(NodeInfo::try_from).collect()
    }

    async fn get_node(&self, name: &NodeName) -> ClusterResult<NodeInfo> {
        let node: Node = self.get_json(&node_path(name), &[]).await?;
        NodeInfo::try_from(node)
    }

    async fn set_node_annotation(
        &self,
        name: &NodeName,
        key: &str,
        value: &str,
    ) -> ClusterResult<()> {
        let mut annotations = serde_json::Map::new();
        annotations.insert(key.to_string(), json!(value));
        self.merge_patch(
            &node_path(name),
            json!({ "metadata": { "annotations": annotations } }),
        )
        .await
    }

    async fn set_unschedulable(&self, name: &NodeName, unschedulable: bool) -> ClusterResult<()> {
        self.merge_patch(
            &node_path(name),
            json!({ "spec": { "unschedulable": unschedulable } }),
        )
        .await
    }

    async fn list_pods_on_node(
        &self,
        name: &NodeName,
        scope: PodScope,
    ) -> ClusterResult<Vec<PodInfo>> {
        let (path, query) = pods_request(name, scope);
        let list: ObjectList<Pod> = self.get_json(&path, &query).await?;
        Ok(list
            .into_items()
            .into_iter()
            .map(PodInfo::from)
            .filter(|p| p.node_name.as_ref() == Some(name) && scope.matches(p))
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.delete(&format!("/api/v1/namespaces/{namespace}/pods/{name}"))
            .await
    }

    async fn delete_node(&self, name: &NodeName) -> ClusterResult<()> {
        self.delete(&node_path(name)).await
    }
}
