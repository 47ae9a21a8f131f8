//! Cluster API access.
//!
//! `ClusterClientTrait` is the narrow view of the Kubernetes API the scaling
//! engine needs: list nodes, list the pods bound to a node, update and delete
//! nodes. `KubeClusterClient` implements it with `kube`; tests use the
//! in-memory mock from `test_utils`.

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use thiserror::Error;
use tracing::debug;

/// Errors returned by cluster API calls
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Any other API failure
    #[error("Cluster API error: {0}")]
    Api(String),
}

/// Trait for the cluster operations used by the scaler
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// List nodes matching a label selector
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ClusterError>;

    /// List pods in all namespaces scheduled to the given node
    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, ClusterError>;

    /// Persist a modified node record
    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError>;

    /// Delete a node record
    async fn delete_node(&self, node_name: &str) -> Result<(), ClusterError>;
}

/// `ClusterClientTrait` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    nodes: Api<Node>,
    pods: Api<Pod>,
}

impl KubeClusterClient {
    /// Creates a cluster client from a kube client
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            pods: Api::all(client),
        }
    }

    /// Pod API across all namespaces, used by the game watcher
    pub fn pod_api(&self) -> Api<Pod> {
        self.pods.clone()
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        let nodes = self.nodes.list(&params).await?;
        debug!("Listed {} nodes for selector {}", nodes.items.len(), label_selector);
        Ok(nodes.items)
    }

    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, ClusterError> {
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let pods = self.pods.list(&params).await?;
        Ok(pods.items)
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError> {
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::Api("node has no name".to_string()))?;
        Ok(self.nodes.replace(name, &PostParams::default(), node).await?)
    }

    async fn delete_node(&self, node_name: &str) -> Result<(), ClusterError> {
        self.nodes.delete(node_name, &DeleteParams::default()).await?;
        Ok(())
    }
}
