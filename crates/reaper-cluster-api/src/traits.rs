//! Collaborator traits

use async_trait::async_trait;
use reaper_util::NodeName;
use thiserror::Error;

use crate::{InstanceRef, LabelSelector, NodeInfo, PodInfo, PodScope};

/// Errors from cluster API operations
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors from cloud provider operations
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Cluster API operations used by the reaper.
///
/// Every mutating call must be safe to repeat: cordoning a cordoned node,
/// deleting a pod or node that is already gone, and re-writing an annotation
/// all succeed.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List nodes carrying every label in `selector`
    async fn list_nodes(&self, selector: &LabelSelector) -> ClusterResult<Vec<NodeInfo>>;

    /// Fetch a single node
    async fn get_node(&self, name: &NodeName) -> ClusterResult<NodeInfo>;

    /// Set (or overwrite) an annotation on a node
    async fn set_node_annotation(&self, name: &NodeName, key: &str, value: &str)
    -> ClusterResult<()>;

    /// Mark a node (un)schedulable
    async fn set_unschedulable(&self, name: &NodeName, unschedulable: bool) -> ClusterResult<()>;

    /// List pods scheduled on a node within `scope`
    async fn list_pods_on_node(&self, name: &NodeName, scope: PodScope)
    -> ClusterResult<Vec<PodInfo>>;

    /// Delete a pod; a missing pod counts as deleted
    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Delete a node object; a missing node counts as deleted
    async fn delete_node(&self, name: &NodeName) -> ClusterResult<()>;
}

/// Cloud provider operations used by the reaper
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Delete the instance backing a node; a missing instance counts as deleted
    async fn delete_instance(&self, instance: &InstanceRef) -> CloudResult<()>;
}
