//! In-memory cluster and cloud for testing

use async_trait::async_trait;
use reaper_util::NodeName;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::{
    ClusterClient, ClusterError, ClusterResult, CloudError, CloudProvider, CloudResult,
    InstanceRef, LabelSelector, NodeInfo, PodInfo, PodScope,
};

/// Cluster operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOp {
    ListNodes,
    GetNode,
    SetAnnotation,
    SetUnschedulable,
    ListPods,
    DeletePod,
    DeleteNode,
}

/// A mutating call observed by [`MockCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    SetAnnotation {
        node: NodeName,
        key: String,
        value: String,
    },
    SetUnschedulable {
        node: NodeName,
        unschedulable: bool,
    },
    DeletePod {
        namespace: String,
        name: String,
    },
    DeleteNode {
        node: NodeName,
    },
}

/// In-memory cluster.
///
/// Deleted pods vanish immediately unless marked stuck, in which case they
/// stay listed forever (a pod whose termination never finishes).
pub struct MockCluster {
    nodes: Arc<Mutex<BTreeMap<NodeName, NodeInfo>>>,
    pods: Arc<Mutex<Vec<PodInfo>>>,
    stuck_pods: Arc<Mutex<HashSet<(String, String)>>>,
    calls: Arc<Mutex<Vec<ClusterCall>>>,

    /// Operations configured to fail
    pub failing: Arc<Mutex<HashSet<ClusterOp>>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(Mutex::new(BTreeMap::new())),
            pods: Arc::new(Mutex::new(Vec::new())),
            stuck_pods: Arc::new(Mutex::new(HashSet::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn add_node(&self, node: NodeInfo) {
        self.nodes.lock().unwrap().insert(node.name.clone(), node);
    }

    pub fn add_pod(&self, pod: PodInfo) {
        self.pods.lock().unwrap().push(pod);
    }

    /// Keep a pod listed even after it is deleted
    pub fn mark_stuck(&self, namespace: &str, name: &str) {
        self.stuck_pods
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()));
    }

    /// Let a stuck pod finish terminating: it is unmarked and removed
    pub fn release_stuck(&self, namespace: &str, name: &str) {
        self.stuck_pods
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        self.pods
            .lock()
            .unwrap()
            .retain(|p| !(p.namespace == namespace && p.name == name));
    }

    pub fn set_failing(&self, op: ClusterOp, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(op);
        } else {
            set.remove(&op);
        }
    }

    pub fn node(&self, name: &str) -> Option<NodeInfo> {
        self.nodes.lock().unwrap().get(&NodeName::new(name)).cloned()
    }

    pub fn pods(&self) -> Vec<PodInfo> {
        self.pods.lock().unwrap().clone()
    }

    /// Mutating calls in the order they were made
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, op: ClusterOp) -> ClusterResult<()> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(ClusterError::Api {
                status: 500,
                message: format!("Mock {op:?} failure"),
            });
        }
        Ok(())
    }

    fn record(&self, call: ClusterCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn list_nodes(&self, selector: &LabelSelector) -> ClusterResult<Vec<NodeInfo>> {
        self.check(ClusterOp::ListNodes)?;
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| selector.matches(&n.labels))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &NodeName) -> ClusterResult<NodeInfo> {
        self.check(ClusterOp::GetNode)?;
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("node {name}")))
    }

    async fn set_node_annotation(
        &self,
        name: &NodeName,
        key: &str,
        value: &str,
    ) -> ClusterResult<()> {
        self.check(ClusterOp::SetAnnotation)?;
        {
            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes
                .get_mut(name)
                .ok_or_else(|| ClusterError::NotFound(format!("node {name}")))?;
            node.annotations.insert(key.to_string(), value.to_string());
        }
        self.record(ClusterCall::SetAnnotation {
            node: name.clone(),
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn set_unschedulable(&self, name: &NodeName, unschedulable: bool) -> ClusterResult<()> {
        self.check(ClusterOp::SetUnschedulable)?;
        {
            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes
                .get_mut(name)
                .ok_or_else(|| ClusterError::NotFound(format!("node {name}")))?;
            node.unschedulable = unschedulable;
        }
        self.record(ClusterCall::SetUnschedulable {
            node: name.clone(),
            unschedulable,
        });
        Ok(())
    }

    async fn list_pods_on_node(
        &self,
        name: &NodeName,
        scope: PodScope,
    ) -> ClusterResult<Vec<PodInfo>> {
        self.check(ClusterOp::ListPods)?;
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.node_name.as_ref() == Some(name) && scope.matches(p))
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.check(ClusterOp::DeletePod)?;
        let stuck = self
            .stuck_pods
            .lock()
            .unwrap()
            .contains(&(namespace.to_string(), name.to_string()));
        if !stuck {
            self.pods
                .lock()
                .unwrap()
                .retain(|p| !(p.namespace == namespace && p.name == name));
        }
        self.record(ClusterCall::DeletePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn delete_node(&self, name: &NodeName) -> ClusterResult<()> {
        self.check(ClusterOp::DeleteNode)?;
        self.nodes.lock().unwrap().remove(name);
        self.record(ClusterCall::DeleteNode { node: name.clone() });
        Ok(())
    }
}

/// In-memory cloud provider
pub struct MockCloud {
    deleted: Arc<Mutex<Vec<InstanceRef>>>,

    /// Configure instance deletion to fail
    pub fail_delete: Arc<Mutex<bool>>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self {
            deleted: Arc::new(Mutex::new(Vec::new())),
            fail_delete: Arc::new(Mutex::new(false)),
        }
    }

    /// Instances deleted so far
    pub fn deleted(&self) -> Vec<InstanceRef> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn set_fail_delete(&self, fail: bool) {
        *self.fail_delete.lock().unwrap() = fail;
    }
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudProvider for MockCloud {
    async fn delete_instance(&self, instance: &InstanceRef) -> CloudResult<()> {
        if *self.fail_delete.lock().unwrap() {
            return Err(CloudError::Api {
                status: 503,
                message: "Mock delete failure".into(),
            });
        }
        self.deleted.lock().unwrap().push(instance.clone());
        Ok(())
    }
}
