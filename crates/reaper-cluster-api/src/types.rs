//! Node, pod and instance descriptions exchanged with collaborators

use chrono::{DateTime, Utc};
use reaper_util::NodeName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label carried by every preemptible GKE node
pub const PREEMPTIBLE_LABEL: &str = "cloud.google.com/gke-preemptible";

/// Namespace holding cluster system pods
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Owner kind whose pods ignore the unschedulable flag
pub const DAEMON_SET_KIND: &str = "DaemonSet";

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Selector for preemptible nodes only
    pub fn preemptible() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(PREEMPTIBLE_LABEL.to_string(), "true".to_string());
        Self(labels)
    }

    /// Preemptible selector extended with caller-supplied filters.
    ///
    /// A filter cannot drop the preemptible requirement.
    pub fn with_filters(filters: &BTreeMap<String, String>) -> Self {
        let mut selector = Self(filters.clone());
        selector
            .0
            .insert(PREEMPTIBLE_LABEL.to_string(), "true".to_string());
        selector
    }

    /// Whether `labels` carries every required key/value pair
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    /// Selector in the `key=value,key=value` query form
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// The parts of a node object the reaper reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: NodeName,
    pub creation_timestamp: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub provider_id: Option<String>,
    pub unschedulable: bool,
}

impl NodeInfo {
    pub fn new(name: impl Into<NodeName>, creation_timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            creation_timestamp,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            provider_id: None,
            unschedulable: false,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Cloud instance backing this node, if the provider id is understood
    pub fn instance(&self) -> Option<InstanceRef> {
        self.provider_id
            .as_deref()
            .and_then(InstanceRef::from_provider_id)
    }
}

/// Owner of a pod (controller reference)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

/// The parts of a pod object the reaper reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: Option<NodeName>,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
}

impl PodInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            node_name: None,
            labels: BTreeMap::new(),
            owner_references: Vec::new(),
        }
    }

    pub fn on_node(mut self, node: impl Into<NodeName>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn owned_by(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.owner_references.push(OwnerReference {
            kind: kind.into(),
            name: name.into(),
        });
        self
    }

    pub fn is_owned_by_kind(&self, kind: &str) -> bool {
        self.owner_references.iter().any(|o| o.kind == kind)
    }

    /// DaemonSet pods ignore cordoning, so they never block a drain
    pub fn is_daemon_set_pod(&self) -> bool {
        self.is_owned_by_kind(DAEMON_SET_KIND)
    }
}

/// Which pods on a node a listing covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodScope {
    /// Every pod outside the system namespace
    Workloads,
    /// Cluster DNS pods (`k8s-app=kube-dns`) in the system namespace
    ClusterDns,
}

impl PodScope {
    pub const DNS_LABEL_KEY: &'static str = "k8s-app";
    pub const DNS_LABEL_VALUE: &'static str = "kube-dns";

    /// Whether `pod` falls in this scope (node placement is checked separately)
    pub fn matches(&self, pod: &PodInfo) -> bool {
        match self {
            Self::Workloads => pod.namespace != SYSTEM_NAMESPACE,
            Self::ClusterDns => {
                pod.namespace == SYSTEM_NAMESPACE
                    && pod.labels.get(Self::DNS_LABEL_KEY).map(String::as_str)
                        == Some(Self::DNS_LABEL_VALUE)
            }
        }
    }
}

impl fmt::Display for PodScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workloads => write!(f, "workloads"),
            Self::ClusterDns => write!(f, "kube-dns"),
        }
    }
}

/// A compute instance: `gce://<project>/<zone>/<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl InstanceRef {
    /// Parse a node provider id such as `gce://my-project/europe-west1-b/gke-pool-1-abcd`
    pub fn from_provider_id(provider_id: &str) -> Option<Self> {
        let path = provider_id.strip_prefix("gce://")?;
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [project, zone, name]
                if !project.is_empty() && !zone.is_empty() && !name.is_empty() =>
            {
                Some(Self {
                    project: project.to_string(),
                    zone: zone.to_string(),
                    name: name.to_string(),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.name)
    }
}
