//! Kubernetes object JSON, reduced to the fields the reaper reads

use chrono::{DateTime, Utc};
use reaper_cluster_api::{ClusterError, ClusterResult, NodeInfo, OwnerReference, PodInfo};
use reaper_util::NodeName;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub(crate) struct ObjectList<T> {
    items: Option<Vec<T>>,
}

impl<T> ObjectList<T> {
    pub fn into_items(self) -> Vec<T> {
        self.items.unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub owner_references: Option<Vec<RawOwnerReference>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawOwnerReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NodeSpec {
    #[serde(default, rename = "providerID")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub unschedulable: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PodSpec {
    #[serde(default)]
    pub node_name: Option<String>,
}

/// Error body returned by the API server
#[derive(Debug, Deserialize)]
pub(crate) struct Status {
    #[serde(default)]
    pub message: Option<String>,
}

impl TryFrom<Node> for NodeInfo {
    type Error = ClusterError;

    fn try_from(node: Node) -> ClusterResult<Self> {
        let meta = node.metadata;
        let creation_timestamp = meta.creation_timestamp.ok_or_else(|| {
            ClusterError::Decode(format!("node {} has no creationTimestamp", meta.name))
        })?;

        Ok(NodeInfo {
            name: NodeName::new(meta.name),
            creation_timestamp,
            labels: meta.labels.unwrap_or_default(),
            annotations: meta.annotations.unwrap_or_default(),
            provider_id: node.spec.provider_id.filter(|id| !id.is_empty()),
            unschedulable: node.spec.unschedulable.unwrap_or(false),
        })
    }
}

impl From<Pod> for PodInfo {
    fn from(pod: Pod) -> Self {
        let meta = pod.metadata;
        PodInfo {
            name: meta.name,
            namespace: meta.namespace.unwrap_or_else(|| "default".to_string()),
            node_name: pod.spec.node_name.map(NodeName::new),
            labels: meta.labels.unwrap_or_default(),
            owner_references: meta
                .owner_references
                .unwrap_or_default()
                .into_iter()
                .map(|o| OwnerReference {
                    kind: o.kind,
                    name: o.name,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decode_node() {
        let json = r#"{
            "kind": "Node",
            "metadata": {
                "name": "gke-pool-1-abcd",
                "creationTimestamp": "2017-11-11T12:00:00Z",
                "labels": {"cloud.google.com/gke-preemptible": "true"},
                "annotations": {"estafette.io/gke-preemptible-killer-state": "2017-11-12T06:00:00Z"}
            },
            "spec": {
                "providerID": "gce://my-project/europe-west1-b/gke-pool-1-abcd",
                "unschedulable": true
            },
            "status": {"conditions": []}
        }"#;

        let node: Node = serde_json::from_str(json).unwrap();
        let info = NodeInfo::try_from(node).unwrap();

        assert_eq!(info.name.as_str(), "gke-pool-1-abcd");
        assert_eq!(
            info.creation_timestamp,
            Utc.with_ymd_and_hms(2017, 11, 11, 12, 0, 0).unwrap()
        );
        assert!(info.unschedulable);
        assert_eq!(info.instance().unwrap().zone, "europe-west1-b");
        assert_eq!(
            info.annotation("estafette.io/gke-preemptible-killer-state"),
            Some("2017-11-12T06:00:00Z")
        );
    }

    #[test]
    fn decode_minimal_node() {
        let json = r#"{"metadata": {"name": "n", "creationTimestamp": "2017-11-11T12:00:00Z"}}"#;
        let info = NodeInfo::try_from(serde_json::from_str::<Node>(json).unwrap()).unwrap();
        assert!(info.labels.is_empty());
        assert!(info.provider_id.is_none());
        assert!(!info.unschedulable);
    }

    #[test]
    fn node_without_creation_time_is_rejected() {
        let json = r#"{"metadata": {"name": "n"}}"#;
        let result = NodeInfo::try_from(serde_json::from_str::<Node>(json).unwrap());
        assert!(matches!(result, Err(ClusterError::Decode(_))));
    }

    #[test]
    fn decode_pod_list() {
        let json = r#"{
            "kind": "PodList",
            "items": [
                {
                    "metadata": {
                        "name": "fluentd-abc",
                        "namespace": "default",
                        "ownerReferences": [{"apiVersion": "apps/v1", "kind": "DaemonSet", "name": "fluentd", "uid": "x"}]
                    },
                    "spec": {"nodeName": "n1"}
                },
                {
                    "metadata": {"name": "web-1", "namespace": "shop", "labels": null},
                    "spec": {"nodeName": "n1"}
                }
            ]
        }"#;

        let list: ObjectList<Pod> = serde_json::from_str(json).unwrap();
        let pods: Vec<PodInfo> = list.into_items().into_iter().map(PodInfo::from).collect();

        assert_eq!(pods.len(), 2);
        assert!(pods[0].is_daemon_set_pod());
        assert!(!pods[1].is_daemon_set_pod());
        assert_eq!(pods[1].namespace, "shop");
        assert_eq!(pods[1].node_name.as_ref().unwrap().as_str(), "n1");
    }

    #[test]
    fn decode_node_list() {
        let json = r#"{
            "kind": "NodeList",
            "metadata": {"resourceVersion": "1"},
            "items": [
                {"metadata": {"name": "a", "creationTimestamp": "2017-11-11T12:00:00Z"}},
                {"metadata": {"name": "b", "creationTimestamp": "2017-11-11T13:00:00Z"}}
            ]
        }"#;

        let list: ObjectList<Node> = serde_json::from_str(json).unwrap();
        let nodes: Vec<NodeInfo> = list
            .into_items()
            .into_iter()
            .map(NodeInfo::try_from)
            .collect::<ClusterResult<_>>()
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].name.as_str(), "b");
    }

    #[test]
    fn empty_list_without_items() {
        let list: ObjectList<Node> =
            serde_json::from_str(r#"{"kind": "NodeList", "items": null}"#).unwrap();
        assert!(list.into_items().is_empty());

        let list: ObjectList<Node> = serde_json::from_str(r#"{"kind": "NodeList"}"#).unwrap();
        assert!(list.into_items().is_empty());
    }
}
