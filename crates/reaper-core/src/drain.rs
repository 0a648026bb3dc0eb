//! Bounded-wait pod draining
//!
//! Pods are deleted in one best-effort batch, then a background waiter polls
//! the node until none remain. The caller races that waiter against a
//! deadline; whichever finishes first decides the result.

use reaper_cluster_api::{ClusterClient, ClusterError, ClusterResult, PodInfo, PodScope};
use reaper_util::{NodeName, format_duration, jittered};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

/// Base delay between checks for remaining pods
pub const DEFAULT_DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Pods matching the predicate are ignored by the drain
pub type PodFilter = fn(&PodInfo) -> bool;

/// Drain failures
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("Failed to list {scope} pods on {node}: {source}")]
    List {
        node: NodeName,
        scope: PodScope,
        #[source]
        source: ClusterError,
    },

    #[error("Timed out after {timeout:?} with {pending} {scope} pod(s) still on {node}")]
    TimedOut {
        node: NodeName,
        scope: PodScope,
        timeout: Duration,
        pending: usize,
    },

    #[error("Drain waiter for {node} stopped unexpectedly")]
    WaiterLost { node: NodeName },
}

/// Summary of a completed drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Delete requests that succeeded
    pub deleted: usize,
    /// Delete requests that failed (the pods still had to go away)
    pub delete_failures: usize,
}

/// State owned by the background waiter for one drain call
struct DrainTask {
    node: NodeName,
    scope: PodScope,
    exclude: PodFilter,
    deadline: Instant,
}

/// Evicts pods from a node and waits, up to a timeout, for them to be gone
pub struct DrainCoordinator {
    cluster: Arc<dyn ClusterClient>,
    poll_interval: Duration,
}

impl DrainCoordinator {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            cluster,
            poll_interval: DEFAULT_DRAIN_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Delete every `scope` pod on `node` not matched by `exclude`, then wait
    /// until none are left or `timeout` elapses.
    ///
    /// A failed pod delete is logged and does not stop the batch. A timeout
    /// is returned to the caller, never retried here.
    pub async fn drain(
        &self,
        node: &NodeName,
        scope: PodScope,
        exclude: PodFilter,
        timeout: Duration,
    ) -> Result<DrainReport, DrainError> {
        let pods = list_pending(self.cluster.as_ref(), node, scope, exclude)
            .await
            .map_err(|source| DrainError::List {
                node: node.clone(),
                scope,
                source,
            })?;

        info!(node = %node, scope = %scope, count = pods.len(), "Draining pods");

        let mut report = DrainReport {
            deleted: 0,
            delete_failures: 0,
        };
        for pod in &pods {
            debug!(node = %node, namespace = %pod.namespace, pod = %pod.name, "Deleting pod");
            match self.cluster.delete_pod(&pod.namespace, &pod.name).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    report.delete_failures += 1;
                    error!(
                        node = %node,
                        namespace = %pod.namespace,
                        pod = %pod.name,
                        error = %e,
                        "Failed to delete pod"
                    );
                }
            }
        }

        let task = DrainTask {
            node: node.clone(),
            scope,
            exclude,
            deadline: Instant::now() + timeout,
        };
        let deadline = task.deadline;
        let (pending_tx, pending_rx) = watch::channel(pods.len());
        let (done_tx, done_rx) = oneshot::channel();

        let waiter = tokio::spawn(wait_until_drained(
            Arc::clone(&self.cluster),
            task,
            self.poll_interval,
            pending_tx,
            done_tx,
        ));

        tokio::select! {
            result = done_rx => match result {
                Ok(()) => {
                    info!(node = %node, scope = %scope, deleted = report.deleted, "Drain complete");
                    Ok(report)
                }
                Err(_) => Err(DrainError::WaiterLost { node: node.clone() }),
            },
            _ = sleep_until(deadline) => {
                waiter.abort();
                let pending = *pending_rx.borrow();
                warn!(
                    node = %node,
                    scope = %scope,
                    pending,
                    timeout = %format_duration(timeout),
                    "Drain timed out"
                );
                Err(DrainError::TimedOut {
                    node: node.clone(),
                    scope,
                    timeout,
                    pending,
                })
            }
        }
    }
}

async fn list_pending(
    cluster: &dyn ClusterClient,
    node: &NodeName,
    scope: PodScope,
    exclude: PodFilter,
) -> ClusterResult<Vec<PodInfo>> {
    let pods = cluster.list_pods_on_node(node, scope).await?;
    Ok(pods.into_iter().filter(|p| !exclude(p)).collect())
}

/// Poll until the node has no pending pods, then signal `done`.
///
/// Listing errors are logged and retried on the next tick; the caller's
/// deadline bounds the whole wait.
async fn wait_until_drained(
    cluster: Arc<dyn ClusterClient>,
    task: DrainTask,
    interval: Duration,
    pending: watch::Sender<usize>,
    done: oneshot::Sender<()>,
) {
    loop {
        match list_pending(cluster.as_ref(), &task.node, task.scope, task.exclude).await {
            Ok(pods) if pods.is_empty() => {
                let _ = pending.send(0);
                let _ = done.send(());
                return;
            }
            Ok(pods) => {
                let _ = pending.send(pods.len());
                debug!(
                    node = %task.node,
                    scope = %task.scope,
                    pending = pods.len(),
                    remaining = %format_duration(task.deadline.saturating_duration_since(Instant::now())),
                    "Waiting for pods to terminate"
                );
            }
            Err(e) => {
                warn!(node = %task.node, scope = %task.scope, error = %e, "Failed to list pending pods");
            }
        }

        sleep(jittered(interval)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_cluster_api::{ClusterCall, ClusterOp, MockCluster};

    const POLL: Duration = Duration::from_millis(10);

    fn coordinator(cluster: &Arc<MockCluster>) -> DrainCoordinator {
        let client: Arc<dyn ClusterClient> = cluster.clone();
        DrainCoordinator::new(client).with_poll_interval(POLL)
    }

    fn populated() -> Arc<MockCluster> {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_pod(
            PodInfo::new("default", "node-1")
                .on_node("n1")
                .owned_by("DaemonSet", "daemon-set"),
        );
        cluster.add_pod(
            PodInfo::new("default", "node-2")
                .on_node("n1")
                .owned_by("ReplicaSet", "replica-set"),
        );
        cluster.add_pod(PodInfo::new("default", "node-3").on_node("n1"));
        cluster.add_pod(PodInfo::new("default", "elsewhere").on_node("n2"));
        cluster
    }

    #[tokio::test]
    async fn drain_deletes_non_daemon_set_pods() {
        let cluster = populated();
        let report = coordinator(&cluster)
            .drain(
                &NodeName::new("n1"),
                PodScope::Workloads,
                PodInfo::is_daemon_set_pod,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.delete_failures, 0);

        let remaining: Vec<String> = cluster.pods().into_iter().map(|p| p.name).collect();
        assert_eq!(remaining, vec!["node-1".to_string(), "elsewhere".to_string()]);

        let deleted: Vec<ClusterCall> = cluster.calls();
        assert_eq!(deleted.len(), 2);
    }

    #[tokio::test]
    async fn empty_node_drains_immediately() {
        let cluster = Arc::new(MockCluster::new());
        let report = coordinator(&cluster)
            .drain(
                &NodeName::new("n1"),
                PodScope::ClusterDns,
                |_| false,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn stuck_pod_times_out() {
        let cluster = populated();
        cluster.mark_stuck("default", "node-3");

        let result = coordinator(&cluster)
            .drain(
                &NodeName::new("n1"),
                PodScope::Workloads,
                PodInfo::is_daemon_set_pod,
                Duration::from_millis(100),
            )
            .await;

        match result {
            Err(DrainError::TimedOut { pending, scope, .. }) => {
                assert_eq!(pending, 1);
                assert_eq!(scope, PodScope::Workloads);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_deletes_do_not_abort_the_batch() {
        let cluster = populated();
        cluster.set_failing(ClusterOp::DeletePod, true);

        let result = coordinator(&cluster)
            .drain(
                &NodeName::new("n1"),
                PodScope::Workloads,
                PodInfo::is_daemon_set_pod,
                Duration::from_millis(100),
            )
            .await;

        // Both pods were attempted and both are still there
        assert!(matches!(result, Err(DrainError::TimedOut { pending: 2, .. })));
        assert_eq!(cluster.pods().len(), 4);
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let cluster = populated();
        cluster.set_failing(ClusterOp::ListPods, true);

        let result = coordinator(&cluster)
            .drain(
                &NodeName::new("n1"),
                PodScope::Workloads,
                PodInfo::is_daemon_set_pod,
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(result, Err(DrainError::List { .. })));
    }
}
