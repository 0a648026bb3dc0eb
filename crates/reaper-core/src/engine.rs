//! Poll engine

use reaper_cluster_api::{ClusterClient, ClusterError, LabelSelector};
use reaper_util::{format_duration, jittered};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::{NodeLifecycle, NodeOutcome, NodeTotals};

/// Summary of one pass over the node list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub processed: usize,
    pub killed: usize,
    pub failed: usize,
    /// Shutdown was requested before every node was visited
    pub interrupted: bool,
}

/// Periodically lists preemptible nodes and runs each through its lifecycle
pub struct Reaper {
    cluster: Arc<dyn ClusterClient>,
    lifecycle: NodeLifecycle,
    selector: LabelSelector,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        lifecycle: NodeLifecycle,
        selector: LabelSelector,
        interval: Duration,
    ) -> Self {
        info!(
            selector = %selector,
            interval = %format_duration(interval),
            "Reaper initialized"
        );
        Self {
            cluster,
            lifecycle,
            selector,
            interval,
        }
    }

    pub fn totals(&self) -> &Arc<NodeTotals> {
        self.lifecycle.totals()
    }

    /// List matching nodes and process them one after another.
    ///
    /// The shutdown flag is checked before each node, so a node that has
    /// started terminating always finishes its current step.
    pub async fn run_cycle(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport, ClusterError> {
        info!("Listing preemptible nodes");
        let nodes = self.cluster.list_nodes(&self.selector).await?;
        info!(count = nodes.len(), "Cluster has preemptible nodes");

        let mut report = CycleReport {
            listed: nodes.len(),
            ..CycleReport::default()
        };

        for node in &nodes {
            if *shutdown.borrow() {
                info!(
                    remaining = nodes.len() - report.processed,
                    "Shutdown requested, stopping cycle"
                );
                report.interrupted = true;
                break;
            }

            let now = reaper_util::now();
            match self.lifecycle.process_node(node, &now).await {
                Ok(NodeOutcome::Killed) => report.killed += 1,
                Ok(NodeOutcome::Kept { .. }) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(node = %e.node(), error = %e, "Error while processing node");
                }
            }
            report.processed += 1;
        }

        Ok(report)
    }

    /// Run cycles until the shutdown flag is raised (or its sender dropped)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle(&shutdown).await {
                Ok(report) => {
                    let totals = self.totals().snapshot();
                    info!(
                        processed = report.processed,
                        killed = report.killed,
                        failed = report.failed,
                        total_annotated = totals.annotated,
                        total_skipped = totals.skipped,
                        total_killed = totals.killed,
                        total_failed = totals.failed,
                        "Cycle complete"
                    );
                    if report.interrupted {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Error while getting the list of preemptible nodes");
                }
            }

            let pause = jittered(self.interval);
            info!(sleep = %format_duration(pause), "Sleeping until next cycle");

            tokio::select! {
                _ = sleep(pause) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    debug!("Shutdown requested during sleep");
                    break;
                }
            }
        }

        info!("Reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use reaper_cluster_api::{
        ClusterOp, CloudProvider, MockCloud, MockCluster, NodeInfo, PREEMPTIBLE_LABEL, PodInfo,
    };
    use reaper_config::WindowPolicy;

    use crate::EXPIRY_ANNOTATION;

    fn reaper(cluster: &Arc<MockCluster>, cloud: &Arc<MockCloud>, interval: Duration) -> Reaper {
        let cluster_client: Arc<dyn ClusterClient> = cluster.clone();
        let cloud_client: Arc<dyn CloudProvider> = cloud.clone();
        let policy = Arc::new(WindowPolicy::configure("", "").unwrap());
        let lifecycle = NodeLifecycle::new(
            Arc::clone(&cluster_client),
            cloud_client,
            policy,
            Duration::from_secs(5),
        )
        .with_seed(7)
        .with_drain_poll_interval(Duration::from_millis(10));
        Reaper::new(
            cluster_client,
            lifecycle,
            LabelSelector::preemptible(),
            interval,
        )
    }

    fn preemptible(name: &str) -> NodeInfo {
        NodeInfo::new(name, Utc::now())
            .with_label(PREEMPTIBLE_LABEL, "true")
            .with_provider_id(format!("gce://p/z/{name}"))
    }

    fn expired(name: &str) -> NodeInfo {
        preemptible(name).with_annotation(EXPIRY_ANNOTATION, "2017-11-12T06:00:00Z")
    }

    #[tokio::test]
    async fn cycle_processes_every_matching_node() {
        let cluster = Arc::new(MockCluster::new());
        let cloud = Arc::new(MockCloud::new());
        cluster.add_node(preemptible("fresh"));
        cluster.add_node(expired("old"));
        cluster.add_node(NodeInfo::new(
            "regular",
            Utc.with_ymd_and_hms(2017, 11, 11, 12, 0, 0).unwrap(),
        ));
        cluster.add_pod(PodInfo::new("default", "web").on_node("old"));

        let reaper = reaper(&cluster, &cloud, Duration::from_secs(600));
        let (_tx, rx) = watch::channel(false);
        let report = reaper.run_cycle(&rx).await.unwrap();

        assert_eq!(report.listed, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.killed, 1);
        assert_eq!(report.failed, 0);
        assert!(!report.interrupted);

        assert!(cluster.node("old").is_none());
        assert!(cluster.node("fresh").unwrap().annotation(EXPIRY_ANNOTATION).is_some());
        assert!(cluster.node("regular").unwrap().annotations.is_empty());

        let totals = reaper.totals().snapshot();
        assert_eq!(totals.annotated, 1);
        assert_eq!(totals.skipped, 1);
        assert_eq!(totals.killed, 1);
    }

    #[tokio::test]
    async fn node_failure_does_not_stop_the_cycle() {
        let cluster = Arc::new(MockCluster::new());
        let cloud = Arc::new(MockCloud::new());
        let mut broken = expired("a-broken");
        broken.provider_id = None;
        cluster.add_node(broken);
        cluster.add_node(expired("b-good"));

        let reaper = reaper(&cluster, &cloud, Duration::from_secs(600));
        let (_tx, rx) = watch::channel(false);
        let report = reaper.run_cycle(&rx).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.killed, 1);
        assert_eq!(cloud.deleted().len(), 1);
    }

    #[tokio::test]
    async fn listing_failure_is_returned() {
        let cluster = Arc::new(MockCluster::new());
        let cloud = Arc::new(MockCloud::new());
        cluster.set_failing(ClusterOp::ListNodes, true);

        let reaper = reaper(&cluster, &cloud, Duration::from_secs(600));
        let (_tx, rx) = watch::channel(false);
        assert!(reaper.run_cycle(&rx).await.is_err());
    }

    #[tokio::test]
    async fn raised_flag_stops_before_first_node() {
        let cluster = Arc::new(MockCluster::new());
        let cloud = Arc::new(MockCloud::new());
        cluster.add_node(expired("old"));

        let reaper = reaper(&cluster, &cloud, Duration::from_secs(600));
        let (_tx, rx) = watch::channel(true);
        let report = reaper.run_cycle(&rx).await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.processed, 0);
        assert!(cluster.node("old").is_some());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_during_sleep() {
        let cluster = Arc::new(MockCluster::new());
        let cloud = Arc::new(MockCloud::new());
        cluster.add_node(preemptible("fresh"));

        let reaper = Arc::new(reaper(&cluster, &cloud, Duration::from_secs(3600)));
        let (tx, rx) = watch::channel(false);

        let task = {
            let reaper = Arc::clone(&reaper);
            tokio::spawn(async move { reaper.run(rx).await })
        };

        // Wait for the first cycle to annotate the node
        for _ in 0..100 {
            if reaper.totals().snapshot().annotated == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reaper.totals().snapshot().annotated, 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("reaper did not stop")
            .unwrap();
    }
}
