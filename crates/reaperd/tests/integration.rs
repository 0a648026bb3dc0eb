//! Integration tests for reaperd
//!
//! These drive the poll engine end to end against the in-memory cluster and
//! cloud, with settings loaded the same way the daemon loads them.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reaper_cluster_api::{
    ClusterCall, CloudProvider, ClusterClient, LabelSelector, MockCloud, MockCluster, NodeInfo,
    PREEMPTIBLE_LABEL, PodInfo,
};
use reaper_config::{Settings, load_config, parse_config};
use reaper_core::{EXPIRY_ANNOTATION, NodeLifecycle, Reaper};
use reaper_util::{format_rfc3339, parse_rfc3339};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Harness {
    cluster: Arc<MockCluster>,
    cloud: Arc<MockCloud>,
    reaper: Arc<Reaper>,
}

fn harness(settings: &Settings) -> Harness {
    let cluster = Arc::new(MockCluster::new());
    let cloud = Arc::new(MockCloud::new());

    let cluster_client: Arc<dyn ClusterClient> = cluster.clone();
    let cloud_client: Arc<dyn CloudProvider> = cloud.clone();
    let policy = Arc::new(settings.window_policy().unwrap());

    let lifecycle = NodeLifecycle::new(
        Arc::clone(&cluster_client),
        cloud_client,
        policy,
        settings.drain_timeout,
    )
    .with_seed(2017)
    .with_drain_poll_interval(Duration::from_millis(10));

    let reaper = Arc::new(Reaper::new(
        cluster_client,
        lifecycle,
        LabelSelector::with_filters(&settings.label_filters),
        settings.interval,
    ));

    Harness {
        cluster,
        cloud,
        reaper,
    }
}

fn preemptible(name: &str, created: DateTime<Utc>) -> NodeInfo {
    NodeInfo::new(name, created)
        .with_label(PREEMPTIBLE_LABEL, "true")
        .with_provider_id(format!("gce://my-project/europe-west1-b/{name}"))
}

fn expiry_of(cluster: &MockCluster, name: &str) -> Option<DateTime<Utc>> {
    cluster
        .node(name)
        .and_then(|n| n.annotation(EXPIRY_ANNOTATION).and_then(parse_rfc3339))
}

#[tokio::test]
async fn test_fresh_nodes_get_expiry_inside_window() {
    let settings = parse_config(
        r#"
config_version = 1
whitelist_hours = "09:00 - 12:00, 13:00 - 18:00"
blacklist_hours = "10:00 - 11:00"
"#,
    )
    .unwrap();
    let h = harness(&settings);
    let policy = settings.window_policy().unwrap();

    let created = Utc::now() - ChronoDuration::hours(1);
    for i in 0..5 {
        h.cluster.add_node(preemptible(&format!("node-{i}"), created));
    }

    let (_tx, rx) = watch::channel(false);
    let report = h.reaper.run_cycle(&rx).await.unwrap();
    assert_eq!(report.processed, 5);
    assert_eq!(report.killed, 0);

    for i in 0..5 {
        let expiry = expiry_of(&h.cluster, &format!("node-{i}")).unwrap();
        assert!(expiry > Utc::now());
        assert!(policy.is_allowed(&expiry), "expiry {expiry} outside window");
    }

    // A second cycle leaves the annotations alone
    let before: Vec<_> = (0..5)
        .map(|i| expiry_of(&h.cluster, &format!("node-{i}")))
        .collect();
    h.reaper.run_cycle(&rx).await.unwrap();
    let after: Vec<_> = (0..5)
        .map(|i| expiry_of(&h.cluster, &format!("node-{i}")))
        .collect();
    assert_eq!(before, after);

    let totals = h.reaper.totals().snapshot();
    assert_eq!(totals.annotated, 5);
    assert_eq!(totals.skipped, 10);
}

#[tokio::test]
async fn test_expired_node_is_drained_and_deleted() {
    let h = harness(&Settings::default());
    let created = Utc::now() - ChronoDuration::hours(20);
    let expired = Utc::now() - ChronoDuration::minutes(5);

    h.cluster.add_node(
        preemptible("old", created).with_annotation(EXPIRY_ANNOTATION, format_rfc3339(&expired)),
    );
    h.cluster.add_node(preemptible("young", Utc::now()));
    h.cluster
        .add_pod(PodInfo::new("default", "web-1").on_node("old"));
    h.cluster.add_pod(
        PodInfo::new("default", "fluentd")
            .on_node("old")
            .owned_by("DaemonSet", "fluentd"),
    );
    h.cluster.add_pod(
        PodInfo::new("kube-system", "kube-dns-abc")
            .on_node("old")
            .with_label("k8s-app", "kube-dns"),
    );
    h.cluster
        .add_pod(PodInfo::new("default", "web-2").on_node("young"));

    let (_tx, rx) = watch::channel(false);
    let report = h.reaper.run_cycle(&rx).await.unwrap();
    assert_eq!(report.killed, 1);

    assert!(h.cluster.node("old").is_none());
    assert!(h.cluster.node("young").is_some());

    let deleted_pods: Vec<String> = h
        .cluster
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ClusterCall::DeletePod { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(deleted_pods, vec!["web-1".to_string(), "kube-dns-abc".to_string()]);

    let instances = h.cloud.deleted();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].name, "old");
    assert_eq!(instances[0].zone, "europe-west1-b");
}

#[tokio::test]
async fn test_stuck_drain_is_retried_next_cycle() {
    let settings = Settings {
        drain_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let h = harness(&settings);
    let expired = Utc::now() - ChronoDuration::minutes(1);
    h.cluster.add_node(
        preemptible("old", Utc::now() - ChronoDuration::hours(23))
            .with_annotation(EXPIRY_ANNOTATION, format_rfc3339(&expired)),
    );
    h.cluster
        .add_pod(PodInfo::new("default", "slow").on_node("old"));
    h.cluster.mark_stuck("default", "slow");

    let (_tx, rx) = watch::channel(false);
    let first = h.reaper.run_cycle(&rx).await.unwrap();
    assert_eq!(first.failed, 1);
    assert!(h.cluster.node("old").unwrap().unschedulable);
    assert!(h.cloud.deleted().is_empty());

    h.cluster.release_stuck("default", "slow");
    let second = h.reaper.run_cycle(&rx).await.unwrap();
    assert_eq!(second.killed, 1);
    assert_eq!(h.cloud.deleted().len(), 1);

    let totals = h.reaper.totals().snapshot();
    assert_eq!(totals.failed, 1);
    assert_eq!(totals.killed, 1);
}

#[tokio::test]
async fn test_label_filters_narrow_selection() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
config_version = 1
filters = "pool: batch"
"#
    )
    .unwrap();
    let settings = load_config(file.path()).unwrap();
    let h = harness(&settings);

    h.cluster
        .add_node(preemptible("batch-1", Utc::now()).with_label("pool", "batch"));
    h.cluster
        .add_node(preemptible("web-1", Utc::now()).with_label("pool", "web"));

    let (_tx, rx) = watch::channel(false);
    let report = h.reaper.run_cycle(&rx).await.unwrap();

    assert_eq!(report.listed, 1);
    assert!(expiry_of(&h.cluster, "batch-1").is_some());
    assert!(expiry_of(&h.cluster, "web-1").is_none());
}

#[tokio::test]
async fn test_shutdown_stops_engine() {
    let settings = Settings {
        interval: Duration::from_secs(3600),
        ..Default::default()
    };
    let h = harness(&settings);
    h.cluster.add_node(preemptible("node-1", Utc::now()));

    let (tx, rx) = watch::channel(false);
    let engine = {
        let reaper = Arc::clone(&h.reaper);
        tokio::spawn(async move { reaper.run(rx).await })
    };

    for _ in 0..200 {
        if h.reaper.totals().snapshot().annotated == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(expiry_of(&h.cluster, "node-1").is_some());

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), engine)
        .await
        .expect("engine did not stop")
        .unwrap();
}
