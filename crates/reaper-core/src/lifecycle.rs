//! Per-node state machine
//!
//! A node's only persisted state is its expiry annotation. Every poll
//! re-derives the phase from that annotation, so each step below is safe to
//! repeat after a failure.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reaper_cluster_api::{
    CloudError, CloudProvider, ClusterClient, ClusterError, NodeInfo, PodInfo, PodScope,
};
use reaper_config::WindowPolicy;
use reaper_util::{NodeName, ReaperError, format_rfc3339, parse_rfc3339};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{DrainCoordinator, DrainError, NodeStatus, NodeTotals};

/// Node annotation holding the RFC 3339 expiry instant
pub const EXPIRY_ANNOTATION: &str = "estafette.io/gke-preemptible-killer-state";

/// Preemptible nodes are reclaimed by the provider after this long
pub const NODE_MAX_LIFETIME_SECS: i64 = 24 * 3600;

/// Kills are pushed past this offset whenever the remaining life allows
pub const MIN_KILL_OFFSET_SECS: i64 = 12 * 3600;

/// Where a node is in its termination lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    New,
    Annotated,
    ExpiredPending,
    Cordoned,
    Draining,
    Deleting,
    Done,
    FailedRetry,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Annotated => "annotated",
            Self::ExpiredPending => "expired-pending",
            Self::Cordoned => "cordoned",
            Self::Draining => "draining",
            Self::Deleting => "deleting",
            Self::Done => "done",
            Self::FailedRetry => "failed-retry",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expiry-related state of a node, as read from the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub node_name: NodeName,
    pub creation: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
}

impl NodeState {
    pub fn phase(&self, now: &DateTime<Utc>) -> LifecyclePhase {
        match &self.expiry {
            None => LifecyclePhase::New,
            Some(expiry) if should_terminate(now, expiry) => LifecyclePhase::ExpiredPending,
            Some(_) => LifecyclePhase::Annotated,
        }
    }
}

/// Whether a node with this expiry is due for termination
pub fn should_terminate(now: &DateTime<Utc>, expiry: &DateTime<Utc>) -> bool {
    now >= expiry
}

/// Randomized budget, in seconds, from `now` until a node should be killed.
///
/// The draw is uniform over the node's remaining life minus the drain
/// timeout. When more than twelve hours remain, draws in the first twelve
/// hours are shifted forward by twelve hours, then capped at the latest
/// offset that still leaves time to drain.
pub fn expiry_offset_seconds<R: Rng + ?Sized>(
    now: &DateTime<Utc>,
    creation: &DateTime<Utc>,
    drain_timeout_secs: i64,
    rng: &mut R,
) -> i64 {
    let deleted_by = creation.timestamp() + NODE_MAX_LIFETIME_SECS;
    let remaining_life = (deleted_by - now.timestamp()).max(0);
    let latest_safe = (remaining_life - drain_timeout_secs).max(0);

    let mut offset = if latest_safe > 0 {
        rng.gen_range(0..latest_safe)
    } else {
        0
    };
    if remaining_life > MIN_KILL_OFFSET_SECS && offset < MIN_KILL_OFFSET_SECS {
        offset = (offset + MIN_KILL_OFFSET_SECS).min(latest_safe);
    }
    offset
}

/// What processing a node did this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Not due yet. `annotated` is set when a fresh expiry was computed.
    Kept {
        expiry: DateTime<Utc>,
        annotated: bool,
    },
    /// Node object and cloud instance deleted
    Killed,
}

/// Why processing a node stopped early
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Node {node} has no usable provider id ({provider_id:?})")]
    MissingInstance {
        node: NodeName,
        provider_id: Option<String>,
    },

    #[error("Node {node}: expiry computation failed: {source}")]
    Expiry {
        node: NodeName,
        #[source]
        source: ReaperError,
    },

    #[error("Node {node}: cluster call failed while {phase}: {source}")]
    Cluster {
        node: NodeName,
        phase: LifecyclePhase,
        #[source]
        source: ClusterError,
    },

    #[error("Node {node}: drain failed: {source}")]
    Drain {
        node: NodeName,
        #[source]
        source: DrainError,
    },

    #[error("Node {node}: instance deletion failed: {source}")]
    Cloud {
        node: NodeName,
        #[source]
        source: CloudError,
    },
}

impl LifecycleError {
    pub fn node(&self) -> &NodeName {
        match self {
            Self::MissingInstance { node, .. }
            | Self::Expiry { node, .. }
            | Self::Cluster { node, .. }
            | Self::Drain { node, .. }
            | Self::Cloud { node, .. } => node,
        }
    }
}

/// Drives single nodes through annotate, wait, cordon, drain and delete
pub struct NodeLifecycle {
    cluster: Arc<dyn ClusterClient>,
    cloud: Arc<dyn CloudProvider>,
    policy: Arc<WindowPolicy>,
    drain: DrainCoordinator,
    drain_timeout: Duration,
    rng: Mutex<StdRng>,
    totals: Arc<NodeTotals>,
}

impl NodeLifecycle {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        cloud: Arc<dyn CloudProvider>,
        policy: Arc<WindowPolicy>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            drain: DrainCoordinator::new(Arc::clone(&cluster)),
            cluster,
            cloud,
            policy,
            drain_timeout,
            rng: Mutex::new(StdRng::from_entropy()),
            totals: Arc::new(NodeTotals::new()),
        }
    }

    /// Use a deterministic random source
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain = self.drain.with_poll_interval(interval);
        self
    }

    pub fn with_totals(mut self, totals: Arc<NodeTotals>) -> Self {
        self.totals = totals;
        self
    }

    pub fn totals(&self) -> &Arc<NodeTotals> {
        &self.totals
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    /// Read a node's expiry annotation; absent or unparsable means none
    pub fn current_state(&self, node: &NodeInfo) -> NodeState {
        let expiry = match node.annotation(EXPIRY_ANNOTATION) {
            Some(value) => {
                let parsed = parse_rfc3339(value);
                if parsed.is_none() {
                    warn!(node = %node.name, value, "Ignoring unparsable expiry annotation");
                }
                parsed
            }
            None => None,
        };

        NodeState {
            node_name: node.name.clone(),
            creation: node.creation_timestamp,
            expiry,
        }
    }

    /// Compute a fresh expiry for a node created at `creation`
    pub fn desired_expiry(
        &self,
        now: &DateTime<Utc>,
        creation: &DateTime<Utc>,
    ) -> reaper_util::Result<DateTime<Utc>> {
        let drain_secs = i64::try_from(self.drain_timeout.as_secs()).unwrap_or(i64::MAX);
        let offset = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            expiry_offset_seconds(now, creation, drain_secs, &mut *rng)
        };
        self.policy.expiry_from(now, offset)
    }

    /// Process one node for this poll cycle and record the outcome
    pub async fn process_node(
        &self,
        node: &NodeInfo,
        now: &DateTime<Utc>,
    ) -> Result<NodeOutcome, LifecycleError> {
        let result = self.step(node, now).await;
        match &result {
            Ok(NodeOutcome::Kept { .. }) => self.totals.record(NodeStatus::Skipped),
            Ok(NodeOutcome::Killed) => self.totals.record(NodeStatus::Killed),
            Err(_) => self.totals.record(NodeStatus::Failed),
        }
        result
    }

    async fn step(
        &self,
        node: &NodeInfo,
        now: &DateTime<Utc>,
    ) -> Result<NodeOutcome, LifecycleError> {
        let state = self.current_state(node);

        let (expiry, annotated) = match state.expiry {
            Some(expiry) => (expiry, false),
            None => (self.annotate(node, now).await?, true),
        };

        if !should_terminate(now, &expiry) {
            info!(
                node = %node.name,
                expiry = %format_rfc3339(&expiry),
                minutes_left = (expiry - *now).num_minutes(),
                "Keeping node"
            );
            return Ok(NodeOutcome::Kept { expiry, annotated });
        }

        info!(
            node = %node.name,
            minutes_ago = (*now - expiry).num_minutes(),
            "Node expired, deleting"
        );
        self.terminate(node).await?;
        Ok(NodeOutcome::Killed)
    }

    /// Compute and persist a fresh expiry.
    ///
    /// A failed write is logged and the computed value is still used; the
    /// next cycle computes a new one.
    async fn annotate(
        &self,
        node: &NodeInfo,
        now: &DateTime<Utc>,
    ) -> Result<DateTime<Utc>, LifecycleError> {
        let expiry = self
            .desired_expiry(now, &node.creation_timestamp)
            .map_err(|source| LifecycleError::Expiry {
                node: node.name.clone(),
                source,
            })?;
        let value = format_rfc3339(&expiry);

        info!(node = %node.name, expiry = %value, "Annotation not found, adding expiry");

        match self
            .cluster
            .set_node_annotation(&node.name, EXPIRY_ANNOTATION, &value)
            .await
        {
            Ok(()) => self.totals.record(NodeStatus::Annotated),
            Err(e) => {
                warn!(node = %node.name, error = %e, "Failed to persist expiry annotation");
                self.totals.record(NodeStatus::Failed);
            }
        }

        Ok(expiry)
    }

    /// Cordon, drain, then delete the node object and its instance.
    ///
    /// The node is re-read first; its backing instance is resolved from the
    /// stored object before anything is changed.
    pub async fn terminate(&self, node: &NodeInfo) -> Result<(), LifecycleError> {
        let name = &node.name;
        let current = self
            .cluster
            .get_node(name)
            .await
            .map_err(|source| self.cluster_error(name, LifecyclePhase::ExpiredPending, source))?;
        let instance = current
            .instance()
            .ok_or_else(|| LifecycleError::MissingInstance {
                node: name.clone(),
                provider_id: current.provider_id.clone(),
            })?;

        self.cluster
            .set_unschedulable(name, true)
            .await
            .map_err(|source| self.cluster_error(name, LifecyclePhase::Cordoned, source))?;
        debug!(node = %name, phase = %LifecyclePhase::Cordoned, "Node cordoned");

        self.drain_scope(name, PodScope::Workloads, PodInfo::is_daemon_set_pod)
            .await?;
        self.drain_scope(name, PodScope::ClusterDns, |_| false).await?;

        self.cluster
            .delete_node(name)
            .await
            .map_err(|source| self.cluster_error(name, LifecyclePhase::Deleting, source))?;
        debug!(node = %name, phase = %LifecyclePhase::Deleting, "Node object deleted");

        self.cloud
            .delete_instance(&instance)
            .await
            .map_err(|source| {
                error!(node = %name, instance = %instance, error = %source, "Failed to delete instance");
                LifecycleError::Cloud {
                    node: name.clone(),
                    source,
                }
            })?;

        info!(node = %name, instance = %instance, phase = %LifecyclePhase::Done, "Node deleted");
        Ok(())
    }

    async fn drain_scope(
        &self,
        name: &NodeName,
        scope: PodScope,
        exclude: crate::PodFilter,
    ) -> Result<(), LifecycleError> {
        debug!(node = %name, phase = %LifecyclePhase::Draining, scope = %scope, "Draining node");
        self.drain
            .drain(name, scope, exclude, self.drain_timeout)
            .await
            .map(|_| ())
            .map_err(|source| LifecycleError::Drain {
                node: name.clone(),
                source,
            })
    }

    fn cluster_error(
        &self,
        name: &NodeName,
        phase: LifecyclePhase,
        source: ClusterError,
    ) -> LifecycleError {
        error!(node = %name, phase = %phase, error = %source, "Cluster call failed");
        LifecycleError::Cluster {
            node: name.clone(),
            phase,
            source,
        }
    }
}
