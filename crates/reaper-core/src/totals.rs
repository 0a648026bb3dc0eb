//! Per-outcome node counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of processing one node in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// A fresh expiry was written to the node
    Annotated,
    /// The node is not due yet and was left alone
    Skipped,
    /// The node and its instance were deleted
    Killed,
    /// A step failed; the node is retried next cycle
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annotated => "annotated",
            Self::Skipped => "skipped",
            Self::Killed => "killed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic counters of nodes processed, by outcome
#[derive(Debug, Default)]
pub struct NodeTotals {
    annotated: AtomicU64,
    skipped: AtomicU64,
    killed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`NodeTotals`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TotalsSnapshot {
    pub annotated: u64,
    pub skipped: u64,
    pub killed: u64,
    pub failed: u64,
}

impl NodeTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: NodeStatus) {
        let counter = match status {
            NodeStatus::Annotated => &self.annotated,
            NodeStatus::Skipped => &self.skipped,
            NodeStatus::Killed => &self.killed,
            NodeStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, status: NodeStatus) -> u64 {
        match status {
            NodeStatus::Annotated => self.annotated.load(Ordering::Relaxed),
            NodeStatus::Skipped => self.skipped.load(Ordering::Relaxed),
            NodeStatus::Killed => self.killed.load(Ordering::Relaxed),
            NodeStatus::Failed => self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> TotalsSnapshot {
        TotalsSnapshot {
            annotated: self.get(NodeStatus::Annotated),
            skipped: self.get(NodeStatus::Skipped),
            killed: self.get(NodeStatus::Killed),
            failed: self.get(NodeStatus::Failed),
        }
    }
}
