//! Collaborator interfaces for the preemptible reaper
//!
//! This crate defines the contract between the reaper core and the systems it
//! acts on: the cluster API (nodes, pods, annotations) and the cloud provider
//! (instances). It contains no transport code itself; see `reaper-host-gke`
//! for the HTTPS implementation and [`MockCluster`]/[`MockCloud`] for tests.

mod mock;
mod traits;
mod types;

pub use mock::*;
pub use traits::*;
pub use types::*;
