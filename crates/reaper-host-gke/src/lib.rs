//! GKE collaborators for the preemptible reaper
//!
//! - [`KubeClient`]: the Kubernetes REST API, in-cluster or through a proxy URL
//! - [`GceClient`]: the Compute Engine instances API, authorized through the
//!   metadata server

mod gce;
mod kube;
mod objects;

pub use gce::*;
pub use kube::*;
