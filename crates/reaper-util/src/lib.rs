//! Shared utilities for the preemptible reaper
//!
//! This crate provides:
//! - Interval set algebra over integer-second timespans
//! - Time utilities (UTC clock with mock override, duration helpers)
//! - Jittered intervals for polling loops
//! - ID types (NodeName)
//! - Error types

mod error;
mod ids;
mod interval;
mod jitter;
mod time;

pub use error::*;
pub use ids::*;
pub use interval::*;
pub use jitter::*;
pub use time::*;
