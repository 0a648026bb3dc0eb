//! Core node lifecycle for the preemptible reaper
//!
//! This crate contains:
//! - Expiry computation (a randomized, window-aware deadline per node)
//! - Node state machine (New -> Annotated -> ExpiredPending -> Cordoned -> Draining -> Deleting -> Done)
//! - Bounded-wait pod draining
//! - The poll engine with cooperative shutdown

mod drain;
mod engine;
mod lifecycle;
mod totals;

pub use drain::*;
pub use engine::*;
pub use lifecycle::*;
pub use totals::*;
