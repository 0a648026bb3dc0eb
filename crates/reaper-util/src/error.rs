//! Error types for the preemptible reaper

use thiserror::Error;

/// Core error type shared by the reaper crates
#[derive(Debug, Error)]
pub enum ReaperError {
    #[error("Invalid span: end {end} is before start {start}")]
    InvalidSpan { start: i64, end: i64 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReaperError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ReaperError>;
