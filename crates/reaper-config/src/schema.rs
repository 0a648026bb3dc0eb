//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// UTC ranges in which deletion is allowed and preferred
    pub whitelist_hours: Option<String>,

    /// UTC ranges in which deletion is NOT allowed
    pub blacklist_hours: Option<String>,

    /// Max time to wait for pods to leave a node before giving up
    pub drain_timeout_seconds: Option<u64>,

    /// Time between node checks
    pub interval_seconds: Option<u64>,

    /// Extra node label filters
    #[serde(default)]
    pub filters: Option<RawFilters>,
}

/// Label filters, either as a `key: value; ...` string or as a table
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawFilters {
    Spec(String),
    Table(BTreeMap<String, String>),
}
