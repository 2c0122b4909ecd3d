//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use scrollwatch_api::RuleMode;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Rules to install at startup
    #[serde(default)]
    pub rules: Vec<RawRule>,
}

/// Service-level settings. Every field falls back to a default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the durable store
    pub data_dir: Option<PathBuf>,

    /// Durable-tier batch flush period
    pub flush_interval_seconds: Option<u64>,

    /// Background reset sweep period
    pub sweep_interval_seconds: Option<u64>,

    /// Ticks closer together than this are duplicates
    pub min_tick_spacing_ms: Option<u64>,

    /// Ceiling on the credit a single tick can earn
    pub max_tick_elapsed_seconds: Option<u64>,

    /// Credit for the first tick seen for a domain
    pub first_tick_seconds: Option<u64>,

    /// Idle time after which a domain's tick tracker is evicted
    pub tracker_ttl_seconds: Option<u64>,

    /// Maximum number of domains with live tick trackers
    pub max_tracked_domains: Option<usize>,
}

/// Raw rule definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRule {
    /// Hostname or URL; normalized on load
    pub domain: String,

    /// Allowance per cycle, in seconds
    pub allowed_seconds: u64,

    /// Cycle or cooldown length, in seconds
    pub reset_seconds: u64,

    #[serde(default)]
    pub mode: RuleMode,
}
