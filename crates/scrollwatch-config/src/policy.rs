//! Validated policy structures

use crate::schema::{RawConfig, RawRule, RawServiceConfig};
use crate::{
    DEFAULT_FIRST_TICK_SECS, DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_MAX_TICK_ELAPSED_SECS,
    DEFAULT_MAX_TRACKED_DOMAINS, DEFAULT_MIN_TICK_SPACING_MS, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_TRACKER_TTL_SECS,
};
use scrollwatch_api::RuleConfig;
use scrollwatch_util::{Domain, data_dir_without_env, socket_path_without_env};
use std::path::PathBuf;
use std::time::Duration;

/// Validated policy ready for use by the service
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Service configuration
    pub service: ServiceConfig,

    /// Rules to install at startup
    pub rules: Vec<RuleSpec>,
}

impl Policy {
    /// Convert from raw config (after validation).
    ///
    /// Rules whose domain fails to normalize are skipped; validation has
    /// already reported them.
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            rules: raw.rules.into_iter().filter_map(RuleSpec::from_raw).collect(),
        }
    }

    /// Get configured rule by domain
    pub fn get_rule(&self, domain: &Domain) -> Option<&RuleSpec> {
        self.rules.iter().find(|r| &r.domain == domain)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub engine: EngineConfig,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let defaults = EngineConfig::default();

        let engine = EngineConfig {
            flush_interval: raw
                .flush_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_interval),
            sweep_interval: raw
                .sweep_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            min_tick_spacing: raw
                .min_tick_spacing_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_tick_spacing),
            max_tick_elapsed: raw
                .max_tick_elapsed_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_tick_elapsed),
            first_tick_credit: raw
                .first_tick_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.first_tick_credit),
            tracker_ttl: raw
                .tracker_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.tracker_ttl),
            max_tracked_domains: raw
                .max_tracked_domains
                .unwrap_or(defaults.max_tracked_domains),
        };

        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            engine,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: socket_path_without_env(),
            data_dir: data_dir_without_env(),
            engine: EngineConfig::default(),
        }
    }
}

/// Timing knobs for the rule engine and its timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Period of the durable-tier batch flush
    pub flush_interval: Duration,
    /// Period of the background reset sweep
    pub sweep_interval: Duration,
    /// Ticks for one domain closer together than this are duplicates
    pub min_tick_spacing: Duration,
    /// Ceiling on the credit earned by a single tick
    pub max_tick_elapsed: Duration,
    /// Credit for a tick with no prior reference point
    pub first_tick_credit: Duration,
    /// Idle time after which a tick tracker is evicted
    pub tracker_ttl: Duration,
    /// Upper bound on live tick trackers
    pub max_tracked_domains: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            min_tick_spacing: Duration::from_millis(DEFAULT_MIN_TICK_SPACING_MS),
            max_tick_elapsed: Duration::from_secs(DEFAULT_MAX_TICK_ELAPSED_SECS),
            first_tick_credit: Duration::from_secs(DEFAULT_FIRST_TICK_SECS),
            tracker_ttl: Duration::from_secs(DEFAULT_TRACKER_TTL_SECS),
            max_tracked_domains: DEFAULT_MAX_TRACKED_DOMAINS,
        }
    }
}

/// A rule declared in the config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub domain: Domain,
    pub config: RuleConfig,
}

impl RuleSpec {
    fn from_raw(raw: RawRule) -> Option<Self> {
        let domain = Domain::parse(&raw.domain)?;
        Some(Self {
            domain,
            config: RuleConfig::new(raw.allowed_seconds, raw.reset_seconds, raw.mode),
        })
    }
}
