//! Shared types for the scrollwatch API and persisted state

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use scrollwatch_util::{Domain, RuleId, WatchError};
use std::collections::BTreeMap;

/// Upper bound for configured durations (ten years, in seconds)
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Which reset policy governs a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
    /// Fixed recurring cycle: N seconds per reset interval
    #[default]
    Quota,
    /// Penalty timer started at the moment of blocking
    Cooldown,
}

impl std::fmt::Display for RuleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleMode::Quota => write!(f, "quota"),
            RuleMode::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Operator-configurable part of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Seconds of permitted active time per cycle
    pub allowed_duration: u64,
    /// Cycle length (quota) or lockout length (cooldown), in seconds
    pub reset_interval: u64,
    #[serde(default)]
    pub mode: RuleMode,
}

impl RuleConfig {
    pub fn new(allowed_duration: u64, reset_interval: u64, mode: RuleMode) -> Self {
        Self {
            allowed_duration,
            reset_interval,
            mode,
        }
    }

    pub fn validate(&self) -> Result<(), WatchError> {
        if self.allowed_duration == 0 {
            return Err(WatchError::validation("allowed_duration must be positive"));
        }
        if self.reset_interval == 0 {
            return Err(WatchError::validation("reset_interval must be positive"));
        }
        if self.allowed_duration > MAX_DURATION_SECS || self.reset_interval > MAX_DURATION_SECS {
            return Err(WatchError::validation(format!(
                "durations must not exceed {MAX_DURATION_SECS} seconds"
            )));
        }
        Ok(())
    }
}

/// Reset timing state, tagged by mode.
///
/// Only the timestamp relevant to the active mode exists, so a rule can never
/// carry both interpretations at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResetPolicy {
    Quota {
        /// Start of the current cycle
        last_reset: DateTime<Local>,
    },
    Cooldown {
        /// When blocking began; `None` while not blocked
        #[serde(default)]
        block_start_time: Option<DateTime<Local>>,
    },
}

impl ResetPolicy {
    /// Fresh policy state for a rule created (or re-moded) at `now`
    pub fn fresh(mode: RuleMode, now: DateTime<Local>) -> Self {
        match mode {
            RuleMode::Quota => ResetPolicy::Quota { last_reset: now },
            RuleMode::Cooldown => ResetPolicy::Cooldown {
                block_start_time: None,
            },
        }
    }

    pub fn mode(&self) -> RuleMode {
        match self {
            ResetPolicy::Quota { .. } => RuleMode::Quota,
            ResetPolicy::Cooldown { .. } => RuleMode::Cooldown,
        }
    }
}

/// Policy and live counters for one watched domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub domain: Domain,
    pub allowed_duration: u64,
    pub reset_interval: u64,
    /// Active seconds accrued in the current cycle
    pub consumed_time: f64,
    pub is_blocked: bool,
    #[serde(flatten)]
    pub policy: ResetPolicy,
}

impl Rule {
    /// Create a rule with zero consumption and a fresh id
    pub fn new(domain: Domain, config: RuleConfig, now: DateTime<Local>) -> Self {
        Self {
            id: RuleId::new(),
            domain,
            allowed_duration: config.allowed_duration,
            reset_interval: config.reset_interval,
            consumed_time: 0.0,
            is_blocked: false,
            policy: ResetPolicy::fresh(config.mode, now),
        }
    }

    pub fn mode(&self) -> RuleMode {
        self.policy.mode()
    }

    pub fn config(&self) -> RuleConfig {
        RuleConfig {
            allowed_duration: self.allowed_duration,
            reset_interval: self.reset_interval,
            mode: self.mode(),
        }
    }

    /// Whether the consumption counter has reached the allowance
    pub fn is_exhausted(&self) -> bool {
        self.consumed_time >= self.allowed_duration as f64
    }

    /// Seconds of allowance left in the current cycle
    pub fn remaining(&self) -> f64 {
        (self.allowed_duration as f64 - self.consumed_time).max(0.0)
    }
}

/// Process-wide aggregate counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Block transitions observed since the first run
    pub total_blocks: u64,
    /// First-run timestamp
    pub start_time: DateTime<Local>,
}

impl Stats {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            total_blocks: 0,
            start_time: now,
        }
    }
}

/// Watchlist keyed by normalized domain
pub type Watchlist = BTreeMap<Domain, Rule>;

/// Root persisted aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageData {
    #[serde(default)]
    pub watchlist: Watchlist,
    pub stats: Stats,
}

impl StorageData {
    /// Empty watchlist with fresh stats
    pub fn fresh(now: DateTime<Local>) -> Self {
        Self {
            watchlist: Watchlist::new(),
            stats: Stats::new(now),
        }
    }
}

/// Signal pushed to observers when a domain changes blocking state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSignal {
    Block,
    Unblock,
}

/// Which notifications a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SubscriberScope {
    /// Management surfaces see every domain
    Management,
    /// Page observers see only their own domain
    Domain { domain: Domain },
}

impl SubscriberScope {
    pub fn matches(&self, domain: &Domain) -> bool {
        match self {
            SubscriberScope::Management => true,
            SubscriberScope::Domain { domain: own } => own == domain,
        }
    }
}
