//! Per-domain tick accounting

use chrono::{DateTime, Local};
use scrollwatch_config::EngineConfig;
use scrollwatch_util::{Domain, seconds_between};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// What to do with an incoming tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickVerdict {
    /// Credit this many seconds
    Accepted { credit: f64 },
    /// Too close to the previous accepted tick
    Debounced,
    /// Slightly older than the previous accepted tick
    OutOfOrder,
    /// Clock jumped backwards past the elapsed cap; the tracker now starts
    /// from this tick without crediting it
    Reanchored,
}

/// Last accepted tick per domain.
///
/// Bounded both by idle time (see [`TickTracker::evict_idle`]) and by
/// capacity: when full, the least recently ticked domain is dropped.
#[derive(Debug)]
pub struct TickTracker {
    min_spacing: f64,
    max_elapsed: f64,
    first_credit: f64,
    ttl: Duration,
    capacity: usize,
    last_tick: HashMap<Domain, DateTime<Local>>,
}

impl TickTracker {
    pub fn new(config: &EngineConfig) -> Self {
        let mut tracker = Self {
            min_spacing: 0.0,
            max_elapsed: 0.0,
            first_credit: 0.0,
            ttl: Duration::ZERO,
            capacity: 1,
            last_tick: HashMap::new(),
        };
        tracker.reconfigure(config);
        tracker
    }

    /// Apply new timing knobs, keeping tracked state
    pub fn reconfigure(&mut self, config: &EngineConfig) {
        self.min_spacing = config.min_tick_spacing.as_secs_f64();
        self.max_elapsed = config.max_tick_elapsed.as_secs_f64();
        self.first_credit = config.first_tick_credit.as_secs_f64().min(self.max_elapsed);
        self.ttl = config.tracker_ttl;
        self.capacity = config.max_tracked_domains.max(1);

        while self.last_tick.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Classify a tick and, when accepted, remember it
    pub fn record(&mut self, domain: &Domain, timestamp: DateTime<Local>) -> TickVerdict {
        let Some(&last) = self.last_tick.get(domain) else {
            self.insert(domain, timestamp);
            return TickVerdict::Accepted {
                credit: self.first_credit,
            };
        };

        let elapsed = seconds_between(last, timestamp);

        if elapsed < 0.0 {
            if -elapsed <= self.max_elapsed {
                return TickVerdict::OutOfOrder;
            }
            debug!(domain = %domain, jump_secs = -elapsed, "Clock went backwards, re-anchoring");
            self.insert(domain, timestamp);
            return TickVerdict::Reanchored;
        }

        if elapsed < self.min_spacing {
            return TickVerdict::Debounced;
        }

        self.insert(domain, timestamp);
        TickVerdict::Accepted {
            credit: elapsed.min(self.max_elapsed),
        }
    }

    fn insert(&mut self, domain: &Domain, timestamp: DateTime<Local>) {
        if !self.last_tick.contains_key(domain) && self.last_tick.len() >= self.capacity {
            self.evict_oldest();
        }
        self.last_tick.insert(domain.clone(), timestamp);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .last_tick
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(domain, _)| domain.clone());

        if let Some(domain) = oldest {
            debug!(domain = %domain, "Tracker full, evicting least recent");
            self.last_tick.remove(&domain);
        }
    }

    /// Forget a domain so its next tick counts as a first tick
    pub fn forget(&mut self, domain: &Domain) {
        self.last_tick.remove(domain);
    }

    /// Drop trackers idle longer than the TTL; returns how many went
    pub fn evict_idle(&mut self, now: DateTime<Local>) -> usize {
        let ttl = self.ttl.as_secs_f64();
        let before = self.last_tick.len();
        self.last_tick
            .retain(|_, last| seconds_between(*last, now) < ttl);
        before - self.last_tick.len()
    }

    pub fn is_tracking(&self, domain: &Domain) -> bool {
        self.last_tick.contains_key(domain)
    }

    pub fn len(&self) -> usize {
        self.last_tick.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_tick.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_tick.clear();
    }
}
