//! Rule enforcement engine

use chrono::{DateTime, Local};
use scrollwatch_api::{PageSignal, ResetPolicy, Rule, RuleConfig, RuleMode, Stats, StorageData};
use scrollwatch_config::{EngineConfig, RuleSpec};
use scrollwatch_store::{BatchStore, WritePolicy};
use scrollwatch_util::{Domain, Result, RuleId, WatchError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::{Notifier, RuleRegistry, TickTracker, TickVerdict, apply_reset, repair, reset_due};

/// Result of processing one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No rule watches the domain
    Untracked,
    /// Rule is blocked, tick ignored
    AlreadyBlocked,
    /// Too close to the previous accepted tick
    Debounced,
    /// Older than the previous accepted tick
    OutOfOrder,
    /// Clock jumped backwards; no credit given
    Reanchored,
    /// Time credited, allowance not yet exhausted
    Accrued { consumed_time: f64 },
    /// Time credited and the rule is now blocked
    Blocked { consumed_time: f64 },
}

/// Counts from a watchlist replacement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub renamed: usize,
    pub removed: usize,
    pub rejected: usize,
}

/// Counts from a background sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rules whose cycle was reset
    pub reset: usize,
    /// Of those, how many were blocked
    pub unblocked: usize,
    /// Idle tick trackers dropped
    pub evicted: usize,
}

type Signals = Vec<(Domain, PageSignal)>;

/// The rule state machine.
///
/// Owns the working set of rules and is the only writer of it. Every
/// mutation is handed to the persistence layer; block state changes are
/// written through before observers are notified.
pub struct RuleEngine {
    registry: RuleRegistry,
    stats: Stats,
    tracker: TickTracker,
    store: BatchStore,
    notifier: Notifier,
    config: EngineConfig,
}

impl RuleEngine {
    /// Create an engine hydrated from the persistence layer
    pub async fn new(store: BatchStore, notifier: Notifier, config: EngineConfig) -> Self {
        let now = scrollwatch_util::now();
        let data = store.read().await;

        let mut registry = RuleRegistry::from_watchlist(data.watchlist.clone());
        let mut repaired = 0;
        for rule in registry.all_mut() {
            if repair(rule, now) {
                warn!(domain = %rule.domain, "Repaired inconsistent stored rule");
                repaired += 1;
            }
        }

        info!(
            rule_count = registry.len(),
            total_blocks = data.stats.total_blocks,
            "Rule engine initialized"
        );

        let engine = Self {
            registry,
            stats: data.stats,
            tracker: TickTracker::new(&config),
            store,
            notifier,
            config,
        };

        if repaired > 0 {
            engine.persist(WritePolicy::WriteBack).await;
        }

        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply new timing knobs
    pub fn set_config(&mut self, config: EngineConfig) {
        self.tracker.reconfigure(&config);
        self.config = config;
        info!("Engine configuration updated");
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn rule(&self, domain: &Domain) -> Option<&Rule> {
        self.registry.get(domain)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.registry.all()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Number of domains with a live tick tracker
    pub fn tracked_domains(&self) -> usize {
        self.tracker.len()
    }

    /// Current state for management surfaces
    pub fn snapshot(&self) -> StorageData {
        StorageData {
            watchlist: self.registry.to_watchlist(),
            stats: self.stats,
        }
    }

    async fn persist(&self, policy: WritePolicy) {
        self.store.write(self.snapshot(), policy).await;
    }

    /// Persist, then tell observers. Block state changes force a write-through.
    async fn commit(&self, signals: Signals) {
        let policy = if signals.is_empty() {
            WritePolicy::WriteBack
        } else {
            WritePolicy::WriteThrough
        };
        self.persist(policy).await;

        for (domain, signal) in signals {
            self.notifier.notify(domain, signal);
        }
    }

    /// Account one tick of activity on `domain`.
    ///
    /// `timestamp` comes from the observer and only measures the spacing
    /// between ticks. Reset checks and block times use the service's `now`.
    pub async fn process_tick(
        &mut self,
        domain: &Domain,
        timestamp: DateTime<Local>,
        now: DateTime<Local>,
    ) -> TickOutcome {
        if !self.registry.contains(domain) {
            debug!(domain = %domain, "Tick for unwatched domain");
            return TickOutcome::Untracked;
        }

        self.reset_if_due(domain, now, false).await;

        let Some(rule) = self.registry.get_mut(domain) else {
            return TickOutcome::Untracked;
        };
        if rule.is_blocked {
            return TickOutcome::AlreadyBlocked;
        }

        let credit = match self.tracker.record(domain, timestamp) {
            TickVerdict::Accepted { credit } => credit,
            TickVerdict::Debounced => return TickOutcome::Debounced,
            TickVerdict::OutOfOrder => return TickOutcome::OutOfOrder,
            TickVerdict::Reanchored => return TickOutcome::Reanchored,
        };

        rule.consumed_time += credit;
        let consumed_time = rule.consumed_time;

        if !rule.is_exhausted() {
            self.persist(WritePolicy::WriteBack).await;
            return TickOutcome::Accrued { consumed_time };
        }

        rule.is_blocked = true;
        if let ResetPolicy::Cooldown { block_start_time } = &mut rule.policy {
            *block_start_time = Some(now);
        }
        let allowed = rule.allowed_duration;

        self.stats.total_blocks += 1;
        self.tracker.forget(domain);

        info!(
            domain = %domain,
            consumed_secs = consumed_time,
            allowed_secs = allowed,
            "Allowance exhausted, blocking"
        );

        self.commit(vec![(domain.clone(), PageSignal::Block)]).await;
        TickOutcome::Blocked { consumed_time }
    }

    /// Whether `domain` is blocked right now, lifting the block first if its
    /// reset condition holds
    pub async fn check_status(&mut self, domain: &Domain, now: DateTime<Local>) -> bool {
        if !self.registry.contains(domain) {
            return false;
        }

        self.reset_if_due(domain, now, true).await;
        self.registry.get(domain).is_some_and(|rule| rule.is_blocked)
    }

    /// Reset one rule if due. Returns whether a reset happened.
    async fn reset_if_due(&mut self, domain: &Domain, now: DateTime<Local>, blocked_only: bool) -> bool {
        let Some(rule) = self.registry.get_mut(domain) else {
            return false;
        };
        if blocked_only && !rule.is_blocked {
            return false;
        }
        if !reset_due(rule, now) {
            return false;
        }

        let was_blocked = rule.is_blocked;
        apply_reset(rule, now);
        self.tracker.forget(domain);

        if was_blocked {
            info!(domain = %domain, "Reset condition met, unblocking");
            self.commit(vec![(domain.clone(), PageSignal::Unblock)]).await;
        } else {
            debug!(domain = %domain, "Quota cycle rolled over");
            self.commit(Vec::new()).await;
        }
        true
    }

    fn apply_add(&mut self, domain: Domain, config: RuleConfig, now: DateTime<Local>) -> Result<RuleId> {
        config.validate()?;
        if self.registry.contains(&domain) {
            return Err(WatchError::RuleExists(domain));
        }

        let rule = Rule::new(domain.clone(), config, now);
        let id = rule.id.clone();
        info!(
            domain = %domain,
            allowed_secs = config.allowed_duration,
            reset_secs = config.reset_interval,
            mode = %config.mode,
            "Rule added"
        );
        self.registry.upsert(domain, rule);
        Ok(id)
    }

    fn apply_update(
        &mut self,
        domain: &Domain,
        config: RuleConfig,
        now: DateTime<Local>,
    ) -> Result<Option<PageSignal>> {
        config.validate()?;
        let Some(rule) = self.registry.get_mut(domain) else {
            return Err(WatchError::RuleNotFound(domain.clone()));
        };

        let was_blocked = rule.is_blocked;
        rule.allowed_duration = config.allowed_duration;
        rule.reset_interval = config.reset_interval;

        if config.mode != rule.mode() {
            rule.policy = match config.mode {
                RuleMode::Quota => ResetPolicy::Quota { last_reset: now },
                RuleMode::Cooldown => ResetPolicy::Cooldown {
                    block_start_time: was_blocked.then_some(now),
                },
            };
        }

        let now_blocked = rule.is_exhausted();
        rule.is_blocked = now_blocked;

        let signal = match (was_blocked, now_blocked) {
            (false, true) => {
                if let ResetPolicy::Cooldown { block_start_time } = &mut rule.policy {
                    *block_start_time = Some(now);
                }
                self.stats.total_blocks += 1;
                self.tracker.forget(domain);
                Some(PageSignal::Block)
            }
            (true, false) => {
                if let ResetPolicy::Cooldown { block_start_time } = &mut rule.policy {
                    *block_start_time = None;
                }
                Some(PageSignal::Unblock)
            }
            _ => None,
        };

        info!(
            domain = %domain,
            allowed_secs = config.allowed_duration,
            reset_secs = config.reset_interval,
            mode = %config.mode,
            is_blocked = now_blocked,
            "Rule updated"
        );
        Ok(signal)
    }

    fn apply_delete(&mut self, domain: &Domain) -> Result<(Rule, Option<PageSignal>)> {
        let rule = self
            .registry
            .remove(domain)
            .ok_or_else(|| WatchError::RuleNotFound(domain.clone()))?;
        self.tracker.forget(domain);

        info!(domain = %domain, "Rule deleted");
        let signal = rule.is_blocked.then_some(PageSignal::Unblock);
        Ok((rule, signal))
    }

    /// Watch a new domain
    pub async fn add_rule(
        &mut self,
        domain: Domain,
        config: RuleConfig,
        now: DateTime<Local>,
    ) -> Result<RuleId> {
        let id = self.apply_add(domain, config, now)?;
        self.persist(WritePolicy::WriteThrough).await;
        Ok(id)
    }

    /// Change a rule's allowance, interval or mode, keeping its counters
    pub async fn update_rule(
        &mut self,
        domain: &Domain,
        config: RuleConfig,
        now: DateTime<Local>,
    ) -> Result<()> {
        let signal = self.apply_update(domain, config, now)?;
        self.persist(WritePolicy::WriteThrough).await;
        if let Some(signal) = signal {
            self.notifier.notify(domain.clone(), signal);
        }
        Ok(())
    }

    /// Add the rule, or update it if the domain is already watched
    pub async fn upsert_rule(
        &mut self,
        domain: Domain,
        config: RuleConfig,
        now: DateTime<Local>,
    ) -> Result<()> {
        if self.registry.contains(&domain) {
            self.update_rule(&domain, config, now).await
        } else {
            self.add_rule(domain, config, now).await.map(|_| ())
        }
    }

    /// Stop watching a domain
    pub async fn delete_rule(&mut self, domain: &Domain) -> Result<Rule> {
        let (rule, signal) = self.apply_delete(domain)?;
        self.persist(WritePolicy::WriteThrough).await;
        if let Some(signal) = signal {
            self.notifier.notify(domain.clone(), signal);
        }
        Ok(rule)
    }

    /// Move a rule to another domain.
    ///
    /// Consumption history is not carried over: the old rule is deleted and
    /// a fresh one created. Renaming onto the same domain is an update.
    pub async fn rename_rule(
        &mut self,
        old: &Domain,
        new: Domain,
        config: RuleConfig,
        now: DateTime<Local>,
    ) -> Result<RuleId> {
        if old == &new {
            self.update_rule(old, config, now).await?;
            return self
                .registry
                .get(old)
                .map(|rule| rule.id.clone())
                .ok_or_else(|| WatchError::RuleNotFound(old.clone()));
        }

        config.validate()?;
        if self.registry.contains(&new) {
            return Err(WatchError::RuleExists(new));
        }

        let (_, signal) = self.apply_delete(old)?;
        let id = self.apply_add(new, config, now)?;

        self.persist(WritePolicy::WriteThrough).await;
        if let Some(signal) = signal {
            self.notifier.notify(old.clone(), signal);
        }
        Ok(id)
    }

    /// Make the watchlist match `incoming`.
    ///
    /// Keys are normalized and malformed ones dropped. An incoming rule whose
    /// id belongs to an existing rule under another domain is a rename.
    /// Existing domains get their configuration updated, new ones are added
    /// and domains missing from `incoming` are deleted. Live counters in
    /// `incoming` are ignored.
    pub async fn replace_watchlist(
        &mut self,
        incoming: BTreeMap<String, Rule>,
        now: DateTime<Local>,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut desired: BTreeMap<Domain, Rule> = BTreeMap::new();

        for (key, rule) in incoming {
            let Some(domain) = Domain::parse(&key) else {
                debug!(key = %key, "Dropping rule with malformed domain");
                summary.rejected += 1;
                continue;
            };
            if let Err(e) = rule.config().validate() {
                warn!(domain = %domain, error = %e, "Dropping invalid rule");
                summary.rejected += 1;
                continue;
            }
            desired.insert(domain, rule);
        }

        let mut signals = Signals::new();

        // Renames first, so the old domain is not treated as removed
        let mut renamed_to = BTreeSet::new();
        for (domain, rule) in &desired {
            if self.registry.contains(domain) {
                continue;
            }
            let Some(old) = self.registry.find_by_id(&rule.id).map(|r| r.domain.clone()) else {
                continue;
            };
            if desired.contains_key(&old) {
                continue;
            }

            if let Ok((_, signal)) = self.apply_delete(&old) {
                if let Some(signal) = signal {
                    signals.push((old.clone(), signal));
                }
                renamed_to.insert(domain.clone());
                info!(from = %old, to = %domain, "Rule renamed");
                summary.renamed += 1;
            }
        }

        let stale: Vec<Domain> = self
            .registry
            .domains()
            .filter(|domain| !desired.contains_key(*domain))
            .cloned()
            .collect();
        for domain in stale {
            if let Ok((_, signal)) = self.apply_delete(&domain) {
                if let Some(signal) = signal {
                    signals.push((domain, signal));
                }
                summary.removed += 1;
            }
        }

        for (domain, rule) in desired {
            let config = rule.config();
            if self.registry.contains(&domain) {
                match self.apply_update(&domain, config, now) {
                    Ok(Some(signal)) => {
                        signals.push((domain, signal));
                        summary.updated += 1;
                    }
                    Ok(None) => summary.updated += 1,
                    Err(e) => warn!(domain = %domain, error = %e, "Failed to update rule"),
                }
            } else {
                match self.apply_add(domain.clone(), config, now) {
                    Ok(_) if renamed_to.contains(&domain) => {}
                    Ok(_) => summary.added += 1,
                    Err(e) => warn!(domain = %domain, error = %e, "Failed to add rule"),
                }
            }
        }

        self.persist(WritePolicy::WriteThrough).await;
        for (domain, signal) in signals {
            self.notifier.notify(domain, signal);
        }

        info!(
            added = summary.added,
            updated = summary.updated,
            renamed = summary.renamed,
            removed = summary.removed,
            rejected = summary.rejected,
            "Watchlist replaced"
        );
        summary
    }

    /// Install rules from the config file, adding or updating each
    pub async fn apply_rules(&mut self, specs: &[RuleSpec], now: DateTime<Local>) -> usize {
        let mut signals = Signals::new();
        let mut applied = 0;

        for spec in specs {
            let result = if self.registry.contains(&spec.domain) {
                self.apply_update(&spec.domain, spec.config, now)
            } else {
                self.apply_add(spec.domain.clone(), spec.config, now).map(|_| None)
            };

            match result {
                Ok(signal) => {
                    applied += 1;
                    if let Some(signal) = signal {
                        signals.push((spec.domain.clone(), signal));
                    }
                }
                Err(e) => warn!(domain = %spec.domain, error = %e, "Skipping configured rule"),
            }
        }

        if applied > 0 {
            self.persist(WritePolicy::WriteThrough).await;
            for (domain, signal) in signals {
                self.notifier.notify(domain, signal);
            }
        }
        applied
    }

    /// Reset every rule whose reset condition holds and drop idle trackers
    pub async fn sweep(&mut self, now: DateTime<Local>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut signals = Signals::new();

        for rule in self.registry.all_mut() {
            if !reset_due(rule, now) {
                continue;
            }
            let was_blocked = rule.is_blocked;
            apply_reset(rule, now);
            self.tracker.forget(&rule.domain);
            report.reset += 1;

            if was_blocked {
                info!(domain = %rule.domain, "Reset condition met, unblocking");
                signals.push((rule.domain.clone(), PageSignal::Unblock));
                report.unblocked += 1;
            }
        }

        report.evicted = self.tracker.evict_idle(now);

        if report.reset > 0 {
            self.commit(signals).await;
        }

        debug!(
            reset = report.reset,
            unblocked = report.unblocked,
            evicted = report.evicted,
            "Sweep complete"
        );
        report
    }

    /// Drop every rule and start stats over
    pub async fn wipe(&mut self, now: DateTime<Local>) {
        let blocked: Vec<Domain> = self
            .registry
            .all()
            .filter(|rule| rule.is_blocked)
            .map(|rule| rule.domain.clone())
            .collect();

        self.registry.clear();
        self.tracker.clear();
        self.stats = Stats::new(now);

        info!(unblocked = blocked.len(), "All data cleared");

        self.persist(WritePolicy::WriteThrough).await;
        for domain in blocked {
            self.notifier.notify(domain, PageSignal::Unblock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use scrollwatch_api::SubscriberScope;
    use scrollwatch_store::{KvStore, MemoryStore, STORAGE_KEY};
    use std::sync::Arc;

    use crate::{Notification, Subscription};

    struct Harness {
        engine: RuleEngine,
        durable: Arc<MemoryStore>,
        events: Subscription,
    }

    async fn harness() -> Harness {
        let durable = Arc::new(MemoryStore::new());
        let store = BatchStore::new(Arc::new(MemoryStore::new()), durable.clone());
        let notifier = Notifier::default();
        let events = notifier.subscribe(SubscriberScope::Management);
        let engine = RuleEngine::new(store, notifier, EngineConfig::default()).await;
        Harness {
            engine,
            durable,
            events,
        }
    }

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn at(secs: f64) -> DateTime<Local> {
        t0() + TimeDelta::milliseconds((secs * 1000.0).round() as i64)
    }

    fn domain(s: &str) -> Domain {
        Domain::parse(s).unwrap()
    }

    fn quota(allowed: u64, reset: u64) -> RuleConfig {
        RuleConfig::new(allowed, reset, RuleMode::Quota)
    }

    fn cooldown(allowed: u64, reset: u64) -> RuleConfig {
        RuleConfig::new(allowed, reset, RuleMode::Cooldown)
    }

    fn durable_data(h: &Harness) -> StorageData {
        serde_json::from_str(&h.durable.peek(STORAGE_KEY).unwrap()).unwrap()
    }

    /// Ticks one second apart starting at `start`
    async fn tick_run(h: &mut Harness, d: &Domain, start: f64, count: usize) -> TickOutcome {
        let mut last = TickOutcome::Untracked;
        for i in 0..count {
            let t = at(start + i as f64);
            last = h.engine.process_tick(d, t, t).await;
        }
        last
    }

    #[tokio::test]
    async fn quota_blocks_then_resets_after_interval() {
        let mut h = harness().await;
        let d = domain("reddit.com");
        h.engine.add_rule(d.clone(), quota(5, 15), t0()).await.unwrap();

        let outcome = tick_run(&mut h, &d, 1.0, 5).await;
        assert_eq!(outcome, TickOutcome::Blocked { consumed_time: 5.0 });
        assert_eq!(
            h.events.try_recv(),
            Some(Notification {
                domain: d.clone(),
                signal: PageSignal::Block
            })
        );
        assert_eq!(h.engine.stats().total_blocks, 1);

        assert!(h.engine.check_status(&d, at(14.0)).await);
        assert!(!h.engine.check_status(&d, at(16.0)).await);

        let rule = h.engine.rule(&d).unwrap();
        assert_eq!(rule.consumed_time, 0.0);
        assert!(!rule.is_blocked);
        assert_eq!(rule.policy, ResetPolicy::Quota { last_reset: at(16.0) });
        assert_eq!(h.events.try_recv().unwrap().signal, PageSignal::Unblock);
    }

    #[tokio::test]
    async fn cooldown_blocks_until_interval_after_block() {
        let mut h = harness().await;
        let d = domain("reddit.com");
        h.engine.add_rule(d.clone(), cooldown(5, 15), t0()).await.unwrap();

        tick_run(&mut h, &d, 1.0, 5).await;
        let blocked_at = at(5.0);
        assert_eq!(
            h.engine.rule(&d).unwrap().policy,
            ResetPolicy::Cooldown {
                block_start_time: Some(blocked_at)
            }
        );

        assert!(h.engine.check_status(&d, at(19.0)).await);
        assert!(!h.engine.check_status(&d, at(21.0)).await);
        assert_eq!(
            h.engine.rule(&d).unwrap().policy,
            ResetPolicy::Cooldown {
                block_start_time: None
            }
        );
    }

    #[tokio::test]
    async fn cooldown_clock_does_not_run_while_unblocked() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), cooldown(5, 15), t0()).await.unwrap();

        tick_run(&mut h, &d, 1.0, 3).await;
        h.engine.sweep(at(3600.0)).await;

        assert_eq!(h.engine.rule(&d).unwrap().consumed_time, 3.0);
    }

    #[tokio::test]
    async fn debounced_ticks_credit_once() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(60, 600), t0()).await.unwrap();

        h.engine.process_tick(&d, at(1.0), at(1.0)).await;
        assert_eq!(h.engine.process_tick(&d, at(1.5), at(1.5)).await, TickOutcome::Debounced);
        assert_eq!(h.engine.rule(&d).unwrap().consumed_time, 1.0);
    }

    #[tokio::test]
    async fn consumption_is_sum_of_capped_credits() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(600, 3600), t0()).await.unwrap();

        // first tick 1, then 2, 5 (capped from 40), 0.8
        for secs in [1.0, 3.0, 43.0, 43.8] {
            h.engine.process_tick(&d, at(secs), at(secs)).await;
        }
        let consumed = h.engine.rule(&d).unwrap().consumed_time;
        assert!((consumed - 8.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn never_blocks_below_allowance() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(10, 3600), t0()).await.unwrap();

        for i in 1..=9 {
            let outcome = h.engine.process_tick(&d, at(i as f64), at(i as f64)).await;
            assert!(matches!(outcome, TickOutcome::Accrued { .. }));
        }
        assert!(!h.engine.rule(&d).unwrap().is_blocked);

        let outcome = h.engine.process_tick(&d, at(10.0), at(10.0)).await;
        assert_eq!(outcome, TickOutcome::Blocked { consumed_time: 10.0 });
    }

    #[tokio::test]
    async fn blocked_rule_ignores_ticks() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(2, 3600), t0()).await.unwrap();

        tick_run(&mut h, &d, 1.0, 2).await;
        assert_eq!(h.engine.process_tick(&d, at(3.0), at(3.0)).await, TickOutcome::AlreadyBlocked);
        assert_eq!(h.engine.rule(&d).unwrap().consumed_time, 2.0);
        assert_eq!(h.engine.stats().total_blocks, 1);
    }

    #[tokio::test]
    async fn future_tick_does_not_lift_block() {
        let mut h = harness().await;
        let q = domain("quota.com");
        let c = domain("cooldown.com");
        h.engine.add_rule(q.clone(), quota(5, 3600), t0()).await.unwrap();
        h.engine.add_rule(c.clone(), cooldown(5, 60), t0()).await.unwrap();
        tick_run(&mut h, &q, 1.0, 5).await;
        tick_run(&mut h, &c, 1.0, 5).await;

        // Observer clock hours ahead of the service clock
        let outcome = h.engine.process_tick(&q, at(7200.0), at(6.0)).await;
        assert_eq!(outcome, TickOutcome::AlreadyBlocked);
        let outcome = h.engine.process_tick(&c, at(3600.0), at(6.0)).await;
        assert_eq!(outcome, TickOutcome::AlreadyBlocked);

        let rule = h.engine.rule(&q).unwrap();
        assert!(rule.is_blocked);
        assert_eq!(rule.consumed_time, 5.0);
        assert_eq!(rule.policy, ResetPolicy::Quota { last_reset: t0() });
        assert!(h.engine.check_status(&q, at(7.0)).await);

        let rule = h.engine.rule(&c).unwrap();
        assert!(rule.is_blocked);
        assert_eq!(
            rule.policy,
            ResetPolicy::Cooldown {
                block_start_time: Some(at(5.0))
            }
        );
        assert!(h.engine.check_status(&c, at(7.0)).await);
    }

    #[tokio::test]
    async fn cooldown_block_starts_at_service_time() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), cooldown(2, 60), t0()).await.unwrap();

        h.engine.process_tick(&d, at(1.0), at(1.0)).await;
        let outcome = h.engine.process_tick(&d, at(3601.0), at(2.0)).await;

        // One capped credit, block clock on the service side
        assert_eq!(outcome, TickOutcome::Blocked { consumed_time: 6.0 });
        assert_eq!(
            h.engine.rule(&d).unwrap().policy,
            ResetPolicy::Cooldown {
                block_start_time: Some(at(2.0))
            }
        );
        assert!(h.engine.check_status(&d, at(61.0)).await);
        assert!(!h.engine.check_status(&d, at(63.0)).await);
    }

    #[tokio::test]
    async fn skewed_ticks_credit_at_most_one_capped_interval() {
        let mut h = harness().await;
        let ahead = domain("ahead.com");
        let behind = domain("behind.com");
        h.engine.add_rule(ahead.clone(), quota(60, 3600), t0()).await.unwrap();
        h.engine.add_rule(behind.clone(), quota(60, 3600), t0()).await.unwrap();
        tick_run(&mut h, &ahead, 1.0, 3).await;
        tick_run(&mut h, &behind, 1.0, 3).await;

        // Far ahead: capped credit, no quota rollover
        let outcome = h.engine.process_tick(&ahead, at(7200.0), at(4.0)).await;
        assert_eq!(outcome, TickOutcome::Accrued { consumed_time: 8.0 });
        let outcome = h.engine.process_tick(&ahead, at(5.0), at(5.0)).await;
        assert_eq!(outcome, TickOutcome::Reanchored);
        let outcome = h.engine.process_tick(&ahead, at(6.0), at(6.0)).await;
        assert_eq!(outcome, TickOutcome::Accrued { consumed_time: 9.0 });

        // Far behind: re-anchored, then one capped credit on recovery
        let outcome = h.engine.process_tick(&behind, at(-7200.0), at(4.0)).await;
        assert_eq!(outcome, TickOutcome::Reanchored);
        let outcome = h.engine.process_tick(&behind, at(5.0), at(5.0)).await;
        assert_eq!(outcome, TickOutcome::Accrued { consumed_time: 8.0 });

        for d in [&ahead, &behind] {
            let rule = h.engine.rule(d).unwrap();
            assert!(!rule.is_blocked);
            assert_eq!(rule.policy, ResetPolicy::Quota { last_reset: t0() });
        }
        assert!(h.events.try_recv().is_none());
    }

    #[tokio::test]
    async fn unknown_domain_is_a_no_op() {
        let mut h = harness().await;
        let d = domain("nowhere.com");

        assert_eq!(h.engine.process_tick(&d, at(1.0), at(1.0)).await, TickOutcome::Untracked);
        assert!(!h.engine.check_status(&d, at(1.0)).await);
        assert!(h.engine.rules().next().is_none());
    }

    #[tokio::test]
    async fn block_is_durable_before_notification() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(1, 3600), t0()).await.unwrap();

        h.engine.process_tick(&d, at(1.0), at(1.0)).await;
        assert!(h.events.try_recv().is_some());

        let stored = durable_data(&h);
        assert!(stored.watchlist[&d].is_blocked);
        assert_eq!(stored.stats.total_blocks, 1);
    }

    #[tokio::test]
    async fn plain_ticks_are_write_back() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(60, 3600), t0()).await.unwrap();
        let writes = h.durable.write_count();

        tick_run(&mut h, &d, 1.0, 3).await;
        assert_eq!(h.durable.write_count(), writes);
        assert!(h.engine.store().is_dirty());

        h.engine.store().flush().await;
        assert_eq!(durable_data(&h).watchlist[&d].consumed_time, 3.0);
    }

    #[tokio::test]
    async fn check_status_is_idempotent_when_unblocked() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(60, 15), t0()).await.unwrap();
        tick_run(&mut h, &d, 1.0, 3).await;

        let before = h.engine.rule(&d).unwrap().clone();
        assert!(!h.engine.check_status(&d, at(100.0)).await);
        assert!(!h.engine.check_status(&d, at(100.0)).await);
        assert_eq!(h.engine.rule(&d).unwrap(), &before);
    }

    #[tokio::test]
    async fn tick_rolls_quota_cycle_over() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(60, 15), t0()).await.unwrap();
        tick_run(&mut h, &d, 1.0, 3).await;

        h.engine.process_tick(&d, at(15.0), at(15.0)).await;
        let rule = h.engine.rule(&d).unwrap();
        assert_eq!(rule.consumed_time, 1.0);
        assert_eq!(rule.policy, ResetPolicy::Quota { last_reset: at(15.0) });
        assert!(h.events.try_recv().is_none());
    }

    #[tokio::test]
    async fn tick_after_cooldown_unblocks_and_counts() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), cooldown(2, 10), t0()).await.unwrap();
        tick_run(&mut h, &d, 1.0, 2).await;
        h.events.try_recv();

        let outcome = h.engine.process_tick(&d, at(12.0), at(12.0)).await;
        assert_eq!(outcome, TickOutcome::Accrued { consumed_time: 1.0 });
        assert_eq!(h.events.try_recv().unwrap().signal, PageSignal::Unblock);
    }

    #[tokio::test]
    async fn raising_allowance_unblocks() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(5, 3600), t0()).await.unwrap();
        tick_run(&mut h, &d, 1.0, 5).await;
        h.events.try_recv();

        h.engine.update_rule(&d, quota(10, 3600), at(6.0)).await.unwrap();

        let rule = h.engine.rule(&d).unwrap();
        assert!(!rule.is_blocked);
        assert_eq!(rule.consumed_time, 5.0);
        assert_eq!(h.events.try_recv().unwrap().signal, PageSignal::Unblock);
        assert!(!durable_data(&h).watchlist[&d].is_blocked);
    }

    #[tokio::test]
    async fn lowering_allowance_blocks() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), cooldown(60, 600), t0()).await.unwrap();
        tick_run(&mut h, &d, 1.0, 5).await;

        h.engine.update_rule(&d, cooldown(3, 600), at(6.0)).await.unwrap();

        let rule = h.engine.rule(&d).unwrap();
        assert!(rule.is_blocked);
        assert_eq!(
            rule.policy,
            ResetPolicy::Cooldown {
                block_start_time: Some(at(6.0))
            }
        );
        assert_eq!(h.engine.stats().total_blocks, 1);
        assert_eq!(h.events.try_recv().unwrap().signal, PageSignal::Block);
    }

    #[tokio::test]
    async fn mode_switch_rederives_timestamps() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(2, 600), t0()).await.unwrap();
        tick_run(&mut h, &d, 1.0, 2).await;

        h.engine.update_rule(&d, cooldown(2, 600), at(10.0)).await.unwrap();
        assert_eq!(
            h.engine.rule(&d).unwrap().policy,
            ResetPolicy::Cooldown {
                block_start_time: Some(at(10.0))
            }
        );

        h.engine.update_rule(&d, quota(2, 600), at(20.0)).await.unwrap();
        let rule = h.engine.rule(&d).unwrap();
        assert_eq!(rule.policy, ResetPolicy::Quota { last_reset: at(20.0) });
        assert!(rule.is_blocked);
        assert_eq!(h.engine.stats().total_blocks, 1);
    }

    #[tokio::test]
    async fn delete_mid_cycle() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(60, 600), t0()).await.unwrap();
        tick_run(&mut h, &d, 1.0, 3).await;

        h.engine.delete_rule(&d).await.unwrap();

        assert_eq!(h.engine.process_tick(&d, at(5.0), at(5.0)).await, TickOutcome::Untracked);
        assert!(!h.engine.check_status(&d, at(5.0)).await);
        assert!(durable_data(&h).watchlist.is_empty());
        assert_eq!(h.engine.tracked_domains(), 0);
    }

    #[tokio::test]
    async fn deleting_blocked_rule_unblocks_observers() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(1, 600), t0()).await.unwrap();
        h.engine.process_tick(&d, at(1.0), at(1.0)).await;
        h.events.try_recv();

        h.engine.delete_rule(&d).await.unwrap();
        assert_eq!(h.events.try_recv().unwrap().signal, PageSignal::Unblock);
    }

    #[tokio::test]
    async fn add_and_delete_errors() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(60, 600), t0()).await.unwrap();

        assert!(matches!(
            h.engine.add_rule(d.clone(), quota(60, 600), t0()).await,
            Err(WatchError::RuleExists(_))
        ));
        assert!(matches!(
            h.engine.add_rule(domain("b.com"), quota(0, 600), t0()).await,
            Err(WatchError::ValidationError(_))
        ));
        assert!(matches!(
            h.engine.delete_rule(&domain("b.com")).await,
            Err(WatchError::RuleNotFound(_))
        ));
        assert!(matches!(
            h.engine.update_rule(&domain("b.com"), quota(1, 1), t0()).await,
            Err(WatchError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rename_starts_fresh() {
        let mut h = harness().await;
        let old = domain("old.com");
        let new = domain("new.com");
        let old_id = h.engine.add_rule(old.clone(), quota(60, 600), t0()).await.unwrap();
        tick_run(&mut h, &old, 1.0, 3).await;

        let new_id = h
            .engine
            .rename_rule(&old, new.clone(), quota(30, 600), at(5.0))
            .await
            .unwrap();

        assert_ne!(old_id, new_id);
        assert!(h.engine.rule(&old).is_none());
        let rule = h.engine.rule(&new).unwrap();
        assert_eq!(rule.consumed_time, 0.0);
        assert_eq!(rule.allowed_duration, 30);
    }

    #[tokio::test]
    async fn rename_onto_existing_domain_fails() {
        let mut h = harness().await;
        h.engine.add_rule(domain("a.com"), quota(60, 600), t0()).await.unwrap();
        h.engine.add_rule(domain("b.com"), quota(60, 600), t0()).await.unwrap();

        let result = h
            .engine
            .rename_rule(&domain("a.com"), domain("b.com"), quota(60, 600), t0())
            .await;
        assert!(matches!(result, Err(WatchError::RuleExists(_))));
        assert!(h.engine.rule(&domain("a.com")).is_some());
    }

    #[tokio::test]
    async fn replace_watchlist_reconciles() {
        let mut h = harness().await;
        let keep = domain("keep.com");
        let drop = domain("drop.com");
        let old = domain("old.com");
        h.engine.add_rule(keep.clone(), quota(60, 600), t0()).await.unwrap();
        h.engine.add_rule(drop.clone(), quota(60, 600), t0()).await.unwrap();
        h.engine.add_rule(old.clone(), quota(60, 600), t0()).await.unwrap();
        tick_run(&mut h, &keep, 1.0, 3).await;

        let mut kept = h.engine.rule(&keep).unwrap().clone();
        kept.allowed_duration = 120;
        kept.consumed_time = 999.0;
        kept.is_blocked = true;

        let mut renamed = h.engine.rule(&old).unwrap().clone();
        renamed.domain = domain("renamed.com");

        let added = Rule::new(domain("fresh.com"), cooldown(10, 60), t0());

        let mut incoming = BTreeMap::new();
        incoming.insert("https://www.Keep.com/feed".to_string(), kept);
        incoming.insert("renamed.com".to_string(), renamed);
        incoming.insert("fresh.com".to_string(), added);
        incoming.insert("not a domain".to_string(), Rule::new(domain("x.com"), quota(1, 1), t0()));

        let summary = h.engine.replace_watchlist(incoming, at(10.0)).await;
        assert_eq!(
            summary,
            ReconcileSummary {
                added: 1,
                updated: 1,
                renamed: 1,
                removed: 1,
                rejected: 1,
            }
        );

        let rule = h.engine.rule(&keep).unwrap();
        assert_eq!(rule.allowed_duration, 120);
        assert_eq!(rule.consumed_time, 3.0);
        assert!(!rule.is_blocked);

        assert!(h.engine.rule(&drop).is_none());
        assert!(h.engine.rule(&old).is_none());
        assert!(h.engine.rule(&domain("renamed.com")).is_some());
        assert_eq!(h.engine.rule(&domain("fresh.com")).unwrap().mode(), RuleMode::Cooldown);
        assert_eq!(durable_data(&h).watchlist.len(), 3);
    }

    #[tokio::test]
    async fn sweep_resets_without_double_counting() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), cooldown(2, 10), t0()).await.unwrap();
        tick_run(&mut h, &d, 1.0, 2).await;
        h.events.try_recv();

        let report = h.engine.sweep(at(20.0)).await;
        assert_eq!(report.reset, 1);
        assert_eq!(report.unblocked, 1);
        assert_eq!(h.events.try_recv().unwrap().signal, PageSignal::Unblock);

        assert!(!h.engine.check_status(&d, at(21.0)).await);
        assert_eq!(h.engine.sweep(at(22.0)).await.reset, 0);
        assert!(h.events.try_recv().is_none());
        assert_eq!(h.engine.stats().total_blocks, 1);
    }

    #[tokio::test]
    async fn sweep_evicts_idle_trackers() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(600, 3600), t0()).await.unwrap();
        h.engine.process_tick(&d, at(1.0), at(1.0)).await;
        assert_eq!(h.engine.tracked_domains(), 1);

        let report = h.engine.sweep(at(1200.0)).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(h.engine.tracked_domains(), 0);
    }

    #[tokio::test]
    async fn wipe_clears_everything() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(1, 600), t0()).await.unwrap();
        h.engine.process_tick(&d, at(1.0), at(1.0)).await;
        h.events.try_recv();

        h.engine.wipe(at(5.0)).await;

        assert!(h.engine.rules().next().is_none());
        assert_eq!(*h.engine.stats(), Stats::new(at(5.0)));
        assert_eq!(h.events.try_recv().unwrap().signal, PageSignal::Unblock);
        assert!(durable_data(&h).watchlist.is_empty());
    }

    #[tokio::test]
    async fn apply_rules_adds_and_updates() {
        let mut h = harness().await;
        let d = domain("a.com");
        h.engine.add_rule(d.clone(), quota(60, 600), t0()).await.unwrap();

        let specs = vec![
            RuleSpec {
                domain: d.clone(),
                config: quota(90, 600),
            },
            RuleSpec {
                domain: domain("b.com"),
                config: cooldown(30, 300),
            },
        ];
        assert_eq!(h.engine.apply_rules(&specs, t0()).await, 2);
        assert_eq!(h.engine.rule(&d).unwrap().allowed_duration, 90);
        assert!(h.engine.rule(&domain("b.com")).is_some());
    }

    #[tokio::test]
    async fn load_repairs_blocked_cooldown_without_start() {
        let fast = Arc::new(MemoryStore::new());
        let d = domain("a.com");
        let mut data = StorageData::fresh(t0());
        let mut rule = Rule::new(d.clone(), cooldown(5, 60), t0());
        rule.is_blocked = true;
        rule.consumed_time = 5.0;
        data.watchlist.insert(d.clone(), rule);
        fast.set(STORAGE_KEY, serde_json::to_string(&data).unwrap())
            .await
            .unwrap();

        let store = BatchStore::new(fast, Arc::new(MemoryStore::new()));
        let engine = RuleEngine::new(store, Notifier::default(), EngineConfig::default()).await;

        let rule = engine.rule(&d).unwrap();
        assert!(matches!(
            rule.policy,
            ResetPolicy::Cooldown {
                block_start_time: Some(_)
            }
        ));
        assert!(rule.is_blocked);
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let fast = Arc::new(MemoryStore::new());
        let durable = Arc::new(MemoryStore::new());
        let d = domain("a.com");

        {
            let store = BatchStore::new(fast.clone(), durable.clone());
            let mut engine =
                RuleEngine::new(store, Notifier::default(), EngineConfig::default()).await;
            engine.add_rule(d.clone(), quota(60, 3600), t0()).await.unwrap();
            engine.process_tick(&d, at(1.0), at(1.0)).await;
            engine.process_tick(&d, at(2.0), at(2.0)).await;
            engine.store().shutdown().await;
        }

        let store = BatchStore::new(Arc::new(MemoryStore::new()), durable);
        let engine = RuleEngine::new(store, Notifier::default(), EngineConfig::default()).await;
        assert_eq!(engine.rule(&d).unwrap().consumed_time, 2.0);
    }
}
