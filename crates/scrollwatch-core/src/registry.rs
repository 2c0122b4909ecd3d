//! In-memory rule working set

use scrollwatch_api::{Rule, Watchlist};
use scrollwatch_util::{Domain, RuleId};
use std::collections::BTreeMap;
use tracing::warn;

/// Mapping of normalized domain to rule.
///
/// Iteration is sorted by domain. Only the engine mutates it.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<Domain, Rule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a persisted watchlist, re-normalizing every key.
    ///
    /// Entries whose key no longer normalizes are dropped.
    pub fn from_watchlist(watchlist: Watchlist) -> Self {
        let mut rules = BTreeMap::new();
        for (key, mut rule) in watchlist {
            let Some(domain) = Domain::parse(key.as_str()) else {
                warn!(key = %key, "Dropping stored rule with malformed domain");
                continue;
            };
            rule.domain = domain.clone();
            rules.insert(domain, rule);
        }
        Self { rules }
    }

    pub fn to_watchlist(&self) -> Watchlist {
        self.rules.clone()
    }

    pub fn get(&self, domain: &Domain) -> Option<&Rule> {
        self.rules.get(domain)
    }

    pub fn get_mut(&mut self, domain: &Domain) -> Option<&mut Rule> {
        self.rules.get_mut(domain)
    }

    pub fn contains(&self, domain: &Domain) -> bool {
        self.rules.contains_key(domain)
    }

    /// Insert or replace the rule for `domain`, returning the previous one
    pub fn upsert(&mut self, domain: Domain, mut rule: Rule) -> Option<Rule> {
        rule.domain = domain.clone();
        self.rules.insert(domain, rule)
    }

    pub fn remove(&mut self, domain: &Domain) -> Option<Rule> {
        self.rules.remove(domain)
    }

    pub fn all(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut Rule> {
        self.rules.values_mut()
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.rules.keys()
    }

    /// Find a rule by its id, whatever domain it is filed under
    pub fn find_by_id(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.values().find(|rule| &rule.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }
}
