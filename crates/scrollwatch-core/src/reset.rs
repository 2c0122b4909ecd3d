//! Reset policy evaluation

use chrono::{DateTime, Local};
use scrollwatch_api::{ResetPolicy, Rule};
use scrollwatch_util::has_elapsed;

/// Whether the rule's reset condition holds at `now`.
///
/// Quota rules roll over once a full interval has passed since the cycle
/// began, blocked or not. Cooldown rules only reset while blocked, once the
/// interval has passed since blocking began.
pub fn reset_due(rule: &Rule, now: DateTime<Local>) -> bool {
    match rule.policy {
        ResetPolicy::Quota { last_reset } => has_elapsed(last_reset, now, rule.reset_interval),
        ResetPolicy::Cooldown {
            block_start_time: Some(start),
        } => rule.is_blocked && has_elapsed(start, now, rule.reset_interval),
        ResetPolicy::Cooldown {
            block_start_time: None,
        } => false,
    }
}

/// Start a new cycle: zero consumption, unblocked, fresh policy timestamps
pub fn apply_reset(rule: &mut Rule, now: DateTime<Local>) {
    rule.consumed_time = 0.0;
    rule.is_blocked = false;
    rule.policy = ResetPolicy::fresh(rule.mode(), now);
}

/// Fix persisted records that violate the rule invariants.
///
/// Returns whether anything changed.
pub fn repair(rule: &mut Rule, now: DateTime<Local>) -> bool {
    let mut changed = false;

    if !rule.consumed_time.is_finite() || rule.consumed_time < 0.0 {
        rule.consumed_time = 0.0;
        changed = true;
    }

    match &mut rule.policy {
        ResetPolicy::Quota { last_reset } => {
            if *last_reset > now {
                *last_reset = now;
                changed = true;
            }
        }
        ResetPolicy::Cooldown { block_start_time } => match (rule.is_blocked, *block_start_time) {
            (true, None) => {
                *block_start_time = Some(now);
                changed = true;
            }
            (true, Some(start)) if start > now => {
                *block_start_time = Some(now);
                changed = true;
            }
            (false, Some(_)) => {
                *block_start_time = None;
                changed = true;
            }
            _ => {}
        },
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use scrollwatch_api::{RuleConfig, RuleMode};
    use scrollwatch_util::Domain;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn secs(s: i64) -> DateTime<Local> {
        t0() + TimeDelta::seconds(s)
    }

    fn rule(mode: RuleMode) -> Rule {
        Rule::new(
            Domain::parse("a.com").unwrap(),
            RuleConfig::new(5, 15, mode),
            t0(),
        )
    }

    #[test]
    fn quota_resets_at_interval_regardless_of_block() {
        let mut rule = rule(RuleMode::Quota);
        assert!(!reset_due(&rule, secs(14)));
        assert!(reset_due(&rule, secs(15)));

        rule.is_blocked = true;
        assert!(!reset_due(&rule, secs(14)));
        assert!(reset_due(&rule, secs(15)));
    }

    #[test]
    fn cooldown_resets_only_when_blocked() {
        let mut rule = rule(RuleMode::Cooldown);
        assert!(!reset_due(&rule, secs(1000)));

        rule.is_blocked = true;
        rule.policy = ResetPolicy::Cooldown {
            block_start_time: Some(secs(5)),
        };
        assert!(!reset_due(&rule, secs(19)));
        assert!(reset_due(&rule, secs(20)));
    }

    #[test]
    fn reset_clears_state() {
        let mut rule = rule(RuleMode::Cooldown);
        rule.consumed_time = 5.0;
        rule.is_blocked = true;
        rule.policy = ResetPolicy::Cooldown {
            block_start_time: Some(secs(5)),
        };

        apply_reset(&mut rule, secs(20));
        assert_eq!(rule.consumed_time, 0.0);
        assert!(!rule.is_blocked);
        assert_eq!(
            rule.policy,
            ResetPolicy::Cooldown {
                block_start_time: None
            }
        );

        let mut quota = self::rule(RuleMode::Quota);
        apply_reset(&mut quota, secs(20));
        assert_eq!(quota.policy, ResetPolicy::Quota { last_reset: secs(20) });
    }

    #[test]
    fn repair_fills_missing_block_start() {
        let mut rule = rule(RuleMode::Cooldown);
        rule.is_blocked = true;

        assert!(repair(&mut rule, secs(30)));
        assert_eq!(
            rule.policy,
            ResetPolicy::Cooldown {
                block_start_time: Some(secs(30))
            }
        );
        assert!(!repair(&mut rule, secs(31)));
    }

    #[test]
    fn repair_clamps_future_and_negative_values() {
        let mut rule = rule(RuleMode::Quota);
        rule.policy = ResetPolicy::Quota {
            last_reset: secs(3600),
        };
        rule.consumed_time = -2.0;

        assert!(repair(&mut rule, secs(0)));
        assert_eq!(rule.policy, ResetPolicy::Quota { last_reset: secs(0) });
        assert_eq!(rule.consumed_time, 0.0);
    }
}
