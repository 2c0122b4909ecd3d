//! Time utilities for scrollwatch
//!
//! Reset windows and block times are measured on the service's own clock,
//! from [`now`]. Observer tick timestamps only measure the spacing between
//! ticks of one domain.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `SCROLLWATCH_MOCK_TIME` environment variable can be set
//! to shift the clock used by [`now`]. Mock time advances at the real rate from
//! the configured starting point.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone};
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "SCROLLWATCH_MOCK_TIME";

/// Offset between mock time and real time, computed once per process.
static MOCK_TIME_OFFSET: OnceLock<Option<TimeDelta>> = OnceLock::new();

fn mock_time_offset() -> Option<TimeDelta> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            match parse_mock_time(&raw) {
                Some(mock) => {
                    let offset = mock.signed_duration_since(Local::now());
                    tracing::info!(
                        mock_time = %raw,
                        offset_secs = offset.num_seconds(),
                        "Mock time enabled"
                    );
                    Some(offset)
                }
                None => {
                    tracing::warn!(
                        mock_time = %raw,
                        expected_format = "%Y-%m-%d %H:%M:%S",
                        "Invalid mock time, using real clock"
                    );
                    None
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn parse_mock_time(raw: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    Local.from_local_datetime(&naive).single()
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    mock_time_offset().is_some()
}

/// Current local time, respecting mock time in debug builds.
pub fn now() -> DateTime<Local> {
    let real_now = Local::now();
    match mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Signed seconds from `earlier` to `later`, with millisecond resolution.
///
/// Negative when `later` precedes `earlier`.
pub fn seconds_between(earlier: DateTime<Local>, later: DateTime<Local>) -> f64 {
    later.signed_duration_since(earlier).num_milliseconds() as f64 / 1000.0
}

/// Whether at least `secs` seconds separate `since` and `now`.
pub fn has_elapsed(since: DateTime<Local>, now: DateTime<Local>, secs: u64) -> bool {
    now.signed_duration_since(since) >= delta_from_secs(secs)
}

/// Convert whole seconds to a chrono delta, saturating at the maximum.
pub fn delta_from_secs(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}
