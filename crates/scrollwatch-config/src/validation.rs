//! Configuration validation

use crate::schema::{RawConfig, RawRule, RawServiceConfig};
use scrollwatch_api::MAX_DURATION_SECS;
use scrollwatch_util::Domain;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Rule '{domain}': {message}")]
    RuleError { domain: String, message: String },

    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),

    #[error("Duplicate rule for domain: {0}")]
    DuplicateDomain(String),

    #[error("Service config error: {0}")]
    ServiceError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_service(&config.service);

    // Duplicates are judged after normalization: "www.x.com" and "x.com" collide
    let mut seen = HashSet::new();
    for rule in &config.rules {
        match Domain::parse(&rule.domain) {
            Some(domain) => {
                if !seen.insert(domain.clone()) {
                    errors.push(ValidationError::DuplicateDomain(domain.to_string()));
                }
            }
            None => errors.push(ValidationError::InvalidDomain(rule.domain.clone())),
        }

        errors.extend(validate_rule(rule));
    }

    errors
}

fn validate_rule(rule: &RawRule) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut fail = |message: String| {
        errors.push(ValidationError::RuleError {
            domain: rule.domain.clone(),
            message,
        })
    };

    if rule.allowed_seconds == 0 {
        fail("allowed_seconds must be positive".into());
    }
    if rule.reset_seconds == 0 {
        fail("reset_seconds must be positive".into());
    }
    if rule.allowed_seconds > MAX_DURATION_SECS {
        fail(format!("allowed_seconds exceeds {MAX_DURATION_SECS}"));
    }
    if rule.reset_seconds > MAX_DURATION_SECS {
        fail(format!("reset_seconds exceeds {MAX_DURATION_SECS}"));
    }

    errors
}

fn validate_service(service: &RawServiceConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let positive = [
        ("flush_interval_seconds", service.flush_interval_seconds),
        ("sweep_interval_seconds", service.sweep_interval_seconds),
        ("max_tick_elapsed_seconds", service.max_tick_elapsed_seconds),
        ("tracker_ttl_seconds", service.tracker_ttl_seconds),
        ("max_tracked_domains", service.max_tracked_domains.map(|n| n as u64)),
    ];
    for (name, value) in positive {
        if value == Some(0) {
            errors.push(ValidationError::ServiceError(format!(
                "{name} must be positive"
            )));
        }
    }

    let cap_ms = service
        .max_tick_elapsed_seconds
        .unwrap_or(crate::DEFAULT_MAX_TICK_ELAPSED_SECS)
        .saturating_mul(1000);

    if let Some(spacing_ms) = service.min_tick_spacing_ms
        && spacing_ms >= cap_ms
    {
        errors.push(ValidationError::ServiceError(format!(
            "min_tick_spacing_ms ({spacing_ms}) must be below the tick elapsed cap ({cap_ms} ms)"
        )));
    }

    if let Some(first) = service.first_tick_seconds
        && first.saturating_mul(1000) > cap_ms
    {
        errors.push(ValidationError::ServiceError(format!(
            "first_tick_seconds ({first}) must not exceed the tick elapsed cap"
        )));
    }

    errors
}
