//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (role routes reference existing segments)
//! - Validate value ranges (thresholds >= 1, rates > 0, percentages)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{
    CircuitBreakerConfig, PoolConfig, RateLimitConfig, ResilienceConfig, RetryConfig,
    TokenBucketConfig,
};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be at least {min}, got {value}")]
    TooSmall {
        field: String,
        min: u64,
        value: u64,
    },

    #[error("{field} must be a positive finite number, got {value}")]
    NotPositive { field: String, value: f64 },

    #[error("{field} must be in (0, 100], got {value}")]
    BadPercentage { field: String, value: f64 },

    #[error("retry.base_delay_ms ({base}) exceeds retry.max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },

    #[error("pool has no segments")]
    NoSegments,

    #[error("{field} references unknown segment '{segment}'")]
    UnknownSegment { field: String, segment: String },
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_breaker(&config.circuit_breaker, &mut errors);
    check_retry(&config.retry, &mut errors);
    check_rate_limit(&config.rate_limit, &mut errors);
    check_pool(&config.pool, &mut errors);

    if config.reporter.enabled && config.reporter.interval_secs == 0 {
        errors.push(ValidationError::TooSmall {
            field: "reporter.interval_secs".into(),
            min: 1,
            value: 0,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn at_least(field: &str, value: u64, min: u64, errors: &mut Vec<ValidationError>) {
    if value < min {
        errors.push(ValidationError::TooSmall {
            field: field.to_string(),
            min,
            value,
        });
    }
}

fn positive(field: &str, value: f64, errors: &mut Vec<ValidationError>) {
    if !(value.is_finite() && value > 0.0) {
        errors.push(ValidationError::NotPositive {
            field: field.to_string(),
            value,
        });
    }
}

fn check_breaker(cb: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    at_least("circuit_breaker.failure_threshold", cb.failure_threshold.into(), 1, errors);
    at_least("circuit_breaker.success_threshold", cb.success_threshold.into(), 1, errors);
    at_least("circuit_breaker.failure_window_secs", cb.failure_window_secs, 1, errors);
}

fn check_retry(retry: &RetryConfig, errors: &mut Vec<ValidationError>) {
    at_least("retry.max_attempts", retry.max_attempts.into(), 1, errors);
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            base: retry.base_delay_ms,
            max: retry.max_delay_ms,
        });
    }
}

fn check_bucket(prefix: &str, bucket: &TokenBucketConfig, errors: &mut Vec<ValidationError>) {
    positive(&format!("{prefix}.capacity"), bucket.capacity, errors);
    positive(&format!("{prefix}.refill_rate_per_second"), bucket.refill_rate_per_second, errors);
}

fn check_rate_limit(rl: &RateLimitConfig, errors: &mut Vec<ValidationError>) {
    check_bucket("rate_limit.default", &rl.default, errors);
    for (name, bucket) in &rl.namespaces {
        check_bucket(&format!("rate_limit.namespaces.{name}"), bucket, errors);
    }
}

fn check_pool(pool: &PoolConfig, errors: &mut Vec<ValidationError>) {
    if pool.segments.is_empty() {
        errors.push(ValidationError::NoSegments);
        return;
    }

    for (name, segment) in &pool.segments {
        at_least(
            &format!("pool.segments.{name}.max_connections"),
            segment.max_connections as u64,
            1,
            errors,
        );
        let pct = segment.warning_threshold_pct;
        if !(pct > 0.0 && pct <= 100.0) {
            errors.push(ValidationError::BadPercentage {
                field: format!("pool.segments.{name}.warning_threshold_pct"),
                value: pct,
            });
        }
    }

    if !pool.segments.contains_key(&pool.default_segment) {
        errors.push(ValidationError::UnknownSegment {
            field: "pool.default_segment".into(),
            segment: pool.default_segment.clone(),
        });
    }
    for (role, segment) in &pool.role_routes {
        if !pool.segments.contains_key(segment) {
            errors.push(ValidationError::UnknownSegment {
                field: format!("pool.role_routes.{role}"),
                segment: segment.clone(),
            });
        }
    }
}
