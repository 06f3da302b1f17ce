//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience core. All types derive Serde traits for deserialization from
//! config files, and every field has a default so minimal configs work.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::guidance::FallbackGuidance;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Defaults applied to breakers created through the registry.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Default retry policy.
    pub retry: RetryConfig,

    /// Token bucket limits per namespace.
    pub rate_limit: RateLimitConfig,

    /// Connection pool segments and role routing.
    pub pool: PoolConfig,

    /// Degradation threshold and fallback guidance table.
    pub degradation: DegradationConfig,

    /// Periodic health reporter.
    pub reporter: ReporterConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Circuit breaker configuration. Fixed once a breaker is created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,

    /// Trailing window for counting failures, in seconds.
    pub failure_window_secs: u64,

    /// Time an open circuit waits before probing, in seconds.
    pub half_open_timeout_secs: u64,

    /// Half-open successes required to close the circuit.
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    pub fn half_open_timeout(&self) -> Duration {
        Duration::from_secs(self.half_open_timeout_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            failure_window_secs: 60,
            half_open_timeout_secs: 30,
            success_threshold: 3,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Replace the computed delay with a uniform draw from `[0, delay]`.
    pub jitter_full: bool,

    /// HTTP statuses that make a failure retryable.
    pub retryable_statuses: BTreeSet<u16>,

    /// Error codes (e.g. socket errors) that make a failure retryable.
    pub retryable_error_codes: BTreeSet<String>,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1600,
            jitter_full: true,
            retryable_statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            retryable_error_codes: ["ECONNRESET", "ECONNREFUSED", "ETIMEDOUT", "EPIPE"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TokenBucketConfig {
    /// Maximum tokens held.
    pub capacity: f64,

    /// Tokens added per second.
    pub refill_rate_per_second: f64,
}

impl TokenBucketConfig {
    /// Time for an empty bucket to fill completely, saturating at
    /// `Duration::MAX` for rates too small to represent.
    pub fn time_to_full(&self) -> Duration {
        Duration::try_from_secs_f64(self.capacity / self.refill_rate_per_second)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 60.0,
            refill_rate_per_second: 1.0,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket used for namespaces without an explicit entry.
    pub default: TokenBucketConfig,

    /// Per-namespace buckets (e.g. "user", "project").
    pub namespaces: BTreeMap<String, TokenBucketConfig>,
}

impl RateLimitConfig {
    pub fn bucket_for(&self, namespace: &str) -> TokenBucketConfig {
        self.namespaces.get(namespace).copied().unwrap_or(self.default)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "user".to_string(),
            TokenBucketConfig {
                capacity: 60.0,
                refill_rate_per_second: 1.0,
            },
        );
        namespaces.insert(
            "project".to_string(),
            TokenBucketConfig {
                capacity: 300.0,
                refill_rate_per_second: 5.0,
            },
        );
        Self {
            default: TokenBucketConfig::default(),
            namespaces,
        }
    }
}

/// A single pool segment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Maximum concurrently leased slots.
    pub max_connections: usize,

    /// Connection establishment timeout handed to slot holders, in milliseconds.
    pub connection_timeout_ms: u64,

    /// Statement timeout handed to slot holders, in milliseconds.
    pub statement_timeout_ms: u64,

    /// Advisory priority (higher = more important). Not used for preemption.
    pub priority: u32,

    /// Utilization percentage above which the segment is reported unhealthy.
    pub warning_threshold_pct: f64,
}

impl SegmentConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            connection_timeout_ms: 10_000,
            statement_timeout_ms: 60_000,
            priority: 1,
            warning_threshold_pct: 85.0,
        }
    }
}

/// Connection admission configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Segments by name.
    pub segments: BTreeMap<String, SegmentConfig>,

    /// Caller role -> segment name.
    pub role_routes: BTreeMap<String, String>,

    /// Segment for roles without a route.
    pub default_segment: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let mut segments = BTreeMap::new();
        segments.insert(
            "privileged".to_string(),
            SegmentConfig {
                max_connections: 10,
                connection_timeout_ms: 5_000,
                statement_timeout_ms: 30_000,
                priority: 10,
                warning_threshold_pct: 70.0,
            },
        );
        segments.insert(
            "standard".to_string(),
            SegmentConfig {
                max_connections: 40,
                ..SegmentConfig::default()
            },
        );

        let mut role_routes = BTreeMap::new();
        role_routes.insert("admin".to_string(), "privileged".to_string());
        role_routes.insert("service".to_string(), "privileged".to_string());

        Self {
            segments,
            role_routes,
            default_segment: "standard".to_string(),
        }
    }
}

/// Degradation monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// How long a breaker must stay open before it counts as degraded.
    pub threshold_secs: u64,

    /// Fallback guidance by breaker name.
    pub guidance: BTreeMap<String, FallbackGuidance>,
}

impl DegradationConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_secs)
    }
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 90,
            guidance: BTreeMap::new(),
        }
    }
}

/// Periodic reporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Run the reporter loop.
    pub enabled: bool,

    /// Seconds between reports.
    pub interval_secs: u64,

    /// Slots leased longer than this are reclaimed, in seconds.
    pub stale_slot_max_age_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15,
            stale_slot_max_age_secs: 300,
        }
    }
}

impl ReporterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_slot_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_slot_max_age_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
