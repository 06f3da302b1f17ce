//! Degradation monitor.
//!
//! Reads every breaker in the registry and reports which dependencies have
//! been open long enough to count as degraded, with fallback guidance.
//! It is a pure observer: it never changes breaker state and sits outside
//! the call path.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::DegradationConfig;
use crate::health::guidance::{FallbackGuidance, GuidanceTable};
use crate::resilience::circuit_breaker::{BreakerMetrics, CircuitState};
use crate::resilience::registry::CircuitBreakerRegistry;

/// A persistently open dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedServer {
    pub name: String,
    /// Time since the breaker's last failure.
    pub open_for: Duration,
    pub message: String,
    pub guidance: Option<FallbackGuidance>,
}

/// Consolidated health view, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationSnapshot {
    pub degraded_servers: Vec<DegradedServer>,
    pub healthy_servers: Vec<String>,
    /// Degraded / total breakers; 0 when there are none.
    pub degradation_ratio: f64,
}

impl DegradationSnapshot {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_servers.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug)]
pub struct DegradationMonitor {
    registry: Arc<CircuitBreakerRegistry>,
    guidance: GuidanceTable,
    threshold: Duration,
}

impl DegradationMonitor {
    pub fn new(registry: Arc<CircuitBreakerRegistry>, config: &DegradationConfig) -> Self {
        Self {
            registry,
            guidance: GuidanceTable::new(config.guidance.clone()),
            threshold: config.threshold(),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    fn degraded_for(&self, m: &BreakerMetrics) -> Option<Duration> {
        if m.state != CircuitState::Open {
            return None;
        }
        m.last_failure_age.filter(|age| *age >= self.threshold)
    }

    pub fn snapshot(&self) -> DegradationSnapshot {
        let all = self.registry.all_metrics();
        let total = all.len();

        let mut degraded_servers = Vec::new();
        let mut healthy_servers = Vec::new();
        for m in all {
            match self.degraded_for(&m) {
                Some(open_for) => degraded_servers.push(DegradedServer {
                    message: self.guidance.message_for(&m.name),
                    guidance: self.guidance.get(&m.name).cloned(),
                    open_for,
                    name: m.name,
                }),
                None => healthy_servers.push(m.name),
            }
        }

        let degradation_ratio = if total == 0 {
            0.0
        } else {
            degraded_servers.len() as f64 / total as f64
        };

        DegradationSnapshot {
            degraded_servers,
            healthy_servers,
            degradation_ratio,
        }
    }

    /// Guidance entry for one dependency, whether or not it is degraded.
    pub fn fallback_guidance(&self, name: &str) -> Option<&FallbackGuidance> {
        self.guidance.get(name)
    }

    pub fn has_degraded_servers(&self) -> bool {
        self.registry
            .all_metrics()
            .iter()
            .any(|m| self.degraded_for(m).is_some())
    }
}
