//! Named circuit breakers.
//!
//! # Responsibilities
//! - Create a breaker on first lookup of a name, exactly once
//! - Hand out shared handles for calls and for polling
//! - Reset individual breakers or all of them
//!
//! # Design Decisions
//! - An owned object passed by handle, not a process global
//! - First creation wins: later lookups with a different config get the
//!   existing breaker unchanged
//! - Breakers are never removed, only reset

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::resilience::circuit_breaker::{BreakerMetrics, CircuitBreaker};

/// Registry of circuit breakers keyed by dependency name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            clock,
        }
    }

    /// Get the breaker for `name`, creating it with the registry defaults.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, None)
    }

    /// Get the breaker for `name`, creating it with `config` if absent.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            if let Some(requested) = &config {
                if requested != existing.config() {
                    tracing::debug!(breaker = %name, "Breaker exists; ignoring differing config");
                }
            }
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(
                    name,
                    config.unwrap_or_else(|| self.defaults.clone()),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Look up an existing breaker without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// All breakers, ordered by name.
    pub fn get_all(&self) -> BTreeMap<String, Arc<CircuitBreaker>> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Metrics of every breaker, ordered by name.
    pub fn all_metrics(&self) -> Vec<BreakerMetrics> {
        self.get_all().values().map(|b| b.metrics()).collect()
    }

    /// Reset one breaker. Returns false if no breaker has that name.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.get_all().values() {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::resilience::circuit_breaker::CircuitState;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), Arc::new(ManualClock::new()))
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let reg = registry();
        let a = reg.get_or_create("payments");
        let b = reg.get_or_create("payments");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_first_config_wins() {
        let reg = registry();
        let first = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let second = CircuitBreakerConfig {
            failure_threshold: 50,
            ..Default::default()
        };

        reg.get_or_create_with("search", Some(first.clone()));
        let cb = reg.get_or_create_with("search", Some(second));
        assert_eq!(cb.config(), &first);
    }

    #[test]
    fn test_get_all_sorted() {
        let reg = registry();
        reg.get_or_create("zeta");
        reg.get_or_create("alpha");
        let names: Vec<_> = reg.get_all().into_keys().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn test_reset_and_reset_all() {
        let reg = registry();
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let a = reg.get_or_create_with("a", Some(config.clone()));
        let b = reg.get_or_create_with("b", Some(config));
        a.record_failure();
        b.record_failure();

        assert!(reg.reset("a"));
        assert!(!reg.reset("nope"));
        assert_eq!(a.state(), CircuitState::Closed);
        assert_eq!(b.state(), CircuitState::Open);

        reg.reset_all();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_first_access_creates_once() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.get_or_create("shared"))
            })
            .collect();
        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(reg.len(), 1);
        assert!(breakers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
