//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use resilience_core::admission::InMemoryBucketStore;
use resilience_core::clock::ManualClock;
use resilience_core::config::{ResilienceConfig, RetryConfig, SegmentConfig};
use resilience_core::pipeline::Pipeline;
use resilience_core::resilience::DependencyError;

/// A fake external dependency that fails according to a script.
///
/// Each call pops the next entry: `Some(status)` fails with that HTTP
/// status, `None` succeeds. Once the script runs out, calls use `after`.
#[derive(Debug, Default)]
pub struct ScriptedDependency {
    script: Mutex<VecDeque<Option<u16>>>,
    after: Option<u16>,
    calls: AtomicU32,
}

impl ScriptedDependency {
    pub fn new(script: impl IntoIterator<Item = Option<u16>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            after: None,
            calls: AtomicU32::new(0),
        })
    }

    /// Fails `n` times with `status`, then succeeds.
    pub fn failing(n: usize, status: u16) -> Arc<Self> {
        Self::new(std::iter::repeat(Some(status)).take(n))
    }

    /// Fails with `status` forever.
    pub fn down(status: u16) -> Arc<Self> {
        Arc::new(Self {
            after: Some(status),
            ..Self::default()
        })
    }

    /// Returns the 1-based call number on success.
    pub async fn call(&self) -> Result<u32, DependencyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self.script.lock().unwrap().pop_front().unwrap_or(self.after);
        match next {
            Some(status) => Err(DependencyError::new(format!("upstream returned {status}"))
                .with_status(status)),
            None => Ok(n),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Small, fast config for end-to-end runs.
pub fn test_config() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.failure_window_secs = 60;
    config.circuit_breaker.half_open_timeout_secs = 10;
    config.circuit_breaker.success_threshold = 2;
    config.retry = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 50,
        max_delay_ms: 400,
        jitter_full: false,
        ..RetryConfig::default()
    };
    config.pool.segments.insert(
        "standard".into(),
        SegmentConfig {
            max_connections: 2,
            ..SegmentConfig::default()
        },
    );
    config
}

pub fn pipeline(config: &ResilienceConfig, clock: &Arc<ManualClock>) -> Pipeline {
    let store = Arc::new(InMemoryBucketStore::new(clock.clone()));
    Pipeline::from_config(config, store, clock.clone())
}
