//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: probing whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures within window >= failure_threshold
//! Open → Half-Open: half_open_timeout elapsed since last failure (lazily, on next check)
//! Half-Open → Closed: success_threshold probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - Per-dependency breaker, looked up by name through the registry
//! - Fail fast in Open state (the wrapped call is never invoked)
//! - No background timers: every public entry point re-evaluates state first
//! - One mutex per breaker, never held across the wrapped call

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::error::{BreakerError, CircuitOpenError};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker, for polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    /// Failures inside the trailing window.
    pub failure_count: usize,
    /// Time since the last recorded failure.
    pub last_failure_age: Option<Duration>,
    pub half_open_attempts: u32,
    pub half_open_successes: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    half_open_attempts: u32,
    half_open_successes: u32,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            last_failure: None,
            half_open_attempts: 0,
            half_open_successes: 0,
        }
    }

    fn clear_half_open(&mut self) {
        self.half_open_attempts = 0;
        self.half_open_successes = 0;
    }
}

/// A circuit breaker guarding one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` through the breaker.
    ///
    /// Fails with [`BreakerError::Open`] without invoking `f` while the
    /// circuit is open. Cancellation while `f` is in flight drops the call
    /// and records neither success nor failure.
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if cancel.is_cancelled() {
            return Err(BreakerError::Cancelled);
        }
        self.try_acquire()?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(breaker = %self.name, "Call cancelled in flight");
                return Err(BreakerError::Cancelled);
            }
            outcome = f() => outcome,
        };

        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admission check for callers that record outcomes themselves.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.evaluate(&mut inner, now);

        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let open_for = inner
            .last_failure
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        let err = CircuitOpenError {
            name: self.name.clone(),
            failure_count: inner.failures.len(),
            open_for,
        };
        drop(inner);

        tracing::debug!(breaker = %self.name, open_for = ?open_for, "Circuit open, rejecting call");
        metrics::record_breaker_rejected(&self.name);
        Err(err)
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.evaluate(&mut inner, now);

        if inner.state != CircuitState::HalfOpen {
            return;
        }

        inner.half_open_attempts += 1;
        inner.half_open_successes += 1;
        if inner.half_open_successes >= self.config.success_threshold {
            inner.failures.clear();
            inner.last_failure = None;
            inner.clear_half_open();
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.evaluate(&mut inner, now);

        inner.failures.push_back(now);
        inner.last_failure = Some(now);

        if inner.state == CircuitState::HalfOpen {
            inner.clear_half_open();
            self.transition(&mut inner, CircuitState::Open);
        } else {
            self.evaluate(&mut inner, now);
        }
    }

    /// Current state, after applying any due transition.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.evaluate(&mut inner, now);
        inner.state
    }

    /// Stored state and counters. Does not apply pending transitions.
    pub fn metrics(&self) -> BreakerMetrics {
        let now = self.clock.now();
        let window = self.config.failure_window();
        let inner = self.lock();

        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner
                .failures
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < window)
                .count(),
            last_failure_age: inner.last_failure.map(|t| now.saturating_duration_since(t)),
            half_open_attempts: inner.half_open_attempts,
            half_open_successes: inner.half_open_successes,
        }
    }

    /// Force the breaker closed and clear all counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        *inner = BreakerState::closed();
        drop(inner);

        if previous != CircuitState::Closed {
            metrics::record_breaker_transition(&self.name, previous.as_str(), "closed");
        }
        tracing::info!(breaker = %self.name, previous = %previous, "Circuit breaker reset");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evaluate(&self, inner: &mut BreakerState, now: Instant) {
        let window = self.config.failure_window();
        while let Some(oldest) = inner.failures.front() {
            if now.saturating_duration_since(*oldest) >= window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }

        match inner.state {
            CircuitState::Closed => {
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    inner.last_failure = Some(now);
                    self.transition(inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.half_open_timeout() {
                    inner.clear_half_open();
                    self.transition(inner, CircuitState::HalfOpen);
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                failures = inner.failures.len(),
                "Circuit breaker opened"
            ),
            _ => tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker state change"),
        }
        metrics::record_breaker_transition(&self.name, from.as_str(), to.as_str());
    }
}
