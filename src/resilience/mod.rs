//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to dependency D:
//!     → retries.rs (attempt, classify failure, back off with jitter)
//!         → registry.rs (breaker for D, created on first use)
//!             → circuit_breaker.rs (fail fast if open, record outcome)
//!                 → wrapped call
//! ```
//!
//! # Design Decisions
//! - Retry wraps a single breaker call, so an open circuit fails fast
//!   instead of being retried
//! - Breaker transitions are evaluated lazily on access, never by a timer
//! - Every async entry point takes a cancellation token

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod registry;
pub mod retries;

pub use circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
pub use error::{BoxError, BreakerError, CircuitOpenError, Classify, DependencyError};
pub use registry::CircuitBreakerRegistry;
pub use retries::{run_with_retry, RetryError, RetryExecutor, RetryOutcome};
