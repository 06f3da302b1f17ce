//! Resilience core library.
//!
//! Admission control (token buckets, segmented slot pools) and failure
//! handling (circuit breakers, retries, degradation reporting) for calls to
//! external dependencies.

pub mod admission;
pub mod clock;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod resilience;

pub use admission::{ConnectionPoolManager, InMemoryBucketStore, TokenBucketLimiter};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::schema::ResilienceConfig;
pub use health::{DegradationMonitor, DegradationSnapshot, HealthReporter};
pub use lifecycle::Shutdown;
pub use pipeline::{CallContext, Pipeline, PipelineError};
pub use resilience::{CircuitBreaker, CircuitBreakerRegistry, RetryExecutor};
