//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → handed to each component at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breakers fix their config at creation
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::CircuitBreakerConfig;
pub use schema::DegradationConfig;
pub use schema::ObservabilityConfig;
pub use schema::PoolConfig;
pub use schema::RateLimitConfig;
pub use schema::ReporterConfig;
pub use schema::ResilienceConfig;
pub use schema::RetryConfig;
pub use schema::SegmentConfig;
pub use schema::TokenBucketConfig;
