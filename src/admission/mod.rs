//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming call for (namespace, identity, role):
//!     → rate_limit.rs (token bucket by identity; state in store.rs)
//!     → pool.rs (route role → segment)
//!         → segment.rs (lease a slot or fail with PoolExhausted)
//!     → Proceed to the resilience layer
//! ```
//!
//! # Design Decisions
//! - Rate rejections are values (`allowed = false`), pool rejections are errors
//! - Both are backpressure signals, never fatal
//! - Slot leases release on drop so a panicking holder cannot leak capacity

pub mod pool;
pub mod rate_limit;
pub mod segment;
pub mod store;

pub use pool::ConnectionPoolManager;
pub use rate_limit::{RateDecision, TokenBucketLimiter};
pub use segment::{ConnectionSlot, PoolError, PoolExhaustedError, PoolSegment, SegmentStats, SlotLease};
pub use store::{BucketStore, InMemoryBucketStore, StoreError, TokenBucketState};
