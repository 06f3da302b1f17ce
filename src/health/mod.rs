//! Health observation subsystem.
//!
//! # Data Flow
//! ```text
//! Degradation (degradation.rs):
//!     Breaker registry metrics
//!     → Open for at least the threshold?
//!     → Attach guidance from guidance.rs
//!     → DegradationSnapshot
//!
//! Reporter (reporter.rs):
//!     Periodic timer
//!     → Sweep stale pool slots
//!     → Snapshot degradation and segment stats
//!     → Log and refresh gauges
//! ```
//!
//! # Design Decisions
//! - Observers only: nothing here changes breaker state
//! - A recently opened breaker is not degraded; only a persistent outage is
//! - Snapshots are recomputed on demand, never cached

pub mod degradation;
pub mod guidance;
pub mod reporter;

pub use degradation::{DegradationMonitor, DegradationSnapshot, DegradedServer};
pub use guidance::{FallbackGuidance, GuidanceTable};
pub use reporter::{HealthReport, HealthReporter};
