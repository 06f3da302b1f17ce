//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_shutdown_signal resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger() → reporter loop exits (broadcast)
//!               → in-flight guarded calls cancel (token)
//! ```
//!
//! # Design Decisions
//! - One coordinator owns both the broadcast and the cancellation token
//! - Triggering twice is harmless

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
