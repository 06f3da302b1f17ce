//! A single pool segment and its leased slots.
//!
//! # Responsibilities
//! - Admit up to `max_connections` concurrent leases
//! - Release each lease exactly once (explicitly or on drop)
//! - Report utilization and slot ages
//! - Reclaim slots whose holders never released them

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::SegmentConfig;
use crate::observability::metrics;

/// The segment has no free slots. Treat as backpressure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pool segment '{segment}' exhausted ({current}/{max} slots in use)")]
pub struct PoolExhaustedError {
    pub segment: String,
    pub current: usize,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error(transparent)]
    Exhausted(#[from] PoolExhaustedError),

    #[error("unknown pool segment '{0}'")]
    UnknownSegment(String),

    #[error("acquire cancelled")]
    Cancelled,
}

/// One leased unit of capacity.
#[derive(Debug, Clone)]
pub struct ConnectionSlot {
    pub id: Uuid,
    pub acquired_at: Instant,
    /// Name of the segment the slot belongs to.
    pub segment: String,
    /// Timeouts the holder should apply to its connection.
    pub connection_timeout: Duration,
    pub statement_timeout: Duration,
}

/// Utilization snapshot of a segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentStats {
    pub name: String,
    pub priority: u32,
    pub active: usize,
    pub max: usize,
    pub utilization_pct: f64,
    pub warning_threshold_pct: f64,
    pub average_age: Duration,
    pub oldest_age: Duration,
}

impl SegmentStats {
    pub fn is_healthy(&self) -> bool {
        self.utilization_pct < self.warning_threshold_pct
    }
}

/// A bounded set of slots for one class of callers.
#[derive(Debug)]
pub struct PoolSegment {
    name: String,
    config: SegmentConfig,
    clock: SharedClock,
    slots: Mutex<HashMap<Uuid, ConnectionSlot>>,
}

impl PoolSegment {
    pub fn new(name: impl Into<String>, config: SegmentConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Lease a slot, or fail immediately if the segment is full.
    pub fn acquire(self: &Arc<Self>, cancel: &CancellationToken) -> Result<SlotLease, PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let slot = ConnectionSlot {
            id: Uuid::new_v4(),
            acquired_at: self.clock.now(),
            segment: self.name.clone(),
            connection_timeout: self.config.connection_timeout(),
            statement_timeout: self.config.statement_timeout(),
        };

        let mut slots = self.lock();
        let current = slots.len();
        if current >= self.config.max_connections {
            drop(slots);
            tracing::warn!(
                segment = %self.name,
                current,
                max = self.config.max_connections,
                "Pool segment exhausted"
            );
            metrics::record_pool_acquire(&self.name, false);
            return Err(PoolExhaustedError {
                segment: self.name.clone(),
                current,
                max: self.config.max_connections,
            }
            .into());
        }
        slots.insert(slot.id, slot.clone());
        drop(slots);

        tracing::debug!(segment = %self.name, slot = %slot.id, active = current + 1, "Slot acquired");
        metrics::record_pool_acquire(&self.name, true);

        Ok(SlotLease {
            segment: self.clone(),
            slot,
            released: false,
        })
    }

    /// Number of leased slots.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    pub fn stats(&self) -> SegmentStats {
        let now = self.clock.now();
        let slots = self.lock();
        let active = slots.len();

        let ages: Vec<Duration> = slots
            .values()
            .map(|s| now.saturating_duration_since(s.acquired_at))
            .collect();
        drop(slots);

        let oldest_age = ages.iter().max().copied().unwrap_or_default();
        let average_age = if ages.is_empty() {
            Duration::ZERO
        } else {
            ages.iter().sum::<Duration>() / ages.len() as u32
        };

        let utilization_pct = if self.config.max_connections == 0 {
            100.0
        } else {
            active as f64 / self.config.max_connections as f64 * 100.0
        };

        SegmentStats {
            name: self.name.clone(),
            priority: self.config.priority,
            active,
            max: self.config.max_connections,
            utilization_pct,
            warning_threshold_pct: self.config.warning_threshold_pct,
            average_age,
            oldest_age,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.stats().is_healthy()
    }

    /// Forcibly release slots held longer than `max_age`.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|_, slot| now.saturating_duration_since(slot.acquired_at) <= max_age);
        let removed = before - slots.len();
        drop(slots);

        if removed > 0 {
            tracing::warn!(segment = %self.name, removed, max_age = ?max_age, "Reclaimed stale slots");
            metrics::record_stale_reclaimed(&self.name, removed);
        }
        removed
    }

    fn release_slot(&self, id: Uuid) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(segment = %self.name, slot = %id, "Slot released");
        } else {
            tracing::debug!(segment = %self.name, slot = %id, "Slot already reclaimed");
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ConnectionSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A RAII lease on a segment slot.
///
/// Releases on drop; `release` does the same explicitly and reports whether
/// the slot was still held (false if it was reclaimed as stale).
#[derive(Debug)]
pub struct SlotLease {
    segment: Arc<PoolSegment>,
    slot: ConnectionSlot,
    released: bool,
}

impl SlotLease {
    pub fn slot(&self) -> &ConnectionSlot {
        &self.slot
    }

    pub fn release(mut self) -> bool {
        self.release_once()
    }

    fn release_once(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.segment.release_slot(self.slot.id)
    }
}

impl Deref for SlotLease {
    type Target = ConnectionSlot;
    fn deref(&self) -> &Self::Target {
        &self.slot
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.release_once();
    }
}
