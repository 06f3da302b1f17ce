//! Segmented connection admission.
//!
//! # Responsibilities
//! - Own one segment per priority class (e.g. privileged vs standard)
//! - Route a caller's role to its segment
//! - Aggregate stats and health across segments
//! - Sweep stale slots in every segment
//!
//! # Design Decisions
//! - Priority is advisory: it orders reports and informs separate limits,
//!   but no lease is ever preempted
//! - Each segment owns its slot map; the manager never touches slots directly

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::admission::segment::{PoolError, PoolSegment, SegmentStats, SlotLease};
use crate::clock::SharedClock;
use crate::config::PoolConfig;

/// All segments of a logical resource pool.
#[derive(Debug)]
pub struct ConnectionPoolManager {
    segments: BTreeMap<String, Arc<PoolSegment>>,
    role_routes: BTreeMap<String, String>,
    default_segment: String,
}

impl ConnectionPoolManager {
    pub fn new(config: &PoolConfig, clock: SharedClock) -> Self {
        let segments = config
            .segments
            .iter()
            .map(|(name, seg)| {
                (
                    name.clone(),
                    Arc::new(PoolSegment::new(name.clone(), seg.clone(), clock.clone())),
                )
            })
            .collect();

        Self {
            segments,
            role_routes: config.role_routes.clone(),
            default_segment: config.default_segment.clone(),
        }
    }

    pub fn segment(&self, name: &str) -> Option<&Arc<PoolSegment>> {
        self.segments.get(name)
    }

    pub fn segments(&self) -> impl Iterator<Item = &Arc<PoolSegment>> {
        self.segments.values()
    }

    /// The segment serving `role`, falling back to the default segment.
    pub fn segment_for_role(&self, role: &str) -> Result<&Arc<PoolSegment>, PoolError> {
        let name = self
            .role_routes
            .get(role)
            .unwrap_or(&self.default_segment);
        self.segments
            .get(name)
            .ok_or_else(|| PoolError::UnknownSegment(name.clone()))
    }

    /// Lease a slot from a named segment.
    pub fn acquire(&self, segment: &str, cancel: &CancellationToken) -> Result<SlotLease, PoolError> {
        self.segments
            .get(segment)
            .ok_or_else(|| PoolError::UnknownSegment(segment.to_string()))?
            .acquire(cancel)
    }

    /// Lease a slot from the segment serving `role`.
    pub fn acquire_for_role(
        &self,
        role: &str,
        cancel: &CancellationToken,
    ) -> Result<SlotLease, PoolError> {
        self.segment_for_role(role)?.acquire(cancel)
    }

    /// Stats for every segment, highest priority first.
    pub fn stats(&self) -> Vec<SegmentStats> {
        let mut stats: Vec<SegmentStats> = self.segments.values().map(|s| s.stats()).collect();
        stats.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        stats
    }

    /// True iff every segment is below its warning threshold.
    pub fn is_healthy(&self) -> bool {
        self.segments.values().all(|s| s.is_healthy())
    }

    /// Reclaim slots older than `max_age` in every segment.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let mut total = 0;
        for segment in self.segments.values() {
            total += segment.cleanup_stale(max_age);
        }
        if total > 0 {
            tracing::info!(removed = total, "Stale slot sweep complete");
        }
        total
    }
}
