//! Periodic health reporting.
//!
//! # Responsibilities
//! - On every tick, log the degradation snapshot and segment stats
//! - Reclaim stale pool slots and purge expired rate-limit buckets
//! - Refresh health gauges
//! - Exit on the shutdown broadcast

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time;

use crate::admission::pool::ConnectionPoolManager;
use crate::admission::segment::SegmentStats;
use crate::admission::store::BucketStore;
use crate::config::ReporterConfig;
use crate::health::degradation::{DegradationMonitor, DegradationSnapshot};
use crate::observability::metrics;

/// Result of one reporting pass.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub degradation: DegradationSnapshot,
    pub segments: Vec<SegmentStats>,
    pub pool_healthy: bool,
    /// Stale slots reclaimed during this pass.
    pub reclaimed: usize,
    /// Expired rate-limit buckets dropped during this pass.
    pub purged_buckets: usize,
}

pub struct HealthReporter {
    monitor: Arc<DegradationMonitor>,
    pools: Arc<ConnectionPoolManager>,
    buckets: Option<Arc<dyn BucketStore>>,
    config: ReporterConfig,
}

impl HealthReporter {
    pub fn new(
        monitor: Arc<DegradationMonitor>,
        pools: Arc<ConnectionPoolManager>,
        config: ReporterConfig,
    ) -> Self {
        Self {
            monitor,
            pools,
            buckets: None,
            config,
        }
    }

    /// Also purge expired state from `store` on every pass.
    pub fn with_bucket_store(mut self, store: Arc<dyn BucketStore>) -> Self {
        self.buckets = Some(store);
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Health reporter disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            stale_slot_max_age = self.config.stale_slot_max_age_secs,
            "Health reporter starting"
        );

        let mut ticker = time::interval(self.config.interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health reporter received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run a single pass.
    pub fn report_once(&self) -> HealthReport {
        let reclaimed = self.pools.cleanup_stale(self.config.stale_slot_max_age());
        let purged_buckets = self
            .buckets
            .as_ref()
            .map_or(0, |store| store.purge_expired());
        if purged_buckets > 0 {
            metrics::record_buckets_purged(purged_buckets);
        }

        let segments = self.pools.stats();
        let pool_healthy = segments.iter().all(SegmentStats::is_healthy);
        let degradation = self.monitor.snapshot();

        for s in &segments {
            metrics::record_pool_utilization(&s.name, s.utilization_pct);
        }

        metrics::record_degradation(
            degradation.degraded_servers.len(),
            degradation.degradation_ratio,
        );

        for s in segments.iter().filter(|s| !s.is_healthy()) {
            tracing::warn!(
                segment = %s.name,
                active = s.active,
                max = s.max,
                utilization = s.utilization_pct,
                threshold = s.warning_threshold_pct,
                "Pool segment above warning threshold"
            );
        }

        if degradation.is_degraded() {
            for server in &degradation.degraded_servers {
                tracing::warn!(
                    dependency = %server.name,
                    open_for = ?server.open_for,
                    guidance = %server.message,
                    "Dependency degraded"
                );
            }
        } else {
            tracing::debug!(
                dependencies = degradation.healthy_servers.len(),
                pool_healthy,
                "All dependencies healthy"
            );
        }

        HealthReport {
            degradation,
            segments,
            pool_healthy,
            reclaimed,
            purged_buckets,
        }
    }
}
