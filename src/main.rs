//! Resilience core daemon.
//!
//! Loads a config, builds the admission and resilience components, and runs
//! the periodic health reporter until SIGINT/SIGTERM.
//!
//! ```text
//!   config.toml ──▶ loader + validation ──▶ ResilienceConfig
//!                                               │
//!           ┌───────────────────────────────────┼─────────────────────────┐
//!           ▼                                   ▼                         ▼
//!   TokenBucketLimiter               ConnectionPoolManager      CircuitBreakerRegistry
//!   (InMemoryBucketStore)            (privileged / standard)            │
//!           └──────────────┬────────────────────┘                      ▼
//!                          ▼                                   DegradationMonitor
//!                       Pipeline                                        │
//!                                                                       ▼
//!                                     HealthReporter ◀── ticker / shutdown broadcast
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use resilience_core::admission::InMemoryBucketStore;
use resilience_core::clock;
use resilience_core::config::loader::load_config;
use resilience_core::config::ResilienceConfig;
use resilience_core::health::{DegradationMonitor, HealthReporter};
use resilience_core::lifecycle::{wait_for_shutdown_signal, Shutdown};
use resilience_core::observability::{logging, metrics};
use resilience_core::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "resilience-core")]
#[command(about = "Circuit breakers, retries and admission control for external dependencies", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the config and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    logging::init_logging(&config.observability)?;

    tracing::info!(
        config = ?cli.config,
        breaker_threshold = config.circuit_breaker.failure_threshold,
        retry_attempts = config.retry.max_attempts,
        segments = config.pool.segments.len(),
        "Configuration loaded"
    );

    if cli.check {
        tracing::info!("Configuration valid");
        return Ok(());
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let clock = clock::system();
    let store = Arc::new(InMemoryBucketStore::new(clock.clone()));
    let pipeline = Pipeline::from_config(&config, store, clock);

    let monitor = Arc::new(DegradationMonitor::new(
        pipeline.registry().clone(),
        &config.degradation,
    ));

    let shutdown = Shutdown::new();
    let reporter = HealthReporter::new(monitor, pipeline.pools().clone(), config.reporter.clone())
        .with_bucket_store(pipeline.limiter().store().clone());
    let reporter_handle = tokio::spawn(reporter.run(shutdown.subscribe()));

    tracing::info!("resilience-core v0.1.0 running");

    if let Err(e) = wait_for_shutdown_signal().await {
        tracing::error!(error = %e, "Failed to install signal handlers, shutting down");
    }

    shutdown.trigger();
    if let Err(e) = reporter_handle.await {
        tracing::error!(error = %e, "Health reporter task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
