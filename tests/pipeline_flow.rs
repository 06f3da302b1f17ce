//! End-to-end guarded calls through the pipeline.

use std::sync::Arc;
use std::time::Duration;

use resilience_core::clock::ManualClock;
use resilience_core::config::loader::parse_config;
use resilience_core::health::DegradationMonitor;
use resilience_core::pipeline::{CallContext, PipelineError};
use resilience_core::resilience::{BreakerError, CircuitState, RetryError};
use tokio_util::sync::CancellationToken;

mod common;

use common::ScriptedDependency;

fn ctx(dependency: &str) -> CallContext<'_> {
    CallContext::new("user", "user-42", "member", dependency)
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let clock = Arc::new(ManualClock::new());
    let pipeline = common::pipeline(&common::test_config(), &clock);
    let dep = ScriptedDependency::failing(2, 503);
    let cancel = CancellationToken::new();

    let started = tokio::time::Instant::now();
    let out = pipeline
        .call(ctx("catalog"), &cancel, || {
            let dep = dep.clone();
            async move { dep.call().await }
        })
        .await
        .unwrap();

    assert_eq!(out.value, 3);
    assert_eq!(out.attempts, 3);
    // 100ms + 200ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(300));

    let cb = pipeline.registry().get("catalog").unwrap();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.metrics().failure_count, 2);
    assert_eq!(pipeline.pools().segment("standard").unwrap().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_outage_opens_breaker_and_degrades() {
    let clock = Arc::new(ManualClock::new());
    let config = common::test_config();
    let pipeline = common::pipeline(&config, &clock);
    let monitor = DegradationMonitor::new(pipeline.registry().clone(), &config.degradation);
    let dep = ScriptedDependency::down(502);
    let cancel = CancellationToken::new();

    let err = pipeline
        .call(ctx("catalog"), &cancel, || {
            let dep = dep.clone();
            async move { dep.call().await }
        })
        .await
        .unwrap_err();

    // max_attempts is 3, which is also the failure threshold
    assert_eq!(dep.calls(), 3);
    assert!(matches!(
        err,
        PipelineError::Retry(RetryError::Exhausted { attempts: 3, .. })
    ));

    // an open breaker fails fast without touching the dependency
    let err = pipeline
        .call(ctx("catalog"), &cancel, || {
            let dep = dep.clone();
            async move { dep.call().await }
        })
        .await
        .unwrap_err();
    assert_eq!(dep.calls(), 3);
    assert!(matches!(
        err,
        PipelineError::Retry(RetryError::Permanent(BreakerError::Open(_)))
    ));

    // recently opened is not yet degraded
    assert!(!monitor.has_degraded_servers());
    clock.advance(Duration::from_secs(90));
    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.degraded_servers.len(), 1);
    assert_eq!(snapshot.degraded_servers[0].name, "catalog");
    assert_eq!(snapshot.degradation_ratio, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_per_dependency() {
    let clock = Arc::new(ManualClock::new());
    let pipeline = common::pipeline(&common::test_config(), &clock);
    let broken = ScriptedDependency::down(500);
    let healthy = ScriptedDependency::new([]);
    let cancel = CancellationToken::new();

    let _ = pipeline
        .call(ctx("catalog"), &cancel, || {
            let dep = broken.clone();
            async move { dep.call().await }
        })
        .await;

    let out = pipeline
        .call(ctx("search"), &cancel, || {
            let dep = healthy.clone();
            async move { dep.call().await }
        })
        .await
        .unwrap();
    assert_eq!(out.attempts, 1);
    assert_eq!(
        pipeline.registry().get("catalog").unwrap().state(),
        CircuitState::Open
    );
    assert_eq!(
        pipeline.registry().get("search").unwrap().state(),
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_refills_with_time() {
    let clock = Arc::new(ManualClock::new());
    let config = parse_config(
        r#"
[rate_limit.namespaces.user]
capacity = 2.0
refill_rate_per_second = 0.5
"#,
    )
    .unwrap();
    let pipeline = common::pipeline(&config, &clock);
    let dep = ScriptedDependency::new([]);
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        assert!(pipeline
            .call(ctx("catalog"), &cancel, || {
                let dep = dep.clone();
                async move { dep.call().await }
            })
            .await
            .is_ok());
    }

    let err = pipeline
        .call(ctx("catalog"), &cancel, || {
            let dep = dep.clone();
            async move { dep.call().await }
        })
        .await
        .unwrap_err();
    match err {
        PipelineError::RateLimited {
            remaining,
            retry_after,
            ..
        } => {
            assert_eq!(remaining, 0);
            assert_eq!(retry_after, Some(Duration::from_secs(2)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(dep.calls(), 2);

    clock.advance(Duration::from_secs(2));
    assert!(pipeline
        .call(ctx("catalog"), &cancel, || {
            let dep = dep.clone();
            async move { dep.call().await }
        })
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_lease_held_across_retries_and_released_on_cancel() {
    let clock = Arc::new(ManualClock::new());
    let pipeline = Arc::new(common::pipeline(&common::test_config(), &clock));
    let dep = ScriptedDependency::down(503);
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = pipeline.clone();
        let dep = dep.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pipeline
                .call(ctx("catalog"), &cancel, || {
                    let dep = dep.clone();
                    async move { dep.call().await }
                })
                .await
                .map(|out| out.value)
        })
    };

    // first attempt has failed and the call is sleeping in backoff
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(dep.calls(), 1);
    assert_eq!(pipeline.pools().segment("standard").unwrap().active(), 1);

    cancel.cancel();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Retry(RetryError::Cancelled { attempts: 1 })
    ));
    assert_eq!(pipeline.pools().segment("standard").unwrap().active(), 0);
}
