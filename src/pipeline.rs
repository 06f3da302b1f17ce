//! End-to-end guarded call.
//!
//! # Data Flow
//! ```text
//! Pipeline::call(ctx, f)
//!     → TokenBucketLimiter (namespace, identity, cost)   reject: RateLimited
//!     → ConnectionPoolManager (role → segment lease)     reject: Pool
//!     → RetryExecutor
//!         → breaker for ctx.dependency, per attempt     reject: Retry(Permanent(Open))
//!     → lease released when the call returns
//! ```
//!
//! The lease is held across every retry attempt and backoff sleep, so a
//! retrying caller keeps its slot.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::admission::pool::ConnectionPoolManager;
use crate::admission::rate_limit::TokenBucketLimiter;
use crate::admission::segment::PoolError;
use crate::admission::store::BucketStore;
use crate::clock::SharedClock;
use crate::config::ResilienceConfig;
use crate::resilience::error::{BreakerError, Classify};
use crate::resilience::registry::CircuitBreakerRegistry;
use crate::resilience::retries::{RetryError, RetryExecutor, RetryOutcome};

/// Who is calling what.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Rate limit namespace (e.g. "user", "project").
    pub namespace: &'a str,
    /// Bucket owner within the namespace.
    pub identity: &'a str,
    /// Tokens to consume.
    pub cost: u32,
    /// Caller role, routed to a pool segment.
    pub role: &'a str,
    /// Breaker name of the external dependency.
    pub dependency: &'a str,
}

impl<'a> CallContext<'a> {
    pub fn new(namespace: &'a str, identity: &'a str, role: &'a str, dependency: &'a str) -> Self {
        Self {
            namespace,
            identity,
            cost: 1,
            role,
            dependency,
        }
    }

    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }
}

#[derive(Debug, Error)]
pub enum PipelineError<E: StdError + 'static> {
    #[error("rate limit exceeded in namespace '{namespace}' (retry after {retry_after:?})")]
    RateLimited {
        namespace: String,
        remaining: u64,
        retry_after: Option<Duration>,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Retry(RetryError<BreakerError<E>>),
}

impl<E: StdError + 'static> PipelineError<E> {
    /// True for rejections caused by load rather than by the dependency.
    pub fn is_backpressure(&self) -> bool {
        match self {
            PipelineError::RateLimited { .. } => true,
            PipelineError::Pool(PoolError::Exhausted(_)) => true,
            PipelineError::Retry(RetryError::Permanent(e)) => e.is_open(),
            _ => false,
        }
    }

    /// The dependency's own last error, if it was ever invoked.
    pub fn into_dependency_error(self) -> Option<E> {
        match self {
            PipelineError::Retry(e) => e.into_inner().and_then(BreakerError::into_inner),
            _ => None,
        }
    }
}

/// The admission and resilience components wired together.
#[derive(Debug, Clone)]
pub struct Pipeline {
    limiter: Arc<TokenBucketLimiter>,
    pools: Arc<ConnectionPoolManager>,
    registry: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
}

impl Pipeline {
    pub fn new(
        limiter: Arc<TokenBucketLimiter>,
        pools: Arc<ConnectionPoolManager>,
        registry: Arc<CircuitBreakerRegistry>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            limiter,
            pools,
            registry,
            retry,
        }
    }

    /// Build every component from a loaded config.
    pub fn from_config(
        config: &ResilienceConfig,
        store: Arc<dyn BucketStore>,
        clock: SharedClock,
    ) -> Self {
        Self::new(
            Arc::new(TokenBucketLimiter::new(
                config.rate_limit.clone(),
                store,
                clock.clone(),
            )),
            Arc::new(ConnectionPoolManager::new(&config.pool, clock.clone())),
            Arc::new(CircuitBreakerRegistry::new(
                config.circuit_breaker.clone(),
                clock,
            )),
            RetryExecutor::new(config.retry.clone()),
        )
    }

    pub fn limiter(&self) -> &Arc<TokenBucketLimiter> {
        &self.limiter
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Admit the caller, then run `f` against the dependency with retries
    /// behind its breaker.
    pub async fn call<F, Fut, T, E>(
        &self,
        ctx: CallContext<'_>,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<RetryOutcome<T>, PipelineError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Classify + 'static,
    {
        let decision = self
            .limiter
            .consume(ctx.namespace, ctx.identity, ctx.cost)
            .await;
        if !decision.allowed {
            return Err(PipelineError::RateLimited {
                namespace: ctx.namespace.to_string(),
                remaining: decision.remaining,
                retry_after: decision.retry_after,
            });
        }

        let lease = self.pools.acquire_for_role(ctx.role, cancel)?;
        let breaker = self.registry.get_or_create(ctx.dependency);
        let breaker = breaker.as_ref();

        tracing::debug!(
            dependency = ctx.dependency,
            segment = %lease.segment,
            slot = %lease.id,
            "Call admitted"
        );

        // The retry loop drops an attempt on cancellation, so nothing is
        // recorded for it.
        let result = self
            .retry
            .run(cancel, move || {
                let admitted = breaker.try_acquire().map(|()| f());
                async move {
                    let attempt = match admitted {
                        Ok(attempt) => attempt,
                        Err(open) => return Err(BreakerError::Open(open)),
                    };
                    match attempt.await {
                        Ok(value) => {
                            breaker.record_success();
                            Ok(value)
                        }
                        Err(e) => {
                            breaker.record_failure();
                            Err(BreakerError::Inner(e))
                        }
                    }
                }
            })
            .await
            .map_err(PipelineError::Retry);

        lease.release();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::store::InMemoryBucketStore;
    use crate::clock::ManualClock;
    use crate::config::{CircuitBreakerConfig, RetryConfig, SegmentConfig, TokenBucketConfig};
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::error::DependencyError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn pipeline(clock: &Arc<ManualClock>) -> Pipeline {
        let mut config = ResilienceConfig::default();
        config.rate_limit.default = TokenBucketConfig {
            capacity: 3.0,
            refill_rate_per_second: 1.0,
        };
        config.pool.segments.insert(
            "standard".into(),
            SegmentConfig {
                max_connections: 1,
                ..SegmentConfig::default()
            },
        );
        config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        };
        config.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter_full: false,
            ..RetryConfig::default()
        };
        let store = Arc::new(InMemoryBucketStore::new(clock.clone()));
        Pipeline::from_config(&config, store, clock.clone())
    }

    fn ctx() -> CallContext<'static> {
        CallContext::new("tenant", "acme", "anonymous", "search")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_releases_slot() {
        let clock = Arc::new(ManualClock::new());
        let p = pipeline(&clock);
        let cancel = CancellationToken::new();

        let out = p
            .call(ctx(), &cancel, || async { Ok::<_, DependencyError>(7) })
            .await
            .unwrap();
        assert_eq!(out.value, 7);
        assert_eq!(out.attempts, 1);
        assert_eq!(p.pools().segment("standard").unwrap().active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_before_anything_else() {
        let clock = Arc::new(ManualClock::new());
        let p = pipeline(&clock);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let err = p
            .call(ctx().with_cost(5), &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, DependencyError>(()) }
            })
            .await
            .unwrap_err();

        match &err {
            PipelineError::RateLimited {
                remaining,
                retry_after,
                ..
            } => {
                assert_eq!(*remaining, 3);
                assert_eq!(*retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_backpressure());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(p.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_exhausted() {
        let clock = Arc::new(ManualClock::new());
        let p = pipeline(&clock);
        let cancel = CancellationToken::new();

        let _held = p.pools().acquire("standard", &cancel).unwrap();
        let err = p
            .call(ctx(), &cancel, || async { Ok::<_, DependencyError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Pool(PoolError::Exhausted(_))));
        assert!(err.is_backpressure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_open_breaker_then_fails_fast() {
        let clock = Arc::new(ManualClock::new());
        let p = pipeline(&clock);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        // two retryable failures open the breaker; the third attempt is rejected
        let err = p
            .call(ctx(), &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DependencyError::new("bad gateway").with_status(502)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(err.is_backpressure());
        assert!(matches!(
            &err,
            PipelineError::Retry(RetryError::Permanent(BreakerError::Open(_)))
        ));
        assert_eq!(
            p.registry().get("search").unwrap().state(),
            CircuitState::Open
        );
        assert_eq!(p.pools().segment("standard").unwrap().active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_error_surfaces() {
        let clock = Arc::new(ManualClock::new());
        let p = pipeline(&clock);
        let cancel = CancellationToken::new();

        let err = p
            .call(ctx(), &cancel, || async {
                Err::<(), _>(DependencyError::new("bad request").with_status(400))
            })
            .await
            .unwrap_err();
        assert!(!err.is_backpressure());
        let inner = err.into_dependency_error().unwrap();
        assert_eq!(inner.status, Some(400));
    }
}
