//! Token bucket rate limiting per caller identity.
//!
//! Buckets are keyed by `(namespace, identity)`, e.g. `("user", user_id)` or
//! `("project", project_id)`, with capacity and refill rate configured per
//! namespace.
//!
//! # Design Decisions
//! - State is read, refilled, and written back on every call, including
//!   rejections, so `last_refill` always advances
//! - No lock across instances: concurrent consumers of one bucket may
//!   interleave and over-admit slightly
//! - Store failures never change the decision for the current call; a failed
//!   read starts from a full bucket and a failed write is logged

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::admission::store::{BucketStore, TokenBucketState};
use crate::clock::SharedClock;
use crate::config::{RateLimitConfig, TokenBucketConfig};
use crate::observability::metrics;

/// Bounds on how long bucket state is kept. An expired bucket reads as full.
const MIN_BUCKET_TTL: Duration = Duration::from_secs(1);
const MAX_BUCKET_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Result of a consumption attempt. A rejection is a value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Whole tokens left after this call.
    pub remaining: u64,
    /// Time until `cost` tokens will be available, when rejected.
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    /// `retry_after` rounded up to whole seconds, as used by `Retry-After`.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| d.as_secs_f64().ceil() as u64)
    }
}

/// A token bucket: refill then try to take `cost` tokens.
fn refill_and_take(
    state: TokenBucketState,
    bucket: &TokenBucketConfig,
    now_ms: u64,
    cost: f64,
) -> (TokenBucketState, bool) {
    let elapsed_secs = now_ms.saturating_sub(state.last_refill_ms) as f64 / 1000.0;
    let mut tokens = (state.tokens.max(0.0) + elapsed_secs * bucket.refill_rate_per_second)
        .min(bucket.capacity);

    let allowed = tokens >= cost;
    if allowed {
        tokens -= cost;
    }

    (
        TokenBucketState {
            tokens,
            last_refill_ms: now_ms,
        },
        allowed,
    )
}

/// Rate limiter backed by a shared bucket store.
#[derive(Debug, Clone)]
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    store: Arc<dyn BucketStore>,
    clock: SharedClock,
}

impl TokenBucketLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn BucketStore>, clock: SharedClock) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    pub fn bucket_config(&self, namespace: &str) -> TokenBucketConfig {
        self.config.bucket_for(namespace)
    }

    /// Consume one token.
    pub async fn check(&self, namespace: &str, identity: &str) -> RateDecision {
        self.consume(namespace, identity, 1).await
    }

    /// Try to consume `cost` tokens from the caller's bucket.
    pub async fn consume(&self, namespace: &str, identity: &str, cost: u32) -> RateDecision {
        let bucket = self.bucket_config(namespace);
        let now_ms = self.clock.unix_millis();
        let cost = f64::from(cost);

        let current = match self.store.get(namespace, identity).await {
            Ok(Some(state)) => state,
            Ok(None) => TokenBucketState {
                tokens: bucket.capacity,
                last_refill_ms: now_ms,
            },
            Err(e) => {
                tracing::warn!(namespace, identity, error = %e, "Bucket read failed, starting from a full bucket");
                metrics::record_store_error("get");
                TokenBucketState {
                    tokens: bucket.capacity,
                    last_refill_ms: now_ms,
                }
            }
        };

        let (next, allowed) = refill_and_take(current, &bucket, now_ms, cost);

        let ttl = bucket.time_to_full().clamp(MIN_BUCKET_TTL, MAX_BUCKET_TTL);
        if let Err(e) = self.store.set(namespace, identity, next, ttl).await {
            tracing::warn!(namespace, identity, error = %e, "Bucket write failed");
            metrics::record_store_error("set");
        }

        metrics::record_rate_limit(namespace, allowed);

        let retry_after = if allowed {
            None
        } else {
            let deficit = cost - next.tokens;
            tracing::debug!(namespace, identity, tokens = next.tokens, cost, "Rate limit exceeded");
            Some(
                Duration::try_from_secs_f64((deficit / bucket.refill_rate_per_second).max(0.0))
                    .unwrap_or(Duration::MAX),
            )
        };

        RateDecision {
            allowed,
            remaining: next.tokens.floor() as u64,
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::store::{InMemoryBucketStore, StoreError};
    use crate::clock::{Clock, ManualClock};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    fn limiter(clock: &Arc<ManualClock>) -> (TokenBucketLimiter, Arc<InMemoryBucketStore>) {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "user".to_string(),
            TokenBucketConfig {
                capacity: 5.0,
                refill_rate_per_second: 2.0,
            },
        );
        let config = RateLimitConfig {
            default: TokenBucketConfig {
                capacity: 1.0,
                refill_rate_per_second: 1.0,
            },
            namespaces,
        };
        let store = Arc::new(InMemoryBucketStore::new(clock.clone()));
        (TokenBucketLimiter::new(config, store.clone(), clock.clone()), store)
    }

    #[tokio::test]
    async fn test_fresh_bucket_admits_up_to_capacity() {
        let clock = Arc::new(ManualClock::new());
        let (limiter, _) = limiter(&clock);

        let d = limiter.consume("user", "alice", 5).await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.retry_after, None);
    }

    #[tokio::test]
    async fn test_drained_bucket_rejects_with_retry_after() {
        let clock = Arc::new(ManualClock::new());
        let (limiter, _) = limiter(&clock);

        for _ in 0..5 {
            assert!(limiter.check("user", "alice").await.allowed);
        }
        let d = limiter.check("user", "alice").await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.retry_after, Some(Duration::from_millis(500)));
        assert_eq!(d.retry_after_secs(), Some(1));
    }

    #[tokio::test]
    async fn test_refill_is_capped_at_capacity() {
        let clock = Arc::new(ManualClock::new());
        let (limiter, store) = limiter(&clock);

        limiter.consume("user", "alice", 5).await;
        // capacity / rate = 2.5s to refill; wait far longer
        clock.advance(Duration::from_secs(2));
        let state = store.get("user", "alice").await.unwrap().unwrap();
        assert_eq!(state.tokens, 0.0);

        clock.advance(Duration::from_millis(500));
        let d = limiter.consume("user", "alice", 0).await;
        assert_eq!(d.remaining, 5);

        clock.advance(Duration::from_millis(100));
        let d = limiter.consume("user", "alice", 0).await;
        assert_eq!(d.remaining, 5);
        let state = store.get("user", "alice").await.unwrap().unwrap();
        assert_eq!(state.tokens, 5.0);
    }

    #[tokio::test]
    async fn test_rejection_still_advances_last_refill() {
        let clock = Arc::new(ManualClock::new());
        let (limiter, store) = limiter(&clock);

        limiter.consume("user", "bob", 5).await;
        clock.advance(Duration::from_millis(200));
        let before = clock.unix_millis();

        let d = limiter.consume("user", "bob", 3).await;
        assert!(!d.allowed);

        let state = store.get("user", "bob").await.unwrap().unwrap();
        assert_eq!(state.last_refill_ms, before);
        assert!((state.tokens - 0.4).abs() < 1e-9);
        let wait = d.retry_after.unwrap().as_secs_f64();
        assert!((wait - 1.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_identities_and_namespaces_are_isolated() {
        let clock = Arc::new(ManualClock::new());
        let (limiter, _) = limiter(&clock);

        assert!(limiter.consume("user", "alice", 5).await.allowed);
        assert!(limiter.check("user", "carol").await.allowed);

        // unknown namespace falls back to the default bucket (capacity 1)
        assert!(limiter.check("org", "alice").await.allowed);
        assert!(!limiter.check("org", "alice").await.allowed);
    }

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl BucketStore for BrokenStore {
        async fn get(&self, _: &str, _: &str) -> Result<Option<TokenBucketState>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn set(
            &self,
            _: &str,
            _: &str,
            _: TokenBucketState,
            _: Duration,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_decision() {
        let clock = Arc::new(ManualClock::new());
        let limiter = TokenBucketLimiter::new(
            RateLimitConfig::default(),
            Arc::new(BrokenStore),
            clock.clone(),
        );

        let d = limiter.check("user", "alice").await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 59);
    }

    #[tokio::test]
    async fn test_near_zero_refill_rate() {
        let clock = Arc::new(ManualClock::new());
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "archive".to_string(),
            TokenBucketConfig {
                capacity: 100.0,
                refill_rate_per_second: 1e-18,
            },
        );
        namespaces.insert(
            "export".to_string(),
            TokenBucketConfig {
                capacity: 10.0,
                refill_rate_per_second: 1e-18,
            },
        );
        let config = RateLimitConfig {
            namespaces,
            ..RateLimitConfig::default()
        };
        let store = Arc::new(InMemoryBucketStore::new(clock.clone()));
        let limiter = TokenBucketLimiter::new(config, store.clone(), clock.clone());

        let d = limiter.consume("archive", "alice", 40).await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 60);

        let d = limiter.consume("export", "alice", 11).await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 10);
        assert!(d.retry_after.unwrap() >= Duration::from_secs(10u64.pow(17)));

        // state is kept for at most a day
        clock.advance(MAX_BUCKET_TTL);
        assert!(store.get("archive", "alice").await.unwrap().is_none());
    }

    #[test]
    fn test_refill_math() {
        let bucket = TokenBucketConfig {
            capacity: 10.0,
            refill_rate_per_second: 4.0,
        };
        let state = TokenBucketState {
            tokens: 1.0,
            last_refill_ms: 1_000,
        };

        let (next, allowed) = refill_and_take(state, &bucket, 1_500, 3.0);
        assert!(allowed);
        assert_eq!(next.tokens, 0.0);
        assert_eq!(next.last_refill_ms, 1_500);

        // clock went backwards: no refill, no panic
        let (next, allowed) = refill_and_take(state, &bucket, 500, 1.0);
        assert!(allowed);
        assert_eq!(next.tokens, 0.0);
    }
}
