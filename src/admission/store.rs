//! Token bucket persistence.
//!
//! Bucket state lives outside the process so several instances share one
//! view of each caller's budget. [`BucketStore`] is that boundary; the
//! in-memory implementation serializes state the same way a shared
//! key-value store would.

use std::fmt::Debug;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::SharedClock;

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub tokens: f64,
    /// Wall-clock time of the last refill, in Unix milliseconds.
    pub last_refill_ms: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt bucket state: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// External key-value storage for bucket state.
///
/// Absence of state is `Ok(None)`, never an error.
#[async_trait]
pub trait BucketStore: Send + Sync + Debug {
    async fn get(&self, namespace: &str, identity: &str)
        -> Result<Option<TokenBucketState>, StoreError>;

    async fn set(
        &self,
        namespace: &str,
        identity: &str,
        state: TokenBucketState,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Drop expired state. Returns how many entries were removed.
    ///
    /// Stores with native expiry have nothing to do.
    fn purge_expired(&self) -> usize {
        0
    }
}

/// Storage key for a bucket.
///
/// `:` and `\` inside the parts are backslash-escaped so distinct
/// `(namespace, identity)` pairs never share a key.
pub fn bucket_key(namespace: &str, identity: &str) -> String {
    format!(
        "ratelimit:{}:{}",
        escape_key_part(namespace),
        escape_key_part(identity)
    )
}

fn escape_key_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if c == ':' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Longest time the in-memory store keeps an entry.
const MAX_ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct StoredEntry {
    payload: String,
    expires_at: Instant,
}

/// Process-local store with TTL expiry.
#[derive(Debug)]
pub struct InMemoryBucketStore {
    entries: DashMap<String, StoredEntry>,
    clock: SharedClock,
}

impl InMemoryBucketStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, including any not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn get(
        &self,
        namespace: &str,
        identity: &str,
    ) -> Result<Option<TokenBucketState>, StoreError> {
        let key = bucket_key(namespace, identity);
        let now = self.clock.now();

        let cached = self
            .entries
            .get(&key)
            .map(|entry| (entry.payload.clone(), entry.expires_at));
        let Some((payload, expires_at)) = cached else {
            return Ok(None);
        };

        if expires_at <= now {
            self.entries.remove_if(&key, |_, entry| entry.expires_at <= now);
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn set(
        &self,
        namespace: &str,
        identity: &str,
        state: TokenBucketState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&state)?;
        let now = self.clock.now();
        let expires_at = now.checked_add(ttl.min(MAX_ENTRY_TTL)).unwrap_or(now);
        self.entries.insert(
            bucket_key(namespace, identity),
            StoredEntry {
                payload,
                expires_at,
            },
        );
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Purged expired buckets");
        }
        removed
    }
}
