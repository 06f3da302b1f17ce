//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures as retryable (status, error code, or explicit tag)
//! - Execute retries with exponential backoff + jitter
//! - Abort promptly on cancellation, including mid-backoff
//!
//! # Design Decisions
//! - Stateless: a config plus an optional observer, cloned freely
//! - Non-retryable failures propagate on the attempt that produced them
//! - Exhaustion wraps the last error with attempt count and elapsed time
//! - Compose around a single breaker call so an open circuit still fails fast

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::error::Classify;

/// Observer invoked before each retry with the failed attempt number, its
/// error, and the delay that was waited.
pub type OnRetry = Arc<dyn Fn(u32, &(dyn StdError + 'static), Duration) + Send + Sync>;

/// A successful result and how long it took to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// 1-based index of the attempt that succeeded.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E: StdError + 'static> {
    /// Not retryable; returned as-is from the attempt that produced it.
    #[error(transparent)]
    Permanent(E),

    #[error("retries exhausted after {attempts} attempts in {elapsed:?}")]
    Exhausted {
        #[source]
        last: E,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E: StdError + 'static> RetryError<E> {
    /// The underlying error, if any attempt produced one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Permanent(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Permanent(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Runs operations with backoff retry.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    on_retry: Option<OnRetry>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            on_retry: None,
        }
    }

    pub fn with_on_retry<F>(mut self, on_retry: F) -> Self
    where
        F: Fn(u32, &(dyn StdError + 'static), Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(on_retry));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether a failure is worth another attempt under this config.
    pub fn is_retryable<E: Classify + ?Sized>(&self, error: &E) -> bool {
        if error.is_tagged_retryable() {
            return true;
        }
        if let Some(status) = error.status() {
            if self.config.retryable_statuses.contains(&status) {
                return true;
            }
        }
        match error.code() {
            Some(code) => self.config.retryable_error_codes.contains(code),
            None => false,
        }
    }

    /// Run `f` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires.
    pub async fn run<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Classify + 'static,
    {
        let start = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
                result = f() => result,
            };

            let err = match result {
                Ok(value) => {
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    })
                }
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                tracing::debug!(attempt, error = %err, "Non-retryable failure");
                return Err(RetryError::Permanent(err));
            }

            if attempt >= max_attempts {
                let elapsed = start.elapsed();
                tracing::warn!(attempts = attempt, elapsed = ?elapsed, error = %err, "Retries exhausted");
                metrics::record_retry_exhausted();
                return Err(RetryError::Exhausted {
                    last: err,
                    attempts: attempt,
                    elapsed,
                });
            }

            let delay = calculate_backoff(
                attempt,
                self.config.base_delay(),
                self.config.max_delay(),
                self.config.jitter_full,
            );
            tracing::info!(attempt, delay = ?delay, error = %err, "Retrying after failure");
            metrics::record_retry(attempt);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(on_retry) = &self.on_retry {
                on_retry(attempt, &err, delay);
            }
        }
    }
}

/// Run `f` with retries under `config`.
pub async fn run_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    f: F,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StdError + Classify + 'static,
{
    RetryExecutor::new(config.clone()).run(cancel, f).await
}
