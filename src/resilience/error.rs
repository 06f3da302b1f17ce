//! Error taxonomy for guarded calls.
//!
//! Wrapped dependency calls may fail with any error type; the retry executor
//! only needs to know whether a failure is worth repeating, which it learns
//! through [`Classify`].

use std::time::Duration;

use thiserror::Error;

/// Boxed error for opaque dependency failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Retry classification of a failure.
///
/// All methods default to "nothing known", which makes a failure
/// non-retryable unless a status, code or tag says otherwise.
pub trait Classify {
    /// HTTP status carried by the failure.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Short error code (e.g. `ECONNRESET`) carried by the failure.
    fn code(&self) -> Option<&str> {
        None
    }

    /// Explicitly marked as retryable by the caller.
    fn is_tagged_retryable(&self) -> bool {
        false
    }
}

/// A failure from an HTTP-style external dependency.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DependencyError {
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub retryable: bool,
    #[source]
    pub source: Option<BoxError>,
}

impl DependencyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
            retryable: false,
            source: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Classify for DependencyError {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn is_tagged_retryable(&self) -> bool {
        self.retryable
    }
}

/// The breaker rejected a call without attempting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is open ({failure_count} recent failures, open for {open_for:?})")]
pub struct CircuitOpenError {
    pub name: String,
    pub failure_count: usize,
    pub open_for: Duration,
}

/// Outcome of a call through a circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    #[error("call cancelled")]
    Cancelled,

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// The dependency's own error, if the call was attempted and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }
}

// An open circuit is never retried: repeated attempts would only hit the
// same fast-fail until the half-open timeout.
impl<E: Classify> Classify for BreakerError<E> {
    fn status(&self) -> Option<u16> {
        match self {
            BreakerError::Inner(e) => e.status(),
            _ => None,
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            BreakerError::Inner(e) => e.code(),
            _ => None,
        }
    }

    fn is_tagged_retryable(&self) -> bool {
        match self {
            BreakerError::Inner(e) => e.is_tagged_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_builder() {
        let err = DependencyError::new("upstream said no")
            .with_status(503)
            .with_code("ECONNRESET");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.code(), Some("ECONNRESET"));
        assert!(!err.is_tagged_retryable());
        assert_eq!(err.to_string(), "upstream said no");
    }

    #[test]
    fn test_breaker_error_delegates_classification() {
        let inner: BreakerError<DependencyError> =
            BreakerError::Inner(DependencyError::new("x").with_status(502).retryable());
        assert_eq!(inner.status(), Some(502));
        assert!(inner.is_tagged_retryable());

        let open: BreakerError<DependencyError> = BreakerError::Open(CircuitOpenError {
            name: "api".into(),
            failure_count: 3,
            open_for: Duration::from_secs(1),
        });
        assert!(open.is_open());
        assert_eq!(open.status(), None);
        assert!(!open.is_tagged_retryable());
    }
}
