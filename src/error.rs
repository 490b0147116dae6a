//! Error types for the governor and its adapters
use std::time::Duration;

/// Errors surfaced by [`Governor`](crate::Governor) and [`RateState`](crate::RateState).
///
/// Everything else resolves through the admit/wait protocol; the core never
/// retries on the caller's behalf.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GovernorError {
    /// Non-positive or non-finite rate, or zero capacity.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
    /// The request can never be admitted in one step under the configured cap.
    #[error("request of {requested} units exceeds burst capacity {capacity}")]
    RequestExceedsCapacity { requested: u64, capacity: u64 },
    /// A bounded wait expired before admission; no tokens were consumed.
    #[error("admission wait timed out after {waited:?} (limit: {timeout:?})")]
    WaitTimedOut { waited: Duration, timeout: Duration },
}

impl GovernorError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { reason: reason.into() }
    }

    /// Check if this error is a configuration problem (fatal, not retryable).
    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration { .. })
    }

    /// Check if the request was larger than the bucket.
    pub fn is_exceeds_capacity(&self) -> bool {
        matches!(self, Self::RequestExceedsCapacity { .. })
    }

    /// Check if this error is a transient would-block (timed out wait).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimedOut { .. })
    }
}

/// Error returned by [`GovernorService`](crate::layer::GovernorService).
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError<E> {
    /// Admission failed before the inner service was called.
    #[error(transparent)]
    Governor(#[from] GovernorError),
    /// The underlying service failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> ThrottleError<E> {
    /// Check if admission timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Governor(e) if e.is_timeout())
    }

    /// Borrow the governor error if present.
    pub fn as_governor(&self) -> Option<&GovernorError> {
        match self {
            Self::Governor(e) => Some(e),
            Self::Inner(_) => None,
        }
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Governor(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn exceeds_capacity_display() {
        let err = GovernorError::RequestExceedsCapacity { requested: 200, capacity: 100 };
        let msg = err.to_string();
        assert!(msg.contains("200"));
        assert!(msg.contains("100"));
        assert!(err.is_exceeds_capacity());
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_display_includes_durations() {
        let err = GovernorError::WaitTimedOut {
            waited: Duration::from_millis(510),
            timeout: Duration::from_millis(500),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("500ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn misconfiguration_predicate() {
        let err = GovernorError::invalid("target_rate must be > 0 (got 0)");
        assert!(err.is_misconfiguration());
        assert!(err.to_string().starts_with("invalid configuration"));
    }

    #[test]
    fn throttle_error_accessors() {
        let gov: ThrottleError<io::Error> = GovernorError::WaitTimedOut {
            waited: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert!(gov.is_timeout());
        assert!(gov.as_governor().is_some());
        assert!(gov.into_inner().is_none());

        let inner: ThrottleError<io::Error> =
            ThrottleError::Inner(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(!inner.is_timeout());
        assert_eq!(inner.to_string(), "boom");
        assert_eq!(inner.into_inner().map(|e| e.to_string()), Some("boom".to_string()));
    }
}
