// =============================================================================
// error.rs — THE TAXONOMY
// =============================================================================
//
// Every error that can happen anywhere in this pipeline collapses into one
// of seven kinds. The kind, not the message, is what the job queue and the
// workflow layer actually branch on: Validation never retries, NotFound ends
// a job COMPLETED instead of FAILED, TransientTransport gets backed off and
// tried again. Keep new error sites mapping into this enum rather than
// growing a new ad-hoc variant per module.
// =============================================================================

use thiserror::Error;

/// The seven error kinds the rest of the system reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    /// Bad input from a caller: malformed CIK, accession, ticker, out-of-range threshold.
    /// Never retried.
    Validation,
    /// The thing asked for doesn't exist. Jobs that hit this mid-workflow finish
    /// COMPLETED with `{ notFound: true }`, not FAILED.
    NotFound,
    /// 429 from upstream, or our own limiter gave up waiting. Handled with
    /// backoff internally; if retries exhaust it's reclassified as transient.
    RateLimited,
    /// Timeouts, 5xx, DNS failures. Retried by the queue up to `maxRetries`.
    TransientTransport,
    /// A provider's response didn't parse or failed validation. Skip it, try
    /// the next one in the chain.
    ProviderMalformed,
    /// Every provider in the chain failed. Caller may still get stale data.
    AllProvidersUnavailable,
    /// An invariant broke. Fatal for the current job; the rest of the
    /// pipeline keeps running.
    Internal,
    /// A blocking point (rate limiter, HTTP client) was interrupted by
    /// shutdown rather than by anything the job did. Rescheduled straight
    /// back to PENDING a second out, not run through the backoff ladder.
    Cancelled,
}

/// The crate-wide error type. Every component-specific error (`FetchError`,
/// `QuoteError`, `StoreError`, ...) maps into one of these through `From`,
/// so the job queue can decide retry-vs-terminal from `.kind()` alone.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient transport error: {0}")]
    TransientTransport(String),

    #[error("provider returned malformed data: {0}")]
    ProviderMalformed(String),

    #[error("all providers unavailable: attempted {attempted:?}")]
    AllProvidersUnavailable { attempted: Vec<String> },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::RateLimited(_) => ErrorKind::RateLimited,
            CoreError::TransientTransport(_) => ErrorKind::TransientTransport,
            CoreError::ProviderMalformed(_) => ErrorKind::ProviderMalformed,
            CoreError::AllProvidersUnavailable { .. } => ErrorKind::AllProvidersUnavailable,
            CoreError::Internal(_) => ErrorKind::Internal,
            CoreError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Whether the job queue should retry a job that failed with this error,
    /// independent of remaining retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::TransientTransport
        )
    }

    /// Whether this error came from a blocking point being interrupted by
    /// shutdown rather than from the job itself failing. The queue reschedules
    /// these without touching `retry_count`.
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".into()),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            CoreError::TransientTransport(e.to_string())
        } else if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                CoreError::RateLimited(e.to_string())
            } else if status.is_server_error() {
                CoreError::TransientTransport(e.to_string())
            } else if status.as_u16() == 404 {
                CoreError::NotFound(e.to_string())
            } else {
                CoreError::Validation(e.to_string())
            }
        } else {
            CoreError::TransientTransport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::ProviderMalformed(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_and_transient_are_retryable() {
        assert!(CoreError::RateLimited("x".into()).is_retryable());
        assert!(CoreError::TransientTransport("x".into()).is_retryable());
    }

    #[test]
    fn validation_and_not_found_are_terminal() {
        assert!(!CoreError::Validation("x".into()).is_retryable());
        assert!(!CoreError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found_kind() {
        let e: CoreError = sqlx::Error::RowNotFound.into();
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn cancelled_is_its_own_kind_and_not_retryable() {
        let e = CoreError::Cancelled("shutting down".into());
        assert!(e.is_cancellation());
        assert!(!e.is_retryable());
    }
}
