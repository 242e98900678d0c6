//! The two-level error taxonomy shared by every layer of the core.
//!
//! Per the design notes, the many HTTP/marshalling/usage failure modes
//! collapse into exactly two tags: [`CoreError::Transient`] (worth retrying)
//! and [`CoreError::NonTransient`] (not worth retrying). [`TransientKind::ConcurrencyViolation`]
//! is a distinct transient case: it is retryable, but only by a caller that
//! rebuilds state first (a bare retry of the same write will fail again).

use crate::subject::Subject;
use thiserror::Error;

/// Transient failure categories: retryable without changing the request.
#[derive(Error, Debug, Clone)]
pub enum TransientKind {
    /// An optimistic-concurrency precondition was violated (HTTP 409).
    ///
    /// Distinct from the other transient kinds: a bare retry will fail again
    /// unless the caller first rebuilds state and recomputes preconditions.
    #[error("concurrency violation on subject {subject}")]
    ConcurrencyViolation {
        /// The subject whose precondition was violated.
        subject: Subject,
    },

    /// HTTP 408 or 5xx, or a connection/DNS/TLS failure.
    #[error("transient transport failure: {0}")]
    HttpTransient(String),

    /// Lower-level transport failure (connect, DNS, TLS) surfaced separately
    /// from HTTP transients for diagnostics; treated identically for retry.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The operation was interrupted (cooperative cancellation) while
    /// waiting on I/O, not while committing progress.
    #[error("interrupted")]
    Interrupted,
}

/// Non-transient failure categories: retrying the same request will not help.
#[derive(Error, Debug, Clone)]
pub enum NonTransientKind {
    /// HTTP 4xx other than 408 (timeout) and 409 (concurrency).
    #[error("permanent HTTP failure: {status}: {message}")]
    HttpPermanent {
        /// The HTTP status code.
        status: u16,
        /// The response body or reason phrase.
        message: String,
    },

    /// Request/response body failed to encode or decode.
    #[error("marshalling failure: {0}")]
    Marshalling(String),

    /// A locally-detected invalid combination of request options (mutually
    /// exclusive bounds, `Order`/`UpperBound*` paired with `observe`, …).
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// No registered type maps to, or ambiguously maps to, a payload class
    /// or wire type string.
    #[error("type resolution failure: {0}")]
    TypeResolution(String),

    /// More than one upcaster claimed the same event, or the chain failed to
    /// reach a fixed point within its iteration bound.
    #[error("ambiguous or divergent upcasting: {0}")]
    Ambiguous(String),

    /// A `subjectCondition` check failed: the subject was expected to be
    /// pristine but already has events.
    #[error("subject already exists: {subject}")]
    SubjectAlreadyExists {
        /// The subject that was expected to be pristine.
        subject: Subject,
    },

    /// A `subjectCondition` check failed: the subject was expected to exist
    /// but has no events.
    #[error("subject does not exist: {subject}")]
    SubjectDoesNotExist {
        /// The subject that was expected to already have events.
        subject: Subject,
    },
}

/// The error type shared by every core subsystem.
///
/// HTTP controllers (an external collaborator) are expected to map
/// `Transient` to 409/503, `NonTransient` to 500, `SubjectDoesNotExist` to
/// 404, and `SubjectAlreadyExists` to 409 — see spec §7.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A retryable failure.
    #[error(transparent)]
    Transient(#[from] TransientKind),

    /// A non-retryable failure.
    #[error(transparent)]
    NonTransient(#[from] NonTransientKind),
}

impl CoreError {
    /// Shorthand for [`TransientKind::ConcurrencyViolation`].
    #[must_use]
    pub fn concurrency_violation(subject: Subject) -> Self {
        Self::Transient(TransientKind::ConcurrencyViolation { subject })
    }

    /// Whether this error is (plainly) retryable, i.e. `Transient` and not a
    /// `ConcurrencyViolation` that requires a state rebuild first.
    #[must_use]
    pub fn is_plainly_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(TransientKind::HttpTransient(_) | TransientKind::TransportError(_))
        )
    }

    /// Whether this error is a concurrency violation.
    #[must_use]
    pub fn is_concurrency_violation(&self) -> bool {
        matches!(
            self,
            Self::Transient(TransientKind::ConcurrencyViolation { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_violation_is_transient_but_not_plainly_retryable() {
        let err = CoreError::concurrency_violation(Subject::root());
        assert!(err.is_concurrency_violation());
        assert!(!err.is_plainly_retryable());
    }

    #[test]
    fn http_transient_is_plainly_retryable() {
        let err = CoreError::Transient(TransientKind::HttpTransient("timeout".into()));
        assert!(err.is_plainly_retryable());
        assert!(!err.is_concurrency_violation());
    }

    #[test]
    fn non_transient_is_never_retryable() {
        let err = CoreError::NonTransient(NonTransientKind::Marshalling("bad json".into()));
        assert!(!err.is_plainly_retryable());
        assert!(!err.is_concurrency_violation());
    }
}
