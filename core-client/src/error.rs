//! HTTP status → core error category mapping (spec §4.2).

use cqrs_es_core::{CoreError, NonTransientKind, Subject, TransientKind};
use reqwest::StatusCode;

/// Map a completed HTTP response's status into the two-level error taxonomy.
///
/// Returns `None` for `200..300`, i.e. "not an error". `subject` is supplied
/// by the caller because only a write/read/observe call, not the HTTP layer,
/// knows which subject a 409 was about.
#[must_use]
pub fn map_status(status: StatusCode, subject: &Subject, body: &str) -> Option<CoreError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::REQUEST_TIMEOUT => CoreError::Transient(TransientKind::HttpTransient(
            format!("{status}: {body}"),
        )),
        StatusCode::CONFLICT => CoreError::Transient(TransientKind::ConcurrencyViolation {
            subject: subject.clone(),
        }),
        s if s.is_server_error() => {
            CoreError::Transient(TransientKind::HttpTransient(format!("{status}: {body}")))
        }
        s if s.is_client_error() => CoreError::NonTransient(NonTransientKind::HttpPermanent {
            status: status.as_u16(),
            message: body.to_string(),
        }),
        _ => CoreError::NonTransient(NonTransientKind::HttpPermanent {
            status: status.as_u16(),
            message: body.to_string(),
        }),
    })
}

/// Map a `reqwest` transport-level failure (connect/DNS/TLS, request build).
#[must_use]
pub fn map_transport_error(err: &reqwest::Error) -> CoreError {
    CoreError::Transient(TransientKind::TransportError(err.to_string()))
}
