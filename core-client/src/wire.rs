//! Wire request/response bodies, kept separate from the domain types in
//! `cqrs-es-core` so the store's exact JSON shape can evolve independently
//! of the in-process `Event`/`EventCandidate` representation.

use crate::options::Options;
use cqrs_es_core::{Event, EventCandidate, Precondition};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/write-events`.
#[derive(Serialize)]
pub struct WriteRequest {
    pub events: Vec<EventCandidate>,
    pub preconditions: Vec<Precondition>,
}

/// Body of `POST /api/v1/read-events` and `POST /api/v1/observe-events`.
#[derive(Serialize)]
pub struct SubjectRequest {
    pub subject: String,
    pub options: Options,
}

/// Response of `POST /api/v1/write-events`.
#[derive(Deserialize)]
pub struct WriteResponse {
    pub events: Vec<Event>,
}

/// Response of `GET /api/v1/health`.
#[derive(Clone, Debug, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(default)]
    pub checks: Vec<serde_json::Value>,
}

/// The `status` field of a health response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Pass,
    Warn,
    Fail,
}

/// One NDJSON line from a `read`/`observe` stream, discriminated by `type`.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamLine {
    /// A keep-alive line the marshalling layer consumes without forwarding
    /// it to the caller's consumer.
    Heartbeat,
    /// A payload line carrying one event.
    Event {
        payload: Event,
    },
}
