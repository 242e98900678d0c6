//! The wire-level event types: the immutable, enriched [`Event`] read from the
//! store and the invariant-bearing [`EventCandidate`] written to it.

use crate::subject::Subject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, globally unique, monotonically assigned event identifier.
///
/// `EventId` is a newtype over `String` rather than an integer: the store is
/// free to use any monotonic scheme (ULIDs, snowflake IDs, …) and the core
/// never needs to parse or construct one, only compare, order and carry it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Wrap a raw store-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An event as read from the store: the invariant-bearing fields of an
/// [`EventCandidate`] plus every enrichment attribute the store assigns on
/// write.
///
/// `data` is kept as an opaque [`serde_json::Value`] at this layer; decoding
/// it into a typed payload plus metadata is the job of the event data
/// marshaller (`core::event_data`), which runs after upcasting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Logical origin of the event, e.g. `"tag://my-service"`.
    pub source: String,
    /// The subject this event is recorded against.
    pub subject: Subject,
    /// The version-bearing wire type string, e.g. `"book.added.v1"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The envelope `{"metadata": …, "payload": …}` (see `core::event_data`).
    pub data: serde_json::Value,
    /// CloudEvents spec version, e.g. `"1.0"`.
    pub spec_version: String,
    /// Globally unique, monotonically assigned identifier.
    pub id: EventId,
    /// When the store accepted the write.
    pub time: DateTime<Utc>,
    /// MIME type of `data`, e.g. `"application/json"`.
    pub data_content_type: String,
    /// Tamper-evidence hash of this event. May be absent on a write response.
    pub hash: Option<String>,
    /// Hash of the event immediately preceding this one in the store's total
    /// order, chaining events for tamper evidence.
    pub predecessor_hash: Option<String>,
}

/// The invariant-bearing subset of an event, submitted for write.
///
/// Enrichment attributes (`id`, `time`, `hash`, …) do not exist yet; they are
/// assigned by the store and returned in the corresponding [`Event`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventCandidate {
    /// Logical origin of the event.
    pub source: String,
    /// The subject this event is recorded against.
    pub subject: Subject,
    /// The version-bearing wire type string.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The envelope `{"metadata": …, "payload": …}`.
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_field_is_serialized_as_type() {
        let candidate = EventCandidate {
            source: "tag://t".into(),
            subject: Subject::root(),
            event_type: "book.added.v1".into(),
            data: serde_json::json!({"metadata": {}, "payload": {}}),
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["type"], "book.added.v1");
        assert!(json.get("event_type").is_none());
    }

    #[test]
    fn event_bit_significant_fields_are_camel_case_on_the_wire() {
        let event = Event {
            source: "tag://t".into(),
            subject: Subject::root(),
            event_type: "book.added.v1".into(),
            data: serde_json::json!({"metadata": {}, "payload": {}}),
            spec_version: "1.0".into(),
            id: EventId::new("e1"),
            time: DateTime::UNIX_EPOCH,
            data_content_type: "application/json".into(),
            hash: Some("h1".into()),
            predecessor_hash: Some("h0".into()),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["specVersion"], "1.0");
        assert_eq!(json["dataContentType"], "application/json");
        assert_eq!(json["predecessorHash"], "h0");
        assert!(json.get("spec_version").is_none());
        assert!(json.get("data_content_type").is_none());
        assert!(json.get("predecessor_hash").is_none());

        let wire = serde_json::json!({
            "source": "tag://t",
            "subject": "/",
            "type": "book.added.v1",
            "data": {"metadata": {}, "payload": {}},
            "specVersion": "1.0",
            "id": "e1",
            "time": "1970-01-01T00:00:00Z",
            "dataContentType": "application/json",
            "hash": "h1",
            "predecessorHash": "h0",
        });
        let decoded: Event = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, event);
    }
}
