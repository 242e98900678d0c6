//! Event Data Marshaller: encode/decode a domain payload plus meta-data
//! inside an event's opaque `data` field.
//!
//! The wire shape is fixed by the interop contract: `{"metadata": …,
//! "payload": …}`. Implementations MUST use exactly these two field names
//! (spec §3, §6) — [`EventData`] enforces this via its `Serialize`/
//! `Deserialize` derive, so no hand-written marshalling code can drift from
//! it.

use crate::error::{CoreError, NonTransientKind};
use crate::precondition::Precondition;
use crate::subject::Subject;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form event meta-data: correlation ids, causation ids, the acting
/// user, and similar cross-cutting attributes that are not part of the
/// domain payload itself.
pub type MetaData = HashMap<String, serde_json::Value>;

/// The ordered pair `(metaData, payload)` serialized into an event's `data`
/// field as `{"metadata": …, "payload": …}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventData<P> {
    /// Free-form meta-data accompanying the payload.
    pub metadata: MetaData,
    /// The domain payload.
    pub payload: P,
}

impl<P> EventData<P> {
    /// Construct event data with no meta-data.
    #[must_use]
    pub fn new(payload: P) -> Self {
        Self {
            metadata: MetaData::new(),
            payload,
        }
    }

    /// Construct event data with explicit meta-data.
    #[must_use]
    pub const fn with_metadata(metadata: MetaData, payload: P) -> Self {
        Self { metadata, payload }
    }
}

impl<P: Serialize> EventData<P> {
    /// Serialize into the `data` envelope `{"metadata": …, "payload": …}`.
    ///
    /// # Errors
    ///
    /// Returns [`NonTransientKind::Marshalling`] if `payload` cannot be
    /// encoded as JSON (this can only happen for payload types with a
    /// non-string map key, since this is otherwise infallible for
    /// `Serialize` implementors).
    pub fn serialize(&self) -> Result<serde_json::Value, CoreError> {
        serde_json::to_value(self)
            .map_err(|e| CoreError::NonTransient(NonTransientKind::Marshalling(e.to_string())))
    }
}

impl<P: DeserializeOwned> EventData<P> {
    /// Deserialize from the `data` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`NonTransientKind::Marshalling`] if `data` is not shaped as
    /// `{"metadata": …, "payload": …}` or the payload does not match `P`.
    pub fn deserialize(data: &serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(data.clone())
            .map_err(|e| CoreError::NonTransient(NonTransientKind::Marshalling(e.to_string())))
    }
}

/// An in-flight publication intent captured during command handling, not yet
/// sent to the store.
///
/// Captured events exist only for the duration of a single command
/// invocation: if the handler returns an error, the buffer they were
/// accumulated into is discarded (spec §4.7 invariants).
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// The subject this event will be published against.
    pub subject: Subject,
    /// The wire type string, resolved from the payload's concrete type at
    /// capture time (before the payload's type is erased to JSON).
    pub event_type: String,
    /// The domain payload, already encoded to JSON (the payload's concrete
    /// type is erased once captured, so the Command Router can buffer
    /// captured events of differing payload types in one publication).
    pub payload: serde_json::Value,
    /// Meta-data to accompany the payload.
    pub metadata: MetaData,
    /// Preconditions to fold into the eventual atomic write, in addition to
    /// the ones the Command Router derives from the rebuilt state.
    pub preconditions: Vec<Precondition>,
}

impl CapturedEvent {
    /// Capture an event with no additional preconditions.
    #[must_use]
    pub fn new(
        subject: Subject,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        metadata: MetaData,
    ) -> Self {
        Self {
            subject,
            event_type: event_type.into(),
            payload,
            metadata,
            preconditions: Vec::new(),
        }
    }

    /// Capture an event carrying additional preconditions.
    #[must_use]
    pub fn with_preconditions(
        subject: Subject,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        metadata: MetaData,
        preconditions: Vec<Precondition>,
    ) -> Self {
        Self {
            subject,
            event_type: event_type.into(),
            payload,
            metadata,
            preconditions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct BookAdded {
        isbn: String,
    }

    #[test]
    fn envelope_uses_exact_field_names() {
        let data = EventData::new(BookAdded {
            isbn: "X".to_string(),
        });
        let json = data.serialize().unwrap();
        assert!(json.get("metadata").is_some());
        assert!(json.get("payload").is_some());
        assert_eq!(json["payload"]["isbn"], "X");
    }

    #[test]
    fn roundtrip_preserves_payload_and_metadata() {
        let mut metadata = MetaData::new();
        metadata.insert("correlationId".to_string(), serde_json::json!("corr-1"));

        let original = EventData::with_metadata(
            metadata.clone(),
            BookAdded {
                isbn: "X".to_string(),
            },
        );

        let wire = original.serialize().unwrap();
        let decoded: EventData<BookAdded> = EventData::deserialize(&wire).unwrap();

        assert_eq!(decoded.payload, original.payload);
        assert_eq!(decoded.metadata, metadata);
    }

    #[test]
    fn rejects_malformed_envelope() {
        let malformed = serde_json::json!({"isbn": "X"});
        let result: Result<EventData<BookAdded>, _> = EventData::deserialize(&malformed);
        assert!(result.is_err());
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_is_identity_for_arbitrary_isbn_and_correlation_id(
            isbn in "[a-zA-Z0-9-]{0,32}",
            correlation_id in "[a-zA-Z0-9-]{0,32}",
        ) {
            let mut metadata = MetaData::new();
            metadata.insert("correlationId".to_string(), serde_json::json!(correlation_id));

            let original = EventData::with_metadata(metadata, BookAdded { isbn });
            let wire = original.serialize().unwrap();
            let decoded: EventData<BookAdded> = EventData::deserialize(&wire).unwrap();

            proptest::prop_assert_eq!(decoded.payload, original.payload);
            proptest::prop_assert_eq!(decoded.metadata, original.metadata);
        }
    }
}
