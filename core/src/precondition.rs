//! Atomic-write preconditions enforced by the store.
//!
//! A [`Precondition`] is a predicate the store must check and enforce
//! atomically alongside a write; violation surfaces as
//! [`crate::error::TransientKind::ConcurrencyViolation`]. Multiple
//! preconditions on one write compose by conjunction: all must hold.

use crate::event::EventId;
use crate::subject::Subject;
use serde::{Deserialize, Serialize};

/// A predicate the store enforces atomically with a write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Precondition {
    /// No event exists for `subject` yet.
    #[serde(rename = "isSubjectPristine")]
    SubjectIsPristine {
        /// The subject that must have no events.
        subject: Subject,
    },
    /// The latest event on `subject` has exactly `event_id`.
    #[serde(rename = "isSubjectOnEventId")]
    SubjectIsOnEventId {
        /// The subject whose latest event is being asserted.
        subject: Subject,
        /// The expected latest event id.
        #[serde(rename = "eventId")]
        event_id: EventId,
    },
}

impl Precondition {
    /// Construct a pristine-subject precondition.
    #[must_use]
    pub fn pristine(subject: Subject) -> Self {
        Self::SubjectIsPristine { subject }
    }

    /// Construct an on-event-id precondition.
    #[must_use]
    pub fn on_event_id(subject: Subject, event_id: EventId) -> Self {
        Self::SubjectIsOnEventId { subject, event_id }
    }

    /// The subject this precondition is about.
    #[must_use]
    pub fn subject(&self) -> &Subject {
        match self {
            Self::SubjectIsPristine { subject } | Self::SubjectIsOnEventId { subject, .. } => {
                subject
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pristine_precondition_wire_shape() {
        let precondition = Precondition::pristine(Subject::new("/books/X").unwrap());
        let json = serde_json::to_value(&precondition).unwrap();
        assert_eq!(json["type"], "isSubjectPristine");
        assert_eq!(json["payload"]["subject"], "/books/X");
    }

    #[test]
    fn on_event_id_precondition_wire_shape() {
        let precondition = Precondition::on_event_id(
            Subject::new("/books/X").unwrap(),
            EventId::new("evt-1"),
        );
        let json = serde_json::to_value(&precondition).unwrap();
        assert_eq!(json["type"], "isSubjectOnEventId");
        assert_eq!(json["payload"]["subject"], "/books/X");
        assert_eq!(json["payload"]["eventId"], "evt-1");
    }
}
