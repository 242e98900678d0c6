//! Declared-order composition of [`StateRebuildingHandler`]s for one state
//! type, keyed by the wire event type each handler applies to.

use cqrs_es_core::{CoreError, Event, EventData, StateRebuildingHandler, Subject};
use serde::de::DeserializeOwned;
use std::sync::Arc;

type ApplyFn<S> = Box<
    dyn Fn(Option<S>, &serde_json::Value, &Subject, &Event) -> Result<S, CoreError> + Send + Sync,
>;

struct Entry<S> {
    event_type: String,
    apply: ApplyFn<S>,
}

/// Applies every registered [`StateRebuildingHandler`] matching an event's
/// wire type, in registration order, to fold rebuilt events into a state
/// value.
///
/// Registration order is the deciding order when more than one handler
/// matches the same event type (spec §9 Design Notes, Open Question:
/// confirmed as declared registration order, not reopened).
pub struct StateRebuilder<S> {
    entries: Vec<Entry<S>>,
}

impl<S> StateRebuilder<S>
where
    S: 'static,
{
    /// An empty rebuilder (no event folds into any state; useful for a
    /// `SourcingMode::None` command handler).
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a handler for events of wire type `event_type`.
    #[must_use]
    pub fn on<E, H>(mut self, event_type: impl Into<String>, handler: H) -> Self
    where
        E: DeserializeOwned + 'static,
        H: StateRebuildingHandler<E, S> + 'static,
    {
        let handler = Arc::new(handler);
        self.entries.push(Entry {
            event_type: event_type.into(),
            apply: Box::new(move |state, data, subject, raw_event| {
                let event_data = EventData::<E>::deserialize(data)?;
                Ok(handler.apply(
                    state,
                    &event_data.payload,
                    &event_data.metadata,
                    subject,
                    raw_event,
                ))
            }),
        });
        self
    }

    /// Fold `data` (the upcasted event's `data` envelope) of wire type
    /// `event_type` into `state`, applying every matching handler in
    /// registration order.
    ///
    /// `subject` is the subject `raw_event` was actually recorded on (under
    /// recursive sourcing this may differ from the state's own subject);
    /// `raw_event` is the event as read from the store, before upcasting.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(Marshalling)` if a matching handler's payload
    /// type cannot be deserialized from `data`.
    pub fn apply(
        &self,
        state: Option<S>,
        event_type: &str,
        data: &serde_json::Value,
        subject: &Subject,
        raw_event: &Event,
    ) -> Result<Option<S>, CoreError> {
        let mut state = state;
        for entry in self.entries.iter().filter(|e| e.event_type == event_type) {
            state = Some((entry.apply)(state, data, subject, raw_event)?);
        }
        Ok(state)
    }
}

impl<S: 'static> Default for StateRebuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
