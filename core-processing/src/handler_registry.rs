//! Declared-order registry of Event Handler Definitions for one processing
//! group, supporting the three dispatch variants from spec §4.8: handler-for
//! -object, handler-for-object-and-metadata, and
//! handler-for-object-and-metadata-and-raw, plus the transactional variant
//! from spec §4.8.d / §5.
//!
//! The transactional variant is grounded on the corpus's
//! `TransactionalEventHandler<A, Error, Conn>::handle(&self, event, &mut
//! transaction)` pattern (`primait/event_sourcing`'s Postgres store): rather
//! than committing its own work, a transactional handler is handed the
//! still-open connection the processor's progress-advance will also commit
//! against.

use cqrs_es_core::{CoreError, Event, EventData, MetaData};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Registering a handler against this wire type matches every event,
/// mirroring the origin's "a declared object type of the root value means
/// match all events".
pub const MATCH_ALL: &str = "*";

type DispatchFn = Box<dyn Fn(&Event, &serde_json::Value) -> Result<(), CoreError> + Send + Sync>;

type TxDispatchFn = Box<
    dyn for<'c> Fn(
            &'c Event,
            &'c serde_json::Value,
            &'c mut sqlx::PgConnection,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'c>>
        + Send
        + Sync,
>;

struct Entry {
    event_type: String,
    dispatch: DispatchFn,
}

struct TxEntry {
    event_type: String,
    dispatch: TxDispatchFn,
}

/// An Event Handler Definition that enlists its own side effect in the same
/// external transaction the processor's progress-advance commits through,
/// rather than running (and committing) before or after it.
///
/// Declaring a handler transactional is an opt-in: it can only be dispatched
/// by a [`ProgressTracker`](crate::progress::ProgressTracker) that supports
/// [`proceed_transactional`](crate::progress::ProgressTracker::proceed_transactional);
/// the in-memory tracker does not, so transactional handlers are only usable
/// against the `PostgreSQL` tracker.
pub trait TransactionalEventHandler<P>: Send + Sync {
    /// Run this handler's effect against `tx`, the processor's open
    /// transaction. Neither this effect nor the progress-advance commits
    /// until both have returned `Ok`.
    ///
    /// # Errors
    ///
    /// Any error here aborts the whole transaction (including the
    /// progress-advance).
    fn handle<'a>(
        &'a self,
        payload: &'a P,
        metadata: &'a MetaData,
        raw: &'a Event,
        tx: &'a mut sqlx::PgConnection,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>>;
}

/// An ordered set of Event Handler Definitions, applied to a matching
/// upcasted event in declared registration order — the same composition
/// discipline `StateRebuilder` uses for state-rebuilding handlers.
#[derive(Default)]
pub struct EventHandlerRegistry {
    entries: Vec<Entry>,
    transactional_entries: Vec<TxEntry>,
}

impl EventHandlerRegistry {
    /// An empty registry (no handler matches anything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler invoked with only the decoded payload.
    #[must_use]
    pub fn on_object<P>(
        mut self,
        event_type: impl Into<String>,
        handler: impl Fn(&P) -> Result<(), CoreError> + Send + Sync + 'static,
    ) -> Self
    where
        P: DeserializeOwned + 'static,
    {
        self.entries.push(Entry {
            event_type: event_type.into(),
            dispatch: Box::new(move |_raw, data| {
                let decoded = EventData::<P>::deserialize(data)?;
                handler(&decoded.payload)
            }),
        });
        self
    }

    /// Register a handler invoked with the decoded payload and meta-data.
    #[must_use]
    pub fn on_object_and_metadata<P>(
        mut self,
        event_type: impl Into<String>,
        handler: impl Fn(&P, &MetaData) -> Result<(), CoreError> + Send + Sync + 'static,
    ) -> Self
    where
        P: DeserializeOwned + 'static,
    {
        self.entries.push(Entry {
            event_type: event_type.into(),
            dispatch: Box::new(move |_raw, data| {
                let decoded = EventData::<P>::deserialize(data)?;
                handler(&decoded.payload, &decoded.metadata)
            }),
        });
        self
    }

    /// Register a handler invoked with the decoded payload, meta-data, and
    /// the raw event (for access to id, subject, timestamps, …).
    #[must_use]
    pub fn on_object_metadata_and_raw<P>(
        mut self,
        event_type: impl Into<String>,
        handler: impl Fn(&P, &MetaData, &Event) -> Result<(), CoreError> + Send + Sync + 'static,
    ) -> Self
    where
        P: DeserializeOwned + 'static,
    {
        self.entries.push(Entry {
            event_type: event_type.into(),
            dispatch: Box::new(move |raw, data| {
                let decoded = EventData::<P>::deserialize(data)?;
                handler(&decoded.payload, &decoded.metadata, raw)
            }),
        });
        self
    }

    /// Register a transactional handler (spec §4.8.d "optionally wrap their
    /// execution in a transactional operation adapter"), invoked with the
    /// decoded payload, meta-data, the raw event, and the processor's open
    /// transaction connection.
    #[must_use]
    pub fn on_object_transactional<P>(
        mut self,
        event_type: impl Into<String>,
        handler: impl TransactionalEventHandler<P> + 'static,
    ) -> Self
    where
        P: DeserializeOwned + 'static,
    {
        let handler = Arc::new(handler);
        self.transactional_entries.push(TxEntry {
            event_type: event_type.into(),
            dispatch: Box::new(move |raw, data, tx| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let decoded = EventData::<P>::deserialize(data)?;
                    handler
                        .handle(&decoded.payload, &decoded.metadata, raw, tx)
                        .await
                })
            }),
        });
        self
    }

    /// Whether any registered entry matches `event_type` (including a
    /// [`MATCH_ALL`] entry).
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.event_type == event_type || e.event_type == MATCH_ALL)
    }

    /// Whether any registered *transactional* entry matches `event_type`.
    #[must_use]
    pub fn has_transactional(&self, event_type: &str) -> bool {
        self.transactional_entries
            .iter()
            .any(|e| e.event_type == event_type || e.event_type == MATCH_ALL)
    }

    /// Dispatch `data` (the upcasted event's decoded-ready envelope) of wire
    /// type `event_type` to every matching handler in declared order.
    ///
    /// `raw` is the original raw event this upcasted event descends from,
    /// carried through unchanged for the object-metadata-raw variant.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a matching handler, or a
    /// `NonTransient(Marshalling)` if the payload cannot be deserialized;
    /// remaining matching handlers are not invoked once one fails.
    pub fn dispatch(
        &self,
        event_type: &str,
        data: &serde_json::Value,
        raw: &Event,
    ) -> Result<(), CoreError> {
        for entry in self
            .entries
            .iter()
            .filter(|e| e.event_type == event_type || e.event_type == MATCH_ALL)
        {
            (entry.dispatch)(raw, data)?;
        }
        Ok(())
    }

    /// Dispatch `data` to every matching transactional handler, in declared
    /// order, against the already-open `tx`. The caller is responsible for
    /// beginning and committing `tx` — this only runs the handlers' effects.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a matching handler, or a
    /// `NonTransient(Marshalling)` if the payload cannot be deserialized;
    /// remaining matching handlers are not invoked once one fails.
    pub async fn dispatch_transactional(
        &self,
        event_type: &str,
        data: &serde_json::Value,
        raw: &Event,
        tx: &mut sqlx::PgConnection,
    ) -> Result<(), CoreError> {
        for entry in self
            .transactional_entries
            .iter()
            .filter(|e| e.event_type == event_type || e.event_type == MATCH_ALL)
        {
            (entry.dispatch)(raw, data, tx).await?;
        }
        Ok(())
    }
}
