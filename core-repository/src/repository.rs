//! The Event Repository: a layered read API over the Store Client, Upcaster
//! Chain, Type Resolver and Event Data Marshaller, plus the write API
//! command handlers publish through (spec §4.5).

use async_stream::stream;
use cqrs_es_client::{EventStream, Options, StoreClient};
use cqrs_es_core::{
    CapturedEvent, CoreError, Event, EventCandidate, EventData, MetaData, NonTransientKind,
    Precondition, Subject, TypeResolver, UpcastableEvent, UpcasterChain,
};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A stream of events with the Upcaster Chain already applied, still keyed
/// by wire type string (pre type-resolution/deserialization).
pub type UpcastedStream = Pin<Box<dyn Stream<Item = Result<UpcastableEvent, CoreError>> + Send>>;

/// A stream of `(metaData, payload)` pairs for a single resolved payload
/// type `P`; events of other wire types are silently skipped.
pub type ObjectStream<P> = Pin<Box<dyn Stream<Item = Result<(MetaData, P), CoreError>> + Send>>;

/// Layered read/write API over the event store.
///
/// Every `consume_*` method returns a [`Stream`] rather than taking a
/// consumer callback: the caller drives it with `.next()`/`for_each`, which
/// is the idiomatic Rust replacement for the origin's
/// `(callback, event) -> …` shape, and composes directly with the same
/// `Stream` surface `core-client` already exposes for `read`/`observe`.
pub struct EventRepository {
    client: Arc<dyn StoreClient>,
    upcasters: Arc<UpcasterChain>,
    type_resolver: Arc<dyn TypeResolver>,
    source: String,
}

impl EventRepository {
    /// Build a repository over `client`, applying `upcasters` to every read
    /// and resolving payload types via `type_resolver`. `source` is the
    /// CloudEvents `source` attribute stamped on every event this repository
    /// publishes.
    #[must_use]
    pub fn new(
        client: Arc<dyn StoreClient>,
        upcasters: Arc<UpcasterChain>,
        type_resolver: Arc<dyn TypeResolver>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            client,
            upcasters,
            type_resolver,
            source: source.into(),
        }
    }

    /// The lowest read layer: raw events, no upcasting or type resolution.
    ///
    /// # Errors
    ///
    /// Returns whatever [`StoreClient::read_stream`] returns.
    pub fn consume_raw(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
        Box::pin(async move { self.client.read_stream(subject, options).await })
    }

    /// Applies the Upcaster Chain lazily to each raw event as the stream is
    /// consumed.
    ///
    /// # Errors
    ///
    /// Returns whatever [`StoreClient::read_stream`] returns; stream items
    /// surface upcasting failures individually without ending the stream.
    pub fn consume_upcasted(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<UpcastedStream, CoreError>> + Send + '_>> {
        Box::pin(async move {
            let raw = self.client.read_stream(subject, options).await?;
            let upcasters = Arc::clone(&self.upcasters);

            let upcasted: UpcastedStream = Box::pin(stream! {
                futures::pin_mut!(raw);
                while let Some(event) = raw.next().await {
                    match event {
                        Ok(event) => {
                            let upcastable = UpcastableEvent {
                                event_type: event.event_type,
                                data: event.data,
                            };
                            match upcasters.upcast(upcastable) {
                                Ok(results) => {
                                    for result in results {
                                        yield Ok(result);
                                    }
                                }
                                Err(e) => yield Err(e),
                            }
                        }
                        Err(e) => yield Err(e),
                    }
                }
            });

            Ok(upcasted)
        })
    }

    /// Also resolves the wire type and deserializes into `(metaData,
    /// payload)`; events whose upcasted wire type does not match `P`'s
    /// registered name are skipped.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(TypeResolution)` immediately if `P` has no
    /// registered wire name; stream items surface deserialization failures
    /// individually.
    pub fn consume_as_object<P>(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectStream<P>, CoreError>> + Send + '_>>
    where
        P: DeserializeOwned + Send + 'static,
    {
        Box::pin(async move {
            let expected_type = self.type_resolver.type_name_for::<P>()?.to_string();
            let upcasted = self.consume_upcasted(subject, options).await?;

            let objects: ObjectStream<P> = Box::pin(stream! {
                futures::pin_mut!(upcasted);
                while let Some(item) = upcasted.next().await {
                    match item {
                        Ok(event) if event.event_type == expected_type => {
                            match EventData::<P>::deserialize(&event.data) {
                                Ok(data) => yield Ok((data.metadata, data.payload)),
                                Err(e) => yield Err(e),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => yield Err(e),
                    }
                }
            });

            Ok(objects)
        })
    }

    /// Atomically publish a single event.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(TypeResolution)` if `P` has no registered wire
    /// name, or whatever [`StoreClient::write`] returns otherwise.
    pub async fn publish<P>(
        &self,
        subject: Subject,
        payload: P,
        metadata: MetaData,
        preconditions: Vec<Precondition>,
    ) -> Result<Event, CoreError>
    where
        P: Serialize + 'static,
    {
        let event_type = self.type_resolver.type_name_for::<P>()?.to_string();
        let data = EventData::with_metadata(metadata, payload).serialize()?;
        let candidate = EventCandidate {
            source: self.source.clone(),
            subject,
            event_type,
            data,
        };

        let mut events = self.client.write(vec![candidate], preconditions).await?;
        events.pop().ok_or_else(|| {
            CoreError::NonTransient(NonTransientKind::Marshalling(
                "store returned no events for a single-event publish".to_string(),
            ))
        })
    }

    /// Atomically publish a buffer of [`CapturedEvent`]s (typically produced
    /// by a Command Handler), in order, with each event's own preconditions
    /// concatenated with `additional_preconditions` into one combined list.
    ///
    /// # Errors
    ///
    /// Returns whatever [`StoreClient::write`] returns. An empty `captured`
    /// is a no-op that performs no network call and returns an empty vector.
    pub async fn publish_captured(
        &self,
        captured: Vec<CapturedEvent>,
        additional_preconditions: Vec<Precondition>,
    ) -> Result<Vec<Event>, CoreError> {
        if captured.is_empty() {
            return Ok(Vec::new());
        }

        let mut preconditions = additional_preconditions;
        let mut candidates = Vec::with_capacity(captured.len());
        for event in captured {
            preconditions.extend(event.preconditions);
            candidates.push(EventCandidate {
                source: self.source.clone(),
                subject: event.subject,
                event_type: event.event_type,
                data: serde_json::json!({"metadata": event.metadata, "payload": event.payload}),
            });
        }

        self.client.write(candidates, preconditions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqrs_es_client::HealthResponse;
    use cqrs_es_core::{EventId, NameBasedTypeResolver};
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct BookAdded {
        isbn: String,
    }

    struct StubClient {
        events: Mutex<Vec<Event>>,
    }

    impl StoreClient for StubClient {
        fn authenticate(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn health(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<HealthResponse, CoreError>> + Send + '_>> {
            unimplemented!("not exercised by these tests")
        }

        fn write(
            &self,
            candidates: Vec<EventCandidate>,
            _preconditions: Vec<Precondition>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>> {
            Box::pin(async move {
                let mut stored = self.events.lock().unwrap();
                let mut written = Vec::new();
                for candidate in candidates {
                    let event = Event {
                        source: candidate.source,
                        subject: candidate.subject,
                        event_type: candidate.event_type,
                        data: candidate.data,
                        spec_version: "1.0".to_string(),
                        id: EventId::new(format!("e{}", stored.len())),
                        time: chrono::DateTime::UNIX_EPOCH,
                        data_content_type: "application/json".to_string(),
                        hash: None,
                        predecessor_hash: None,
                    };
                    stored.push(event.clone());
                    written.push(event);
                }
                Ok(written)
            })
        }

        fn read(
            &self,
            _subject: Subject,
            _options: Options,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>> {
            unimplemented!("not exercised by these tests")
        }

        fn read_stream(
            &self,
            _subject: Subject,
            _options: Options,
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
            Box::pin(async move {
                let events = self.events.lock().unwrap().clone();
                let stream: EventStream =
                    Box::pin(futures::stream::iter(events.into_iter().map(Ok)));
                Ok(stream)
            })
        }

        fn observe(
            &self,
            _subject: Subject,
            _options: Options,
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
            unimplemented!("not exercised by these tests")
        }
    }

    fn repository() -> (Arc<StubClient>, EventRepository) {
        let client = Arc::new(StubClient {
            events: Mutex::new(Vec::new()),
        });
        let resolver = Arc::new(NameBasedTypeResolver::new().register::<BookAdded>("book.added.v1"));
        let repo = EventRepository::new(
            client.clone(),
            Arc::new(UpcasterChain::new()),
            resolver,
            "tag://test",
        );
        (client, repo)
    }

    #[tokio::test]
    async fn publish_then_consume_as_object_roundtrips() {
        let (_client, repo) = repository();
        let subject = Subject::new("/books/X").unwrap();

        repo.publish(
            subject.clone(),
            BookAdded {
                isbn: "X".to_string(),
            },
            MetaData::new(),
            Vec::new(),
        )
        .await
        .unwrap();

        let mut stream = repo
            .consume_as_object::<BookAdded>(subject, Options::builder().build_for_read().unwrap())
            .await
            .unwrap();

        let (_, payload) = stream.next().await.unwrap().unwrap();
        assert_eq!(payload.isbn, "X");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn publish_captured_buffers_multiple_events_atomically() {
        let (client, repo) = repository();
        let subject = Subject::new("/books/X").unwrap();

        let captured = vec![
            CapturedEvent::new(
                subject.clone(),
                "book.added.v1",
                serde_json::json!({"isbn": "X"}),
                MetaData::new(),
            ),
            CapturedEvent::new(
                subject.clone(),
                "book.lent.v1",
                serde_json::json!({"reader": "R"}),
                MetaData::new(),
            ),
        ];

        let written = repo.publish_captured(captured, Vec::new()).await.unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(client.events.lock().unwrap().len(), 2);
        assert_eq!(written[0].event_type, "book.added.v1");
        assert_eq!(written[1].event_type, "book.lent.v1");
    }

    #[tokio::test]
    async fn publish_captured_with_empty_buffer_is_a_noop() {
        let (client, repo) = repository();
        let written = repo.publish_captured(Vec::new(), Vec::new()).await.unwrap();
        assert!(written.is_empty());
        assert!(client.events.lock().unwrap().is_empty());
    }
}
