//! End-to-end dispatch tests against an in-memory [`StoreClient`].

use cqrs_es_cache::{LruCache, NoneCache};
use cqrs_es_client::{EventStream, HealthResponse, Options, StoreClient};
use cqrs_es_core::{
    CapturedEvent, CommandHandler, CoreError, Event, EventCandidate, EventId, MetaData,
    MetaDataPropagation, Precondition, SourcingMode, StateRebuildingHandler, Subject,
    SubjectCondition, UpcasterChain,
};
use cqrs_es_repository::EventRepository;
use cqrs_es_router::{CommandRouter, StateRebuilder};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct BookAdded {
    isbn: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct BookLent {
    reader: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Book {
    isbn: Option<String>,
    lent_to: Option<String>,
}

struct OnAdded;
impl StateRebuildingHandler<BookAdded, Book> for OnAdded {
    fn apply(
        &self,
        state: Option<Book>,
        payload: &BookAdded,
        _metadata: &MetaData,
        _subject: &Subject,
        _raw_event: &Event,
    ) -> Book {
        let mut book = state.unwrap_or_default();
        book.isbn = Some(payload.isbn.clone());
        book
    }
}

struct OnLent;
impl StateRebuildingHandler<BookLent, Book> for OnLent {
    fn apply(
        &self,
        state: Option<Book>,
        payload: &BookLent,
        _metadata: &MetaData,
        _subject: &Subject,
        _raw_event: &Event,
    ) -> Book {
        let mut book = state.unwrap_or_default();
        book.lent_to = Some(payload.reader.clone());
        book
    }
}

enum AddBook {
    Add { isbn: String },
}

struct AddBookHandler;
impl CommandHandler<AddBook, Book> for AddBookHandler {
    fn derive_subject(&self, command: &AddBook) -> Subject {
        match command {
            AddBook::Add { isbn } => Subject::new(format!("/books/{isbn}")).unwrap(),
        }
    }

    fn subject_condition(&self) -> SubjectCondition {
        SubjectCondition::Pristine
    }

    fn handle(
        &self,
        command: AddBook,
        state: Option<&Book>,
    ) -> Result<Vec<CapturedEvent>, CoreError> {
        assert!(state.is_none(), "a pristine subject has no prior state");
        let AddBook::Add { isbn } = command;
        Ok(vec![CapturedEvent::new(
            self.derive_subject(&AddBook::Add { isbn: isbn.clone() }),
            "book.added.v1",
            serde_json::json!({"isbn": isbn}),
            MetaData::new(),
        )])
    }
}

struct LendBook {
    isbn: String,
    reader: String,
}

struct LendBookHandler;
impl CommandHandler<LendBook, Book> for LendBookHandler {
    fn derive_subject(&self, command: &LendBook) -> Subject {
        Subject::new(format!("/books/{}", command.isbn)).unwrap()
    }

    fn subject_condition(&self) -> SubjectCondition {
        SubjectCondition::Exists
    }

    fn handle(
        &self,
        command: LendBook,
        state: Option<&Book>,
    ) -> Result<Vec<CapturedEvent>, CoreError> {
        let book = state.expect("subjectCondition::Exists guarantees prior state");
        assert!(book.lent_to.is_none(), "book already lent in this test");
        Ok(vec![CapturedEvent::new(
            self.derive_subject(&LendBook {
                isbn: command.isbn.clone(),
                reader: command.reader.clone(),
            }),
            "book.lent.v1",
            serde_json::json!({"reader": command.reader}),
            MetaData::new(),
        )])
    }
}

struct InMemoryStore {
    events: Mutex<Vec<Event>>,
    next_id: Mutex<u64>,
}

impl InMemoryStore {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }
}

impl StoreClient for InMemoryStore {
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn health(&self) -> Pin<Box<dyn Future<Output = Result<HealthResponse, CoreError>> + Send + '_>> {
        unimplemented!("not exercised by these tests")
    }

    fn write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut stored = self.events.lock().unwrap();

            for precondition in &preconditions {
                match precondition {
                    Precondition::SubjectIsPristine { subject } => {
                        if stored.iter().any(|e| &e.subject == subject) {
                            return Err(CoreError::concurrency_violation(subject.clone()));
                        }
                    }
                    Precondition::SubjectIsOnEventId { subject, event_id } => {
                        let latest = stored
                            .iter()
                            .filter(|e| &e.subject == subject)
                            .last()
                            .map(|e| e.id.clone());
                        if latest.as_ref() != Some(event_id) {
                            return Err(CoreError::concurrency_violation(subject.clone()));
                        }
                    }
                }
            }

            let mut written = Vec::new();
            for candidate in candidates {
                let mut id_guard = self.next_id.lock().unwrap();
                let id = EventId::new(format!("e{:06}", *id_guard));
                *id_guard += 1;
                drop(id_guard);

                let event = Event {
                    source: candidate.source,
                    subject: candidate.subject,
                    event_type: candidate.event_type,
                    data: candidate.data,
                    spec_version: "1.0".to_string(),
                    id,
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
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>> {
        Box::pin(async move {
            let recursive = options.recursive_flag();
            let lower_bound = options.lower_bound_exclusive_id();
            let stored = self.events.lock().unwrap();
            Ok(stored
                .iter()
                .filter(|e| {
                    if recursive {
                        e.subject.is_descendant_of(&subject)
                    } else {
                        e.subject == subject
                    }
                })
                .filter(|e| lower_bound.as_ref().is_none_or(|bound| &e.id > bound))
                .cloned()
                .collect())
        })
    }

    fn read_stream(
        &self,
        _subject: Subject,
        _options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
        unimplemented!("not exercised by these tests")
    }

    fn observe(
        &self,
        _subject: Subject,
        _options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
        unimplemented!("not exercised by these tests")
    }
}

fn rebuilder() -> Arc<StateRebuilder<Book>> {
    Arc::new(
        StateRebuilder::new()
            .on::<BookAdded, _>("book.added.v1", OnAdded)
            .on::<BookLent, _>("book.lent.v1", OnLent),
    )
}

fn add_router(client: Arc<InMemoryStore>) -> CommandRouter<AddBook, Book> {
    let repository = Arc::new(EventRepository::new(
        client.clone(),
        Arc::new(UpcasterChain::new()),
        Arc::new(cqrs_es_core::NameBasedTypeResolver::new()),
        "tag://test",
    ));
    CommandRouter::new(
        client,
        Arc::new(UpcasterChain::new()),
        Arc::new(NoneCache),
        rebuilder(),
        Arc::new(AddBookHandler),
        repository,
        MetaDataPropagation::KeepAll,
        "Book",
    )
}

fn lend_router(client: Arc<InMemoryStore>, cache: Arc<LruCache<Book>>) -> CommandRouter<LendBook, Book> {
    let repository = Arc::new(EventRepository::new(
        client.clone(),
        Arc::new(UpcasterChain::new()),
        Arc::new(cqrs_es_core::NameBasedTypeResolver::new()),
        "tag://test",
    ));
    CommandRouter::new(
        client,
        Arc::new(UpcasterChain::new()),
        cache,
        rebuilder(),
        Arc::new(LendBookHandler),
        repository,
        MetaDataPropagation::KeepAll,
        "Book",
    )
}

#[tokio::test]
async fn add_then_lend_round_trips_through_rebuilt_state() {
    let client = Arc::new(InMemoryStore::new());
    let cache = Arc::new(LruCache::new(NonZeroUsize::new(8).unwrap()));

    let add = add_router(client.clone());
    let written = add
        .send(
            AddBook::Add {
                isbn: "X".to_string(),
            },
            MetaData::new(),
        )
        .await
        .unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].event_type, "book.added.v1");

    let lend = lend_router(client, cache);
    let written = lend
        .send(
            LendBook {
                isbn: "X".to_string(),
                reader: "Alice".to_string(),
            },
            MetaData::new(),
        )
        .await
        .unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].event_type, "book.lent.v1");
}

#[tokio::test]
async fn pristine_condition_rejects_a_second_add_on_the_same_subject() {
    let client = Arc::new(InMemoryStore::new());
    let add = add_router(client);

    add.send(
        AddBook::Add {
            isbn: "X".to_string(),
        },
        MetaData::new(),
    )
    .await
    .unwrap();

    let result = add
        .send(
            AddBook::Add {
                isbn: "X".to_string(),
            },
            MetaData::new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(CoreError::NonTransient(
            cqrs_es_core::NonTransientKind::SubjectAlreadyExists { .. }
        ))
    ));
}

#[tokio::test]
async fn exists_condition_rejects_lending_an_unknown_book() {
    let client = Arc::new(InMemoryStore::new());
    let cache = Arc::new(LruCache::new(NonZeroUsize::new(8).unwrap()));
    let lend = lend_router(client, cache);

    let result = lend
        .send(
            LendBook {
                isbn: "unknown".to_string(),
                reader: "Alice".to_string(),
            },
            MetaData::new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(CoreError::NonTransient(
            cqrs_es_core::NonTransientKind::SubjectDoesNotExist { .. }
        ))
    ));
}

#[tokio::test]
async fn concurrency_violation_invalidates_the_cache_entry() {
    let client = Arc::new(InMemoryStore::new());
    let cache = Arc::new(LruCache::new(NonZeroUsize::new(8).unwrap()));

    let add = add_router(client.clone());
    add.send(
        AddBook::Add {
            isbn: "X".to_string(),
        },
        MetaData::new(),
    )
    .await
    .unwrap();

    let lend = lend_router(client.clone(), cache);

    // Warm the cache, then append an event the router does not know about to
    // simulate a concurrent writer advancing the subject.
    lend.send(
        LendBook {
            isbn: "X".to_string(),
            reader: "Alice".to_string(),
        },
        MetaData::new(),
    )
    .await
    .unwrap();

    client
        .write(
            vec![EventCandidate {
                source: "tag://test".to_string(),
                subject: Subject::new("/books/X").unwrap(),
                event_type: "book.lent.v1".to_string(),
                data: serde_json::json!({"metadata": {}, "payload": {"reader": "Bob"}}),
            }],
            Vec::new(),
        )
        .await
        .unwrap();

    // The cache still holds the pre-Bob event id as its precondition, so this
    // dispatch must surface a concurrency violation rather than silently
    // overwriting Bob's loan.
    let result = lend
        .send(
            LendBook {
                isbn: "X".to_string(),
                reader: "Carol".to_string(),
            },
            MetaData::new(),
        )
        .await;
    assert!(matches!(
        result,
        Err(CoreError::Transient(
            cqrs_es_core::TransientKind::ConcurrencyViolation { .. }
        ))
    ));
}
