//! An in-process [`StoreClient`] double backing every end-to-end scenario
//! fixture: enforces preconditions atomically, filters `read`/`observe` the
//! way the real store does, and broadcasts newly written events to any open
//! `observe` stream.
//!
//! Grounded on `core-repository/src/repository.rs`'s test-module `StubClient`,
//! generalized from "read/observe unimplemented" to a fully behaving double
//! so scenario tests can exercise the Command Router and Event Handling
//! Processor against it directly.

use cqrs_es_client::{EventStream, HealthResponse, HealthStatus, Options, StoreClient};
use cqrs_es_core::{CoreError, Event, EventCandidate, EventId, NonTransientKind, Precondition, Subject};
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// An in-memory event store enforcing the same precondition, ordering and
/// subject-scoping semantics as the real HTTP store.
pub struct InMemoryStoreClient {
    events: Mutex<Vec<Event>>,
    next_id: Mutex<u64>,
    live: broadcast::Sender<Event>,
}

impl Default for InMemoryStoreClient {
    fn default() -> Self {
        let (live, _rx) = broadcast::channel(1024);
        Self {
            events: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            live,
        }
    }
}

impl InMemoryStoreClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event currently stored, in write order. For test assertions.
    #[must_use]
    pub fn all_events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn next_event_id(&self) -> EventId {
        let mut guard = self.next_id.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = *guard;
        *guard += 1;
        EventId::new(format!("{id:020}"))
    }

    fn latest_for(events: &[Event], subject: &Subject) -> Option<EventId> {
        events
            .iter()
            .rev()
            .find(|e| &e.subject == subject)
            .map(|e| e.id.clone())
    }

    fn check_preconditions(events: &[Event], preconditions: &[Precondition]) -> Result<(), CoreError> {
        for precondition in preconditions {
            match precondition {
                Precondition::SubjectIsPristine { subject } => {
                    if Self::latest_for(events, subject).is_some() {
                        return Err(CoreError::concurrency_violation(subject.clone()));
                    }
                }
                Precondition::SubjectIsOnEventId { subject, event_id } => {
                    match Self::latest_for(events, subject) {
                        Some(latest) if &latest == event_id => {}
                        _ => return Err(CoreError::concurrency_violation(subject.clone())),
                    }
                }
            }
        }
        Ok(())
    }

    fn matches_scope(event_subject: &Subject, filter: &Subject, recursive: bool) -> bool {
        if recursive {
            event_subject.is_descendant_of(filter)
        } else {
            event_subject == filter
        }
    }

    fn matches_bounds(event: &Event, options: &Options) -> bool {
        if let Some(bound) = options.lower_bound_inclusive_id() {
            if &event.id < bound {
                return false;
            }
        }
        if let Some(bound) = options.lower_bound_exclusive_id() {
            if &event.id <= bound {
                return false;
            }
        }
        if let Some(bound) = options.upper_bound_inclusive_id() {
            if &event.id > bound {
                return false;
            }
        }
        if let Some(bound) = options.upper_bound_exclusive_id() {
            if &event.id >= bound {
                return false;
            }
        }
        true
    }

    fn filtered(&self, subject: &Subject, options: &Options) -> Vec<Event> {
        let events = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut matching: Vec<Event> = events
            .iter()
            .filter(|e| {
                Self::matches_scope(&e.subject, subject, options.recursive_flag())
                    && Self::matches_bounds(e, options)
            })
            .cloned()
            .collect();

        if options.order_option() == Some(cqrs_es_client::Order::Antichronological) {
            matching.reverse();
        }
        matching
    }
}

impl StoreClient for InMemoryStoreClient {
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn health(&self) -> Pin<Box<dyn Future<Output = Result<HealthResponse, CoreError>> + Send + '_>> {
        Box::pin(async {
            Ok(HealthResponse {
                status: HealthStatus::Pass,
                checks: Vec::new(),
            })
        })
    }

    fn write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut events = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Self::check_preconditions(&events, &preconditions)?;

            let mut written = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                let event = Event {
                    source: candidate.source,
                    subject: candidate.subject,
                    event_type: candidate.event_type,
                    data: candidate.data,
                    spec_version: "1.0".to_string(),
                    id: self.next_event_id(),
                    time: chrono::Utc::now(),
                    data_content_type: "application/json".to_string(),
                    hash: None,
                    predecessor_hash: None,
                };
                events.push(event.clone());
                let _ = self.live.send(event.clone());
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
        Box::pin(async move { Ok(self.filtered(&subject, &options)) })
    }

    fn read_stream(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
        Box::pin(async move {
            let events = self.filtered(&subject, &options);
            let stream: EventStream = Box::pin(futures::stream::iter(events.into_iter().map(Ok)));
            Ok(stream)
        })
    }

    fn observe(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
        Box::pin(async move {
            if options.order_option().is_some() {
                return Err(CoreError::NonTransient(NonTransientKind::InvalidUsage(
                    "order is not valid for observe".to_string(),
                )));
            }

            let backlog = self.filtered(&subject, &options);
            let live = self.live.subscribe();
            let recursive = options.recursive_flag();

            let tail = futures::stream::unfold(live, move |mut rx| {
                let subject = subject.clone();
                async move {
                    loop {
                        match rx.recv().await {
                            Ok(event) if InMemoryStoreClient::matches_scope(&event.subject, &subject, recursive) => {
                                return Some((Ok(event), rx));
                            }
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                }
            });

            let stream: EventStream = Box::pin(futures::stream::iter(backlog.into_iter().map(Ok)).chain(tail));
            Ok(stream)
        })
    }
}

/// Drain `n` items from a stream, panicking on timeout — a scenario-test
/// helper, not production code.
pub async fn take_n<S>(mut stream: Pin<&mut S>, n: usize) -> Vec<Event>
where
    S: futures::Stream<Item = Result<Event, CoreError>>,
{
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        match stream.next().await {
            Some(Ok(event)) => out.push(event),
            Some(Err(_)) => continue,
            None => break,
        }
    }
    out
}
