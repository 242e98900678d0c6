//! The Store Client: authenticated publish/read/observe against the event
//! store's HTTP/NDJSON surface (spec §4.1, §6).

use crate::config::ClientConfig;
use crate::error::{map_status, map_transport_error};
use crate::options::Options;
use crate::wire::{HealthResponse, StreamLine, SubjectRequest, WriteRequest, WriteResponse};
use async_stream::stream;
use cqrs_es_core::{CoreError, Event, EventCandidate, NonTransientKind, Precondition, Subject};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;

/// A never-ending (for `observe`) or bounded (for `read`) stream of events,
/// heartbeats already filtered out by the marshalling layer.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, CoreError>> + Send>>;

/// Protocol adapter for the event store's authenticate/health/write/read/
/// observe operations.
///
/// Dyn-compatible (`Arc<dyn StoreClient>`) by construction, matching the
/// teacher's `EventStore`/`EventBus` traits: every method returns a boxed,
/// pinned future rather than being declared `async fn`.
pub trait StoreClient: Send + Sync {
    /// Verify credentials against the store.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(HttpPermanent)` on HTTP 4xx (e.g. unauthorized),
    /// or a `Transient` variant on transport/5xx failure.
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + '_>>;

    /// Query store health.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] per the standard HTTP status mapping.
    fn health(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HealthResponse, CoreError>> + Send + '_>>;

    /// Atomically append `candidates`, enforcing `preconditions`.
    ///
    /// # Errors
    ///
    /// Returns `Transient(ConcurrencyViolation)` on HTTP 409, or the standard
    /// mapping otherwise.
    fn write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>>;

    /// Bounded, single-shot read of events for `subject`.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(InvalidUsage)` if `options` is not valid for a
    /// bounded read, or the standard HTTP mapping otherwise.
    fn read(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>>;

    /// Streaming variant of [`StoreClient::read`], for pagination-free
    /// consumption of a large bounded result. Stands in for the callback
    /// `read(subject, options, consumer)` operation: callers drive the
    /// returned stream to exhaustion instead of receiving synchronous
    /// callback invocations.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(InvalidUsage)` if `options` is not valid for a
    /// bounded read.
    fn read_stream(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>>;

    /// Open a long-lived observe stream for `subject`. Heartbeat lines are
    /// consumed and discarded by the marshalling layer; only event lines are
    /// yielded. The returned stream does not end under normal operation.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(InvalidUsage)` if `options` pairs `observe` with
    /// `Order` or an upper bound.
    fn observe(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>>;
}

/// `reqwest`-backed [`StoreClient`] against the store's HTTP/NDJSON surface.
///
/// The `observe` stream is read on whatever task drives the returned
/// `Stream` to `.next()`; it never blocks a thread shared with other client
/// calls because `reqwest`'s async I/O yields to the executor between reads
/// (spec §4.1 "MUST NOT block any thread pool used by other client
/// operations").
#[derive(Clone)]
pub struct HttpStoreClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpStoreClient {
    /// Build a client from `config`, establishing no connections yet.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(InvalidUsage)` if the underlying `reqwest`
    /// client cannot be constructed (malformed TLS configuration).
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CoreError::NonTransient(NonTransientKind::InvalidUsage(e.to_string())))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_uri, path)
    }

    async fn do_write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Result<Vec<Event>, CoreError> {
        let subject = preconditions
            .first()
            .map(Precondition::subject)
            .cloned()
            .or_else(|| candidates.first().map(|c| c.subject.clone()))
            .unwrap_or_else(Subject::root);
        let body = WriteRequest {
            events: candidates,
            preconditions,
        };
        let response = self
            .http
            .post(self.url("/api/v1/write-events"))
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &subject, &text)
                .unwrap_or_else(|| CoreError::NonTransient(NonTransientKind::HttpPermanent {
                    status: status.as_u16(),
                    message: text,
                })));
        }

        let parsed: WriteResponse = response
            .json()
            .await
            .map_err(|e| CoreError::NonTransient(NonTransientKind::Marshalling(e.to_string())))?;
        Ok(parsed.events)
    }

    fn open_stream(
        &self,
        path: &'static str,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
        Box::pin(async move {
            let body = SubjectRequest {
                subject: subject.as_str().to_string(),
                options,
            };
            let response = self
                .http
                .post(self.url(path))
                .bearer_auth(&self.config.api_token)
                .header("Accept", "application/x-ndjson")
                .json(&body)
                .send()
                .await
                .map_err(|e| map_transport_error(&e))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(map_status(status, &subject, &text).unwrap_or_else(|| {
                    CoreError::NonTransient(NonTransientKind::HttpPermanent {
                        status: status.as_u16(),
                        message: text,
                    })
                }));
            }

            let byte_stream = response.bytes_stream();

            let stream: EventStream = Box::pin(stream! {
                let mut buffer = String::new();

                for await chunk in byte_stream {
                    match chunk {
                        Ok(bytes) => {
                            buffer.push_str(&String::from_utf8_lossy(&bytes));

                            while let Some(pos) = buffer.find('\n') {
                                let line = buffer[..pos].trim().to_string();
                                buffer.drain(..=pos);

                                if line.is_empty() {
                                    continue;
                                }

                                match serde_json::from_str::<StreamLine>(&line) {
                                    Ok(StreamLine::Heartbeat) => {
                                        tracing::trace!("received heartbeat");
                                    }
                                    Ok(StreamLine::Event { payload }) => yield Ok(payload),
                                    Err(e) => yield Err(CoreError::NonTransient(
                                        NonTransientKind::Marshalling(e.to_string()),
                                    )),
                                }
                            }
                        }
                        Err(e) => {
                            yield Err(map_transport_error(&e));
                            break;
                        }
                    }
                }
            });

            Ok(stream)
        })
    }
}

impl StoreClient for HttpStoreClient {
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + '_>> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.url("/api/v1/verify-api-token"))
                .bearer_auth(&self.config.api_token)
                .send()
                .await
                .map_err(|e| map_transport_error(&e))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let text = response.text().await.unwrap_or_default();
            Err(map_status(status, &Subject::root(), &text).unwrap_or_else(|| {
                CoreError::NonTransient(NonTransientKind::HttpPermanent {
                    status: status.as_u16(),
                    message: text,
                })
            }))
        })
    }

    fn health(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HealthResponse, CoreError>> + Send + '_>> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.url("/api/v1/health"))
                .bearer_auth(&self.config.api_token)
                .send()
                .await
                .map_err(|e| map_transport_error(&e))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(map_status(status, &Subject::root(), &text).unwrap_or_else(|| {
                    CoreError::NonTransient(NonTransientKind::HttpPermanent {
                        status: status.as_u16(),
                        message: text,
                    })
                }));
            }

            response
                .json()
                .await
                .map_err(|e| CoreError::NonTransient(NonTransientKind::Marshalling(e.to_string())))
        })
    }

    fn write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>> {
        Box::pin(self.do_write(candidates, preconditions))
    }

    fn read(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, CoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut stream = self.read_stream(subject, options).await?;
            let mut events = Vec::new();
            while let Some(event) = stream.next().await {
                events.push(event?);
            }
            Ok(events)
        })
    }

    fn read_stream(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
        self.open_stream("/api/v1/read-events", subject, options)
    }

    fn observe(
        &self,
        subject: Subject,
        options: Options,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, CoreError>> + Send + '_>> {
        self.open_stream("/api/v1/observe-events", subject, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_default_config() {
        let config = ClientConfig::new("https://esdb.example.com", "token");
        assert!(HttpStoreClient::new(config).is_ok());
    }
}
