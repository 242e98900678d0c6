//! The Event Handling Processor (spec §4.8): a resumable, per-`(group,
//! partition)` consumer that observes a subject, upcasts and dispatches
//! matching events to registered handlers, and advances persisted progress
//! only for events that were handled (or deliberately skipped after
//! back-off exhaustion).
//!
//! Grounded on `projections/src/manager.rs`'s `tokio::select!` reader/
//! shutdown loop, reshaped into a two-task reader/dispatcher split so a
//! blocking handler invocation never stalls the stream reader (spec §5
//! "distinct worker" requirement).

use crate::backoff::{BackOff, BackOffExecution};
use crate::handler_registry::EventHandlerRegistry;
use crate::progress::{Progress, ProgressOutcome, ProgressTracker, TxOperation};
use crate::sequence::{PartitionKeyResolver, SequenceResolver};
use cqrs_es_client::{Options, StoreClient};
use cqrs_es_core::{CoreError, Event, EventData, Subject, TransientKind, UpcasterChain};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Static configuration for one `(group, partition)` processor instance.
pub struct ProcessorConfig {
    /// The processing group name; shared across every partition of one
    /// logical consumer.
    pub group: String,
    /// This processor's partition number.
    pub partition: u64,
    /// The subject to observe.
    pub subject: Subject,
    /// Whether to observe descendants of `subject` too.
    pub recursive: bool,
    /// The back-off policy applied when a step fails transiently.
    pub backoff: BackOff,
    /// Bound on in-flight raw events buffered between the reader and
    /// dispatcher tasks. `1` gives the tightest backpressure (the reader
    /// blocks until the dispatcher has fully finished, including retries,
    /// with the current event).
    pub channel_capacity: usize,
}

impl ProcessorConfig {
    /// A processor for `group`/`partition` over `subject`, with default
    /// (non-recursive, `NONE` back-off, capacity 1) settings.
    #[must_use]
    pub fn new(group: impl Into<String>, partition: u64, subject: Subject) -> Self {
        Self {
            group: group.into(),
            partition,
            subject,
            recursive: false,
            backoff: BackOff::None,
            channel_capacity: 1,
        }
    }

    #[must_use]
    pub const fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackOff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Resumable, partitioned dispatch of a subject's events to an
/// [`EventHandlerRegistry`].
pub struct EventHandlingProcessor {
    client: Arc<dyn StoreClient>,
    upcasters: Arc<UpcasterChain>,
    registry: Arc<EventHandlerRegistry>,
    progress: Arc<dyn ProgressTracker>,
    sequence_resolver: Option<Arc<SequenceResolver<serde_json::Value>>>,
    partitioner: Arc<PartitionKeyResolver>,
    config: ProcessorConfig,
}

impl EventHandlingProcessor {
    /// Construct a processor. `sequence_resolver` is `None` for full
    /// parallelism (every raw event id is its own sequence, so partition
    /// filtering never skips anything — equivalent to
    /// [`SequenceResolver::none`] plus a single-partition deployment, spelled
    /// out as `None` here because it never needs to run).
    #[must_use]
    pub fn new(
        client: Arc<dyn StoreClient>,
        upcasters: Arc<UpcasterChain>,
        registry: Arc<EventHandlerRegistry>,
        progress: Arc<dyn ProgressTracker>,
        sequence_resolver: Option<Arc<SequenceResolver<serde_json::Value>>>,
        partitioner: Arc<PartitionKeyResolver>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            client,
            upcasters,
            registry,
            progress,
            sequence_resolver,
            partitioner,
            config,
        }
    }

    /// Run the processing loop until `shutdown` is signaled or a
    /// `NonTransient` error terminates it unrecoverably.
    ///
    /// # Errors
    ///
    /// Returns the terminating `NonTransient` error, if any. A clean
    /// shutdown signal returns `Ok(())`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoreError> {
        let progress = self.progress.load(&self.config.group, self.config.partition).await?;

        let builder = Options::builder().recursive(self.config.recursive);
        let options = if let Some(event_id) = progress.event_id().cloned() {
            builder.lower_bound_exclusive(event_id).build_for_observe()?
        } else {
            builder.build_for_observe()?
        };

        let stream = self
            .client
            .observe(self.config.subject.clone(), options)
            .await?;

        let (tx, mut rx) = mpsc::channel::<Event>(self.config.channel_capacity.max(1));

        let mut reader_shutdown = shutdown.clone();
        let reader = tokio::spawn(async move {
            futures::pin_mut!(stream);
            loop {
                tokio::select! {
                    next = stream.next() => {
                        match next {
                            Some(Ok(event)) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "observe stream error");
                            }
                            None => break,
                        }
                    }
                    _ = reader_shutdown.changed() => {
                        if *reader_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.dispatch_with_retry(event, &mut shutdown).await {
                                reader.abort();
                                return Err(e);
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        reader.abort();
        Ok(())
    }

    /// Determine relevance from the raw event for a raw-mode resolver, or
    /// `None` if the resolver is object-mode (relevance deferred).
    fn raw_relevance(&self, event: &Event) -> Option<bool> {
        let resolver = self.sequence_resolver.as_ref()?;
        if !resolver.is_raw_mode() {
            return None;
        }
        let sequence_id = resolver.resolve_raw(event);
        Some(self.partitioner.partition_for(&sequence_id) == self.config.partition)
    }

    /// Object-mode relevance, recomputed once the payload is decoded.
    fn object_relevance(&self, payload: &serde_json::Value, metadata: &cqrs_es_core::MetaData) -> Option<bool> {
        let resolver = self.sequence_resolver.as_ref()?;
        if resolver.is_raw_mode() {
            return None;
        }
        let sequence_id = resolver.resolve_object(payload, metadata);
        Some(self.partitioner.partition_for(&sequence_id) == self.config.partition)
    }

    /// Dispatches every matching non-transactional handler and returns the
    /// `(event_type, data)` of each upcasted event that also has a matching
    /// *transactional* handler, so the caller can enlist those in the same
    /// transaction as the progress-advance.
    async fn process_once(
        &self,
        event: &Event,
    ) -> Result<Vec<(String, serde_json::Value)>, CoreError> {
        if self.raw_relevance(event) == Some(false) {
            return Ok(Vec::new());
        }

        let upcastable = cqrs_es_core::UpcastableEvent {
            event_type: event.event_type.clone(),
            data: event.data.clone(),
        };

        let mut transactional_matches = Vec::new();

        for upcasted in self.upcasters.upcast(upcastable)? {
            let has_plain = self.registry.matches(&upcasted.event_type);
            let has_transactional = self.registry.has_transactional(&upcasted.event_type);
            if !has_plain && !has_transactional {
                continue;
            }

            let decoded = EventData::<serde_json::Value>::deserialize(&upcasted.data)?;
            if self.object_relevance(&decoded.payload, &decoded.metadata) == Some(false) {
                continue;
            }

            if has_plain {
                self.registry
                    .dispatch(&upcasted.event_type, &upcasted.data, event)?;
            }
            if has_transactional {
                transactional_matches.push((upcasted.event_type.clone(), upcasted.data.clone()));
            }
        }

        Ok(transactional_matches)
    }

    async fn dispatch_with_retry(
        &self,
        event: Event,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), CoreError> {
        let mut execution = BackOffExecution::start(&self.config.backoff);

        loop {
            match self.process_once(&event).await {
                Ok(transactional_matches) if transactional_matches.is_empty() => {
                    return self.advance_progress_guarded(event.id, shutdown).await;
                }
                Ok(transactional_matches) => {
                    return self
                        .advance_progress_transactional_guarded(&event, transactional_matches, shutdown)
                        .await;
                }
                Err(CoreError::NonTransient(kind)) => {
                    return Err(CoreError::NonTransient(kind));
                }
                Err(transient) => match execution.next_delay() {
                    Some(delay) => {
                        tracing::warn!(error = %transient, delay_ms = delay.as_millis(), "retrying event after transient failure");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                    None => {
                        tracing::error!(error = %transient, "back-off exhausted, skipping event");
                        return self.advance_progress_guarded(event.id, shutdown).await;
                    }
                },
            }
        }
    }

    async fn advance_progress(&self, event_id: cqrs_es_core::EventId) -> Result<(), CoreError> {
        self.progress
            .proceed(
                &self.config.group,
                self.config.partition,
                Box::new(move |_current: Progress| Ok(ProgressOutcome::Advance(event_id))),
            )
            .await
    }

    /// Advance progress for `event_id`, racing the write against `shutdown`.
    ///
    /// A shutdown signal observed *while idle* (between events, or during a
    /// back-off sleep) is a clean stop: nothing in flight is lost. A
    /// shutdown signal observed while a progress write is in flight is a
    /// distinct case — the write may or may not have landed, so the loop
    /// must not silently treat it as settled, and it must never be retried
    /// blindly. Surfacing [`TransientKind::Interrupted`] terminates this
    /// processor's loop rather than looping back into `dispatch_with_retry`.
    async fn advance_progress_guarded(
        &self,
        event_id: cqrs_es_core::EventId,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), CoreError> {
        loop {
            tokio::select! {
                result = self.advance_progress(event_id.clone()) => return result,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::error!(event_id = %event_id, "interrupted while advancing progress");
                        return Err(CoreError::Transient(TransientKind::Interrupted));
                    }
                }
            }
        }
    }

    /// Advance progress for `event.id`, running every matching transactional
    /// handler for `matches` against the same external transaction the
    /// advance commits through (spec §4.8.d, §5 "transactional
    /// participation"). An error from either the handlers or the write
    /// aborts the whole transaction, leaving neither committed.
    async fn advance_progress_transactional(
        &self,
        event: &Event,
        matches: Vec<(String, serde_json::Value)>,
    ) -> Result<(), CoreError> {
        let registry = Arc::clone(&self.registry);
        let raw_event = event.clone();
        let run_in_tx: TxOperation<'_> = Box::new(move |connection| {
            Box::pin(async move {
                for (event_type, data) in &matches {
                    registry
                        .dispatch_transactional(event_type, data, &raw_event, connection)
                        .await?;
                }
                Ok(())
            })
        });

        self.progress
            .proceed_transactional(
                &self.config.group,
                self.config.partition,
                event.id.clone(),
                run_in_tx,
            )
            .await
    }

    /// As [`Self::advance_progress_transactional`], but races the write
    /// against `shutdown` the same way [`Self::advance_progress_guarded`]
    /// does: a shutdown observed mid-commit is surfaced as
    /// [`TransientKind::Interrupted`] rather than treated as a clean stop.
    async fn advance_progress_transactional_guarded(
        &self,
        event: &Event,
        matches: Vec<(String, serde_json::Value)>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), CoreError> {
        loop {
            tokio::select! {
                result = self.advance_progress_transactional(event, matches.clone()) => return result,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::error!(event_id = %event.id, "interrupted while advancing progress transactionally");
                        return Err(CoreError::Transient(TransientKind::Interrupted));
                    }
                }
            }
        }
    }
}
