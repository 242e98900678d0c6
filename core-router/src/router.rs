//! The Command Router: resolves a command to its handler's subject,
//! rebuilds state via the cache, invokes the handler, and atomically
//! publishes its captured events under the derived preconditions (spec
//! §4.7 — "hardest path").

use crate::state_rebuilder::StateRebuilder;
use cqrs_es_cache::{CacheEntry, CacheKey, StateRebuildingCache};
use cqrs_es_client::{Options, StoreClient};
use cqrs_es_core::{
    CommandHandler, CoreError, Event, MetaData, MetaDataPropagation, NonTransientKind,
    Precondition, SourcingMode, Subject, SubjectCondition, UpcastableEvent, UpcasterChain,
};
use cqrs_es_repository::EventRepository;
use std::sync::Arc;

/// Dispatches commands of type `C` to a single registered handler, rebuilding
/// state of type `S` via the configured cache and sourcing mode.
///
/// One `CommandRouter` handles exactly one command type — the host wires up
/// one instance per command, mirroring the origin's per-class handler
/// registration without needing a type-erased, `Any`-keyed registry on this
/// side of the framework boundary.
pub struct CommandRouter<C, S> {
    client: Arc<dyn StoreClient>,
    upcasters: Arc<UpcasterChain>,
    cache: Arc<dyn StateRebuildingCache<S>>,
    rebuilder: Arc<StateRebuilder<S>>,
    handler: Arc<dyn CommandHandler<C, S>>,
    repository: Arc<EventRepository>,
    metadata_propagation: MetaDataPropagation,
    state_type_name: &'static str,
}

impl<C, S> CommandRouter<C, S>
where
    C: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    /// Construct a router for one command type. `state_type_name`
    /// disambiguates this router's cache entries from any other router
    /// sharing the same subject space but a different state type.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        client: Arc<dyn StoreClient>,
        upcasters: Arc<UpcasterChain>,
        cache: Arc<dyn StateRebuildingCache<S>>,
        rebuilder: Arc<StateRebuilder<S>>,
        handler: Arc<dyn CommandHandler<C, S>>,
        repository: Arc<EventRepository>,
        metadata_propagation: MetaDataPropagation,
        state_type_name: &'static str,
    ) -> Self {
        Self {
            client,
            upcasters,
            cache,
            rebuilder,
            handler,
            repository,
            metadata_propagation,
            state_type_name,
        }
    }

    /// Dispatch `command`, returning the events written as a result of
    /// handling it (empty if the handler captured none).
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(SubjectAlreadyExists|SubjectDoesNotExist)` if
    /// the handler's declared `subjectCondition` is violated; propagates the
    /// handler's own error verbatim; returns
    /// `Transient(ConcurrencyViolation)` if a concurrent writer advanced a
    /// sourced subject between rebuild and write, invalidating this router's
    /// cache entry for the command's subject so the caller's retry replays
    /// fresh state.
    pub async fn send(&self, command: C, metadata: MetaData) -> Result<Vec<Event>, CoreError> {
        // Step 2: derive subject.
        let subject = self.handler.derive_subject(&command);

        // Step 3: verify subject condition eagerly, for a precise error
        // category (SubjectAlreadyExists/SubjectDoesNotExist rather than a
        // store-side 409).
        let subject_condition = self.handler.subject_condition();
        if !matches!(subject_condition, SubjectCondition::None) {
            let existing = self
                .client
                .read(subject.clone(), Options::builder().build_for_read()?)
                .await?;
            match subject_condition {
                SubjectCondition::Pristine if !existing.is_empty() => {
                    return Err(CoreError::NonTransient(NonTransientKind::SubjectAlreadyExists {
                        subject,
                    }));
                }
                SubjectCondition::Exists if existing.is_empty() => {
                    return Err(CoreError::NonTransient(NonTransientKind::SubjectDoesNotExist {
                        subject,
                    }));
                }
                _ => {}
            }
        }

        // Steps 4-5: rebuild state via the cache (skipped entirely for
        // SourcingMode::None).
        let sourcing_mode = self.handler.sourcing_mode();
        let cache_key = CacheKey::new(subject.clone(), self.state_type_name, sourcing_mode);

        let rebuilt = if matches!(sourcing_mode, SourcingMode::None) {
            CacheEntry::miss()
        } else {
            self.rebuild_via_cache(&cache_key, &subject, sourcing_mode).await?
        };

        // Step 6: build the precondition set for the upcoming write.
        let mut preconditions: Vec<Precondition> = rebuilt
            .sourced_subject_ids
            .iter()
            .map(|(sub, id)| Precondition::on_event_id(sub.clone(), id.clone()))
            .collect();
        if matches!(subject_condition, SubjectCondition::Pristine) {
            preconditions.push(Precondition::pristine(subject.clone()));
        }

        // Step 7: invoke the handler, then apply meta-data propagation to
        // every captured event.
        let propagated = self.metadata_propagation.apply(&metadata);
        let captured = self.handler.handle(command, rebuilt.instance.as_ref())?;
        let captured: Vec<_> = captured
            .into_iter()
            .map(|mut event| {
                let mut merged = propagated.clone();
                merged.extend(event.metadata);
                event.metadata = merged;
                event
            })
            .collect();

        // Step 8: write, if the handler captured anything.
        if captured.is_empty() {
            return Ok(Vec::new());
        }

        let written = match self.repository.publish_captured(captured, preconditions).await {
            Ok(events) => events,
            Err(err) if err.is_concurrency_violation() => {
                self.cache.invalidate(&cache_key).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        // Step 9: apply the newly written events to the in-memory instance
        // and store the updated value back in the cache.
        let mut instance = rebuilt.instance;
        let mut sourced = rebuilt.sourced_subject_ids;
        let mut event_id = rebuilt.event_id;
        for event in &written {
            instance = self.rebuilder.apply(
                instance,
                &event.event_type,
                &event.data,
                &event.subject,
                event,
            )?;
            sourced.insert(event.subject.clone(), event.id.clone());
            event_id = Some(event.id.clone());
        }

        if !matches!(sourcing_mode, SourcingMode::None) {
            let updated = CacheEntry {
                event_id,
                instance,
                sourced_subject_ids: sourced,
            };
            self.cache
                .fetch_and_merge(cache_key, Box::new(move |_current| Box::pin(async move { Ok(updated) })))
                .await?;
        }

        // Step 10: return the written events.
        Ok(written)
    }

    async fn rebuild_via_cache(
        &self,
        cache_key: &CacheKey,
        subject: &Subject,
        sourcing_mode: SourcingMode,
    ) -> Result<CacheEntry<S>, CoreError> {
        let client = Arc::clone(&self.client);
        let upcasters = Arc::clone(&self.upcasters);
        let rebuilder = Arc::clone(&self.rebuilder);
        let subject = subject.clone();
        let recursive = matches!(sourcing_mode, SourcingMode::Recursive);

        self.cache
            .fetch_and_merge(
                cache_key.clone(),
                Box::new(move |current| {
                    Box::pin(async move {
                        let builder = Options::builder().recursive(recursive);
                        let options = if let Some(event_id) = current.event_id.clone() {
                            builder.lower_bound_exclusive(event_id).build_for_read()?
                        } else {
                            builder.build_for_read()?
                        };

                        let events = client.read(subject.clone(), options).await?;

                        let mut instance = current.instance;
                        let mut sourced = current.sourced_subject_ids;
                        let mut event_id = current.event_id;

                        for event in events {
                            let upcastable = UpcastableEvent {
                                event_type: event.event_type.clone(),
                                data: event.data.clone(),
                            };
                            for result in upcasters.upcast(upcastable)? {
                                instance = rebuilder.apply(
                                    instance,
                                    &result.event_type,
                                    &result.data,
                                    &event.subject,
                                    &event,
                                )?;
                            }
                            sourced.insert(event.subject.clone(), event.id.clone());
                            event_id = Some(event.id.clone());
                        }

                        Ok(CacheEntry {
                            event_id,
                            instance,
                            sourced_subject_ids: sourced,
                        })
                    })
                }),
            )
            .await
    }
}
