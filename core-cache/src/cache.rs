//! The State Rebuilding Cache (spec §4.6): a bounded cache of rebuilt
//! command state, keyed by `(subject, type, sourcing mode)`, merged with
//! monotone-by-`eventId` semantics so a concurrent stale write can never
//! clobber a fresher one.

use cqrs_es_core::{CoreError, EventId, SourcingMode, Subject};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;

/// The cache key: a command's subject, the rebuilt state's type name, and
/// the sourcing mode the state was rebuilt under.
///
/// `type_name` disambiguates two command handlers that share a subject but
/// rebuild different state types from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject: Subject,
    pub type_name: &'static str,
    pub sourcing_mode: SourcingMode,
}

impl CacheKey {
    #[must_use]
    pub const fn new(subject: Subject, type_name: &'static str, sourcing_mode: SourcingMode) -> Self {
        Self {
            subject,
            type_name,
            sourcing_mode,
        }
    }
}

/// A cached (or freshly rebuilt) state value plus the bookkeeping the
/// Command Router needs to derive write preconditions.
#[derive(Clone, Debug)]
pub struct CacheEntry<S> {
    /// The latest event id folded into `instance`, or `None` on a cache miss.
    pub event_id: Option<EventId>,
    /// The rebuilt state, or `None` on a cache miss.
    pub instance: Option<S>,
    /// Every subject actually sourced while rebuilding, and the latest event
    /// id seen on it — becomes a `SubjectIsOnEventId` precondition per
    /// subject.
    pub sourced_subject_ids: HashMap<Subject, EventId>,
}

impl<S> CacheEntry<S> {
    /// The cache-miss sentinel: no event id, no instance, nothing sourced.
    #[must_use]
    pub fn miss() -> Self {
        Self {
            event_id: None,
            instance: None,
            sourced_subject_ids: HashMap::new(),
        }
    }
}

impl<S> Default for CacheEntry<S> {
    fn default() -> Self {
        Self::miss()
    }
}

/// A merge step: given the current cached value (or the miss sentinel),
/// produce the next value, typically by reading events after
/// `event_id` and folding them in via State Rebuilding Handlers.
pub type MergeFn<'a, S> = Box<
    dyn FnOnce(CacheEntry<S>) -> Pin<Box<dyn Future<Output = Result<CacheEntry<S>, CoreError>> + Send + 'a>>
        + Send
        + 'a,
>;

/// A bounded, per-key-serialized cache of rebuilt command state.
pub trait StateRebuildingCache<S>: Send + Sync
where
    S: Send + Clone + 'static,
{
    /// Atomically fetch the current value for `key` (or the miss sentinel),
    /// apply `merge` to it, and store the result back unless a concurrently
    /// stored value has a strictly newer `event_id`.
    ///
    /// # Errors
    ///
    /// Propagates whatever error `merge` returns (typically a store read
    /// failure).
    fn fetch_and_merge<'a>(
        &'a self,
        key: CacheKey,
        merge: MergeFn<'a, S>,
    ) -> Pin<Box<dyn Future<Output = Result<CacheEntry<S>, CoreError>> + Send + 'a>>;

    /// Drop the cached value for `key`, if any. Called after a
    /// `ConcurrencyViolation` to force a fresh replay on the caller's retry
    /// (spec §9 Design Notes, Open Question on cache invalidation).
    fn invalidate<'a>(&'a self, key: &'a CacheKey) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// A no-op cache: every fetch is a miss, every write is discarded. Used when
/// caching is disabled.
#[derive(Default)]
pub struct NoneCache;

impl<S> StateRebuildingCache<S> for NoneCache
where
    S: Send + Clone + 'static,
{
    fn fetch_and_merge<'a>(
        &'a self,
        _key: CacheKey,
        merge: MergeFn<'a, S>,
    ) -> Pin<Box<dyn Future<Output = Result<CacheEntry<S>, CoreError>> + Send + 'a>> {
        Box::pin(async move { merge(CacheEntry::miss()).await })
    }

    fn invalidate<'a>(&'a self, _key: &'a CacheKey) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {})
    }
}

/// A bounded LRU-evicted cache.
///
/// Every key's update is serialized by a dedicated per-key lock, held for
/// the full duration of `merge` (which typically does a store round-trip),
/// not just around the map read/write — two concurrent `fetch_and_merge`
/// calls for the *same* key run their merge bodies one after another, while
/// calls for distinct keys proceed independently. The per-key locks
/// themselves live in a second LRU, bounded to the same capacity as the
/// state cache, so the lock table cannot grow without bound as distinct
/// subjects are touched over the cache's lifetime.
pub struct LruCache<S> {
    inner: tokio::sync::Mutex<lru::LruCache<CacheKey, CacheEntry<S>>>,
    key_locks: std::sync::Mutex<lru::LruCache<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S> LruCache<S>
where
    S: Send + Clone + 'static,
{
    /// A cache bounded to `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(lru::LruCache::new(capacity)),
            key_locks: std::sync::Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = locks.get(key) {
            return Arc::clone(existing);
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.put(key.clone(), Arc::clone(&lock));
        lock
    }
}

impl<S> StateRebuildingCache<S> for LruCache<S>
where
    S: Send + Clone + 'static,
{
    fn fetch_and_merge<'a>(
        &'a self,
        key: CacheKey,
        merge: MergeFn<'a, S>,
    ) -> Pin<Box<dyn Future<Output = Result<CacheEntry<S>, CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let key_lock = self.key_lock(&key);
            let _key_guard = key_lock.lock().await;

            let guard = self.inner.lock().await;
            let current = guard.get(&key).cloned().unwrap_or_else(CacheEntry::miss);
            drop(guard);

            let merged = merge(current).await?;

            let mut guard = self.inner.lock().await;
            let should_store = match guard.get(&key) {
                Some(existing) => newer_or_equal(&merged.event_id, &existing.event_id),
                None => true,
            };
            if should_store {
                guard.put(key, merged.clone());
            } else {
                tracing::debug!("discarding stale state-rebuild merge result");
            }
            Ok(merged)
        })
    }

    fn invalidate<'a>(&'a self, key: &'a CacheKey) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.inner.lock().await;
            guard.pop(key);
        })
    }
}

fn newer_or_equal(candidate: &Option<EventId>, existing: &Option<EventId>) -> bool {
    match (candidate, existing) {
        (Some(c), Some(e)) => c >= e,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
