//! Sequence and Partition Key Resolvers: map an event (or its upcasted
//! payload) to a sequence id, then that sequence id to a partition number,
//! so that events sharing a sequence id are always handled by the same
//! `(group, partition)` consumer and therefore strictly in store order
//! (spec §4.8, §5 ordering guarantees).

use cqrs_es_core::{Event, MetaData, Subject};

/// A value a [`SequenceResolver`] reduces an event to, before partitioning.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceId(String);

impl SequenceId {
    /// Wrap an already-computed sequence id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether a [`SequenceResolver`] needs only the raw event, or the upcasted
/// and deserialized `(metaData, payload)` pair.
///
/// The processing loop defers the relevance check until after upcast and
/// deserialization for `ObjectMode` resolvers, so a resolver never runs
/// ahead of the data it depends on.
pub enum SequenceResolver<P> {
    /// Compute the sequence id from the raw event alone.
    RawMode(Box<dyn Fn(&Event) -> SequenceId + Send + Sync>),
    /// Compute the sequence id from the upcasted event's decoded payload and
    /// meta-data.
    ObjectMode(Box<dyn Fn(&P, &MetaData) -> SequenceId + Send + Sync>),
}

impl<P> SequenceResolver<P> {
    /// `sequenceId = event.subject`.
    #[must_use]
    pub fn per_subject() -> Self {
        Self::RawMode(Box::new(|event: &Event| {
            SequenceId::new(event.subject.as_str())
        }))
    }

    /// `sequenceId = event.subject` truncated to its first `levels` segments.
    #[must_use]
    pub fn per_n_level_subject(levels: usize) -> Self {
        Self::RawMode(Box::new(move |event: &Event| {
            SequenceId::new(event.subject.first_n_levels(levels).as_str())
        }))
    }

    /// `sequenceId = event.id`, implying full parallelism (every event is its
    /// own sequence, so ordering is enforced per event only).
    #[must_use]
    pub fn none() -> Self {
        Self::RawMode(Box::new(|event: &Event| SequenceId::new(event.id.as_str())))
    }

    /// Compute a sequence id from the decoded payload and meta-data.
    #[must_use]
    pub fn object_and_metadata(
        resolve: impl Fn(&P, &MetaData) -> SequenceId + Send + Sync + 'static,
    ) -> Self {
        Self::ObjectMode(Box::new(resolve))
    }

    /// Whether this resolver can determine relevance from the raw event
    /// alone (`true`) or must wait for upcast+deserialize (`false`).
    #[must_use]
    pub const fn is_raw_mode(&self) -> bool {
        matches!(self, Self::RawMode(_))
    }

    /// Resolve a raw-mode sequence id. Panics if this resolver is
    /// object-mode; the processing loop only calls this after checking
    /// [`Self::is_raw_mode`].
    #[must_use]
    pub fn resolve_raw(&self, event: &Event) -> SequenceId {
        match self {
            Self::RawMode(f) => f(event),
            Self::ObjectMode(_) => {
                unreachable!("resolve_raw called on an object-mode resolver")
            }
        }
    }

    /// Resolve an object-mode sequence id. Panics if this resolver is
    /// raw-mode; the processing loop only calls this after checking
    /// [`Self::is_raw_mode`].
    #[must_use]
    pub fn resolve_object(&self, payload: &P, metadata: &MetaData) -> SequenceId {
        match self {
            Self::ObjectMode(f) => f(payload, metadata),
            Self::RawMode(_) => unreachable!("resolve_object called on a raw-mode resolver"),
        }
    }
}

/// Deterministically maps a [`SequenceId`] to a partition number in
/// `[0, active_partitions)` via a stable FNV-1a checksum modulo.
///
/// Changing `active_partitions` after progress has been persisted
/// redistributes sequence ids across partitions, which is undefined
/// behavior for resumption; operators must reset or migrate progress
/// externally (spec §4.8).
pub struct PartitionKeyResolver {
    active_partitions: u64,
}

impl PartitionKeyResolver {
    /// A resolver over `active_partitions` partitions numbered `0..active_partitions`.
    ///
    /// # Panics
    ///
    /// Panics if `active_partitions` is zero.
    #[must_use]
    pub const fn new(active_partitions: u64) -> Self {
        assert!(active_partitions > 0, "active_partitions must be nonzero");
        Self { active_partitions }
    }

    /// The partition number `sequence_id` maps to.
    #[must_use]
    pub fn partition_for(&self, sequence_id: &SequenceId) -> u64 {
        fnv1a(sequence_id.as_str().as_bytes()) % self.active_partitions
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqrs_es_core::EventId;
    use chrono::DateTime;

    fn event(subject: &str) -> Event {
        Event {
            source: "tag://test".to_string(),
            subject: Subject::new(subject).unwrap(),
            event_type: "t".to_string(),
            data: serde_json::json!({"metadata": {}, "payload": {}}),
            spec_version: "1.0".to_string(),
            id: EventId::new("e1"),
            time: DateTime::UNIX_EPOCH,
            data_content_type: "application/json".to_string(),
            hash: None,
            predecessor_hash: None,
        }
    }

    #[test]
    fn per_subject_uses_full_path() {
        let resolver: SequenceResolver<()> = SequenceResolver::per_subject();
        let id = resolver.resolve_raw(&event("/books/X/pages/1"));
        assert_eq!(id.as_str(), "/books/X/pages/1");
    }

    #[test]
    fn per_n_level_subject_truncates() {
        let resolver: SequenceResolver<()> = SequenceResolver::per_n_level_subject(2);
        let id = resolver.resolve_raw(&event("/books/X/pages/1"));
        assert_eq!(id.as_str(), "/books/X");
    }

    #[test]
    fn none_resolver_uses_event_id() {
        let resolver: SequenceResolver<()> = SequenceResolver::none();
        let id = resolver.resolve_raw(&event("/books/X"));
        assert_eq!(id.as_str(), "e1");
    }

    #[test]
    fn partition_resolution_is_deterministic() {
        let resolver = PartitionKeyResolver::new(4);
        let id = SequenceId::new("/books/X");
        assert_eq!(resolver.partition_for(&id), resolver.partition_for(&id));
    }

    #[test]
    fn partition_resolution_stays_in_range() {
        let resolver = PartitionKeyResolver::new(3);
        for subject in ["/a", "/b", "/c/d", "/books/X/pages/1"] {
            let id = SequenceId::new(subject);
            assert!(resolver.partition_for(&id) < 3);
        }
    }
}
