//! Bidirectional mapping between wire event-type strings and runtime type
//! descriptors.
//!
//! Two implementations are provided, matching spec §4.3:
//!
//! - [`NameBasedTypeResolver`]: every registered payload type supplies its
//!   own stable wire name (the Rust equivalent of using a fully-qualified
//!   class name — `std::any::type_name` is explicitly *not* used for this,
//!   since it is not guaranteed stable across compiler versions or crate
//!   renames).
//! - [`MappedTypeResolver`]: an explicit table from wire name to `TypeId`,
//!   with ambiguity detection on encode (Rust payload types are concrete
//!   structs/enums, not open class hierarchies, so "assignability" here
//!   means "more than one registered entry claims this concrete type").

use crate::error::{CoreError, NonTransientKind};
use std::any::TypeId;
use std::collections::HashMap;

/// Bidirectional map between a wire type string and a runtime [`TypeId`].
pub trait TypeResolver: Send + Sync {
    /// The wire type string for a concrete payload type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`NonTransientKind::TypeResolution`] if `T` is not registered,
    /// or (for [`MappedTypeResolver`]) if more than one entry claims `T`.
    fn type_name_for<T: 'static>(&self) -> Result<&str, CoreError>;

    /// The runtime [`TypeId`] for a wire type string, for decode-time
    /// dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`NonTransientKind::TypeResolution`] if `type_name` is not
    /// registered.
    fn type_id_for(&self, type_name: &str) -> Result<TypeId, CoreError>;
}

/// A type resolver where every registrant supplies its own stable wire name.
///
/// This is the Rust analogue of "use the fully-qualified class name as the
/// wire type": callers register `(TypeId::of::<T>(), name)` pairs up front
/// (typically via `T::event_type()`-style associated functions), and lookup
/// in either direction is a direct map access — no assignability search is
/// needed because every registration is for exactly one concrete type.
#[derive(Default)]
pub struct NameBasedTypeResolver {
    by_type: HashMap<TypeId, &'static str>,
    by_name: HashMap<&'static str, TypeId>,
}

impl NameBasedTypeResolver {
    /// An empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete type `T` under its stable wire name.
    #[must_use]
    pub fn register<T: 'static>(mut self, name: &'static str) -> Self {
        let type_id = TypeId::of::<T>();
        self.by_type.insert(type_id, name);
        self.by_name.insert(name, type_id);
        self
    }
}

impl TypeResolver for NameBasedTypeResolver {
    fn type_name_for<T: 'static>(&self) -> Result<&str, CoreError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or_else(|| {
                CoreError::NonTransient(NonTransientKind::TypeResolution(
                    "no wire name registered for this type".to_string(),
                ))
            })
    }

    fn type_id_for(&self, type_name: &str) -> Result<TypeId, CoreError> {
        self.by_name.get(type_name).copied().ok_or_else(|| {
            CoreError::NonTransient(NonTransientKind::TypeResolution(format!(
                "unknown event type: {type_name}"
            )))
        })
    }
}

/// A type resolver backed by an explicit, pre-configured table.
///
/// Distinct from [`NameBasedTypeResolver`] in spirit only: spec §4.3
/// describes it as "assignability lookup" so that a handler registered for a
/// supertype can match several payload subtypes, but Rust payloads are
/// concrete types without runtime subtyping, so registering the same
/// `TypeId` under two different wire names is the ambiguity this resolver
/// actually has to detect.
#[derive(Default)]
pub struct MappedTypeResolver {
    entries: Vec<(TypeId, &'static str)>,
}

impl MappedTypeResolver {
    /// An empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `(type, wire name)` entry.
    #[must_use]
    pub fn register<T: 'static>(mut self, name: &'static str) -> Self {
        self.entries.push((TypeId::of::<T>(), name));
        self
    }
}

impl TypeResolver for MappedTypeResolver {
    fn type_name_for<T: 'static>(&self) -> Result<&str, CoreError> {
        let type_id = TypeId::of::<T>();
        let mut matches = self.entries.iter().filter(|(id, _)| *id == type_id);
        let first = matches.next().ok_or_else(|| {
            CoreError::NonTransient(NonTransientKind::TypeResolution(
                "no wire name registered for this type".to_string(),
            ))
        })?;
        if matches.next().is_some() {
            return Err(CoreError::NonTransient(NonTransientKind::TypeResolution(
                "ambiguous type resolution: multiple wire names registered for this type"
                    .to_string(),
            )));
        }
        Ok(first.1)
    }

    fn type_id_for(&self, type_name: &str) -> Result<TypeId, CoreError> {
        self.entries
            .iter()
            .find(|(_, name)| *name == type_name)
            .map(|(id, _)| *id)
            .ok_or_else(|| {
                CoreError::NonTransient(NonTransientKind::TypeResolution(format!(
                    "unknown event type: {type_name}"
                )))
            })
    }
}
