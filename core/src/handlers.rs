//! First-class handler registrations for command routing, state rebuilding
//! and event handling.
//!
//! The origin design discovers handlers via annotations/reflection; Rust has
//! neither, so handlers here are ordinary values registered on a builder
//! (spec §8 Design Notes) — the same shape the type resolvers in
//! `core::type_resolver` already use.

use crate::error::CoreError;
use crate::event::Event;
use crate::subject::Subject;
use std::collections::HashSet;

/// How much of a subject's event history the Command Router rebuilds state
/// from before invoking a command handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourcingMode {
    /// No state is rebuilt; the handler receives no prior state.
    None,
    /// Rebuild from events recorded exactly on the command's derived subject.
    Local,
    /// Rebuild from events recorded anywhere at or below the command's
    /// derived subject.
    Recursive,
}

/// Which meta-data keys a rebuilt event's meta-data contributes onward into a
/// captured event produced from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaDataPropagation {
    /// Carry every meta-data key forward unchanged.
    KeepAll,
    /// Carry forward only the named keys.
    KeepKnown(HashSet<String>),
    /// Carry forward no meta-data.
    None,
}

impl MetaDataPropagation {
    /// Filter `metadata` according to this policy.
    #[must_use]
    pub fn apply(&self, metadata: &crate::event_data::MetaData) -> crate::event_data::MetaData {
        match self {
            Self::KeepAll => metadata.clone(),
            Self::KeepKnown(keys) => metadata
                .iter()
                .filter(|(k, _)| keys.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Self::None => crate::event_data::MetaData::new(),
        }
    }
}

/// A precondition the Command Router derives from the current state of a
/// command's subject before dispatch, beyond any preconditions the handler
/// itself captures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectCondition {
    /// The subject must have no prior events.
    Pristine,
    /// The subject must have at least one prior event.
    Exists,
    /// No condition is derived from the subject's history.
    None,
}

/// A handler invoked by the Command Router to process one command type.
///
/// `C` is the command payload type; `S` is the state type rebuilt for the
/// handler's subject via its registered [`StateRebuildingHandler`]s.
pub trait CommandHandler<C, S>: Send + Sync {
    /// The subject this command applies to, computed from the command's own
    /// fields (it need not exist yet).
    fn derive_subject(&self, command: &C) -> Subject;

    /// Whether the router must assert the subject is pristine, already
    /// populated, or make no assertion before invoking this handler.
    fn subject_condition(&self) -> SubjectCondition {
        SubjectCondition::None
    }

    /// How much state history to rebuild before invoking the handler.
    fn sourcing_mode(&self) -> SourcingMode {
        SourcingMode::Local
    }

    /// Handle `command` against the rebuilt `state`, returning new events to
    /// publish (see `core::event_data::CapturedEvent`).
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`]; `NonTransient` variants abort the command
    /// outright, `Transient` variants may be retried by the caller.
    fn handle(
        &self,
        command: C,
        state: Option<&S>,
    ) -> Result<Vec<crate::event_data::CapturedEvent>, CoreError>;
}

/// A handler that folds one rebuilt event into an in-progress state value.
///
/// Registered per event payload type against a [`CommandHandler`]'s state
/// type; the Command Router (and the State Rebuilding Cache beneath it)
/// applies every matching handler, in event order, to produce the rebuilt
/// state passed to the command handler.
pub trait StateRebuildingHandler<E, S>: Send + Sync {
    /// Fold `payload` into `state`, producing the next state value. `state`
    /// is `None` only for the very first matching event.
    ///
    /// `metadata` is the folded event's own meta-data (after the command
    /// router's propagation policy has nothing to do with it — this is the
    /// raw, as-recorded meta-data); `subject` is the subject `raw_event` was
    /// actually recorded on, which under [`SourcingMode::Recursive`] sourcing
    /// may be a descendant of the state's own subject rather than the
    /// subject itself.
    fn apply(
        &self,
        state: Option<S>,
        payload: &E,
        metadata: &crate::event_data::MetaData,
        subject: &Subject,
        raw_event: &Event,
    ) -> S;
}

/// A handler invoked once per matching event by the Event Handling Processor.
///
/// Unlike [`CommandHandler`], event handlers have no return value fed back
/// into the store; their effect (if any) is external (a projection update, a
/// side-effecting call, a published follow-up command).
pub trait EventHandler<E>: Send + Sync {
    /// Handle one occurrence of `event`.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`]; the Event Handling Processor treats
    /// `Transient` variants as retryable per its configured back-off policy
    /// and `NonTransient` variants as a handler defect to surface upward.
    fn handle(&self, event: &Event, payload: &E) -> Result<(), CoreError>;
}
