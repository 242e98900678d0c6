//! Pure domain types and traits for the CQRS/event-sourcing framework: no
//! I/O lives here — that is the job of the `core-client`, `core-cache`,
//! `core-repository`, `core-router` and `core-processing` crates built on
//! top of it.

pub mod error;
pub mod event;
pub mod event_data;
pub mod handlers;
pub mod precondition;
pub mod subject;
pub mod type_resolver;
pub mod upcasting;

pub use error::{CoreError, NonTransientKind, TransientKind};
pub use event::{Event, EventCandidate, EventId};
pub use event_data::{CapturedEvent, EventData, MetaData};
pub use handlers::{
    CommandHandler, EventHandler, MetaDataPropagation, SourcingMode, StateRebuildingHandler,
    SubjectCondition,
};
pub use precondition::Precondition;
pub use subject::Subject;
pub use type_resolver::{MappedTypeResolver, NameBasedTypeResolver, TypeResolver};
pub use upcasting::{Upcaster, UpcasterChain, UpcastableEvent};
