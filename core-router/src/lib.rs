//! The Command Router (spec §4.7): dispatches commands to handlers after
//! rebuilding state through the State Rebuilding Cache, then atomically
//! publishes the handler's captured events under the preconditions derived
//! from that rebuild.

pub mod router;
pub mod state_rebuilder;

pub use router::CommandRouter;
pub use state_rebuilder::StateRebuilder;
