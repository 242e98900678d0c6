//! Test doubles and end-to-end scenario fixtures exercising the Event Store
//! Client, Command Routing & State-Sourcing Engine, and Event Handling
//! Processor together against one in-memory store.

pub mod store;

pub use store::{take_n, InMemoryStoreClient};
