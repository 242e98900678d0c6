//! HTTP/NDJSON protocol adapter for the event store: authenticate, health,
//! write, read and observe, with local pre-flight option validation and
//! error-category mapping.

pub mod client;
pub mod config;
pub mod error;
pub mod options;
pub mod wire;

pub use client::{EventStream, HttpStoreClient, StoreClient};
pub use config::ClientConfig;
pub use options::{FromLatestEvent, IfEventIsMissing, Options, OptionsBuilder, Order};
pub use wire::{HealthResponse, HealthStatus, StreamLine};
