//! Layered event read/write API built on `cqrs-es-client`: applies the
//! Upcaster Chain and Type Resolver on read, and buffers captured events
//! into a single atomic write.

pub mod repository;

pub use repository::{EventRepository, ObjectStream, UpcastedStream};
