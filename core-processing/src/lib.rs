//! Event Handling Processor: resumable, partitioned, back-off-driven
//! dispatch of stored events to registered Event Handlers, plus the
//! Life-cycle Controller that starts and stops processors.

pub mod backoff;
pub mod handler_registry;
pub mod lifecycle;
pub mod processor;
pub mod progress;
pub mod sequence;

pub use backoff::{BackOff, BackOffExecution};
pub use handler_registry::{EventHandlerRegistry, MATCH_ALL, TransactionalEventHandler};
pub use lifecycle::{DistributedLock, LifecycleController, ManagedRun};
pub use processor::{EventHandlingProcessor, ProcessorConfig};
pub use progress::{
    InMemoryProgressTracker, PostgresProgressTracker, Progress, ProgressOutcome, ProgressTracker,
    TxOperation,
};
pub use sequence::{PartitionKeyResolver, SequenceId, SequenceResolver};
