//! The bounded State Rebuilding Cache used by the Command Router to avoid
//! re-replaying a subject's full history on every command.

pub mod cache;

pub use cache::{CacheEntry, CacheKey, LruCache, MergeFn, NoneCache, StateRebuildingCache};
