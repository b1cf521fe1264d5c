//! cachedb - A write-through row cache backed by a crash-safe write-ahead log
//!
//! Writes are logged and fsynced before they become visible, served from
//! memory until their TTL passes, then flushed to a backing store. Log space
//! is reclaimed only once every mutation in the reclaimed prefix has been
//! applied to the backing store.

pub mod backing;
pub mod checkpoint;
pub mod engine;
pub mod evict;
pub mod flush;
pub mod observability;
pub mod row;
pub mod store;
pub mod wal;

pub use backing::{Backend, MemoryBackend};
pub use engine::{CacheConfig, CacheError, CacheResult, Engine, EngineState, EngineStats};
pub use row::{columns, ColumnMap, Value};
