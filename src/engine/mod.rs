//! Cache engine
//!
//! Ties the log, the entry store and the two background loops together.
//!
//! # Lifecycle
//!
//! `Starting → Recovering → Serving → Closing`
//!
//! - Starting: open the log, create the store
//! - Recovering: replay the log into the store; `open` returns only after
//!   this completes, so no caller ever sees a partially recovered store
//! - The evictor and flusher are spawned once replay is done. Nothing is
//!   flushed or reclaimed while replay is still tracking log offsets
//! - Serving: `set`/`delete` append to the log, then mutate the store;
//!   `get` reads the store only
//! - Closing: the evictor stops, the flusher drains its queue
//!
//! # Ordering
//!
//! Writes to the same key are linearized by a striped key lock held across
//! the log append and the store mutation. Writes to keys on different
//! stripes proceed in parallel, serialized only by the log's own lock.

mod config;
mod errors;
mod recovery;

pub use config::CacheConfig;
pub use errors::{CacheError, CacheResult};
pub use recovery::RecoveryReport;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backing::Backend;
use crate::checkpoint::{CheckpointCoordinator, CheckpointOutcome};
use crate::evict::Evictor;
use crate::flush::{self, FlushCounters, FlushStats, Flusher};
use crate::observability::Event;
use crate::row::{ColumnMap, KEY_SEPARATOR};
use crate::store::{EntryKey, EntryStore};
use crate::wal::{LogRecord, Lsn};

const KEY_LOCK_STRIPES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Starting,
    Recovering,
    Serving,
    Closing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Starting => "starting",
            EngineState::Recovering => "recovering",
            EngineState::Serving => "serving",
            EngineState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub state: EngineState,
    /// Entries in memory, expired and tombstoned ones included
    pub resident_entries: usize,
    /// Log records not yet confirmed flushed
    pub pending_records: usize,
    pub log_len: u64,
    pub flush: FlushStats,
}

struct BackgroundTasks {
    evictor: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

pub struct Engine {
    config: CacheConfig,
    state: RwLock<EngineState>,
    store: Arc<EntryStore>,
    coordinator: Arc<CheckpointCoordinator>,
    key_locks: Box<[Mutex<()>]>,
    flush_counters: Arc<FlushCounters>,
    recovery: RecoveryReport,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl Engine {
    /// Open the cache, replaying the log before returning.
    ///
    /// Must be called from within a tokio runtime, which hosts the evictor
    /// and flusher loops.
    pub fn open(config: CacheConfig, backend: Backend) -> CacheResult<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;

        let state = RwLock::new(EngineState::Starting);
        info!(
            event = %Event::OpenStart,
            wal_path = %config.wal_path.display(),
            ttl_ms = config.ttl_ms,
            "Opening cache engine"
        );

        let coordinator = Arc::new(CheckpointCoordinator::open(&config.wal_path)?);
        let store = Arc::new(EntryStore::new(config.ttl()));

        set_state(&state, EngineState::Recovering)?;
        let recovery = recovery::recover(&coordinator, &store)?;

        let (queue_tx, queue_rx) = flush::queue(config.flush_queue_capacity);
        let flusher = Flusher::new(
            queue_rx,
            backend,
            coordinator.clone(),
            config.flush_timeout(),
            config.checkpoint_on_flush,
        );
        let flush_counters = flusher.counters();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let evictor = Evictor::new(
            store.clone(),
            queue_tx,
            config.poll_interval(),
            shutdown_rx,
        );

        set_state(&state, EngineState::Serving)?;
        let tasks = BackgroundTasks {
            flusher: flusher.spawn(&handle),
            evictor: evictor.spawn(&handle),
        };

        info!(
            event = %Event::Serving,
            resident = store.len(),
            "Cache engine serving"
        );

        Ok(Self {
            config,
            state,
            store,
            coordinator,
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            flush_counters,
            recovery,
            shutdown,
            tasks: Mutex::new(Some(tasks)),
        })
    }

    /// Insert or replace a row. Durable once this returns.
    pub fn set(
        &self,
        table: &str,
        primary_key: &ColumnMap,
        columns: ColumnMap,
    ) -> CacheResult<()> {
        self.ensure_serving()?;
        validate_row_key(table, primary_key)?;

        let key = EntryKey::new(table, primary_key);
        let _guard = self.lock_key(&key)?;

        let record = LogRecord::put_row(table, primary_key, &columns);
        let lsn = self.append(&record, key, table)?;
        self.store.upsert(table, primary_key, columns, lsn);
        Ok(())
    }

    /// Current columns of a row, or `None` if unknown, deleted or expired.
    pub fn get(&self, table: &str, primary_key: &ColumnMap) -> CacheResult<Option<ColumnMap>> {
        validate_row_key(table, primary_key)?;
        Ok(self.store.get(table, primary_key))
    }

    /// Delete a row. Returns whether a visible row existed.
    ///
    /// Rows that are unknown, already deleted or expired are not logged and
    /// return `false`. An expired entry keeps its last value, which the
    /// evictor still flushes.
    pub fn delete(&self, table: &str, primary_key: &ColumnMap) -> CacheResult<bool> {
        self.ensure_serving()?;
        validate_row_key(table, primary_key)?;

        let key = EntryKey::new(table, primary_key);
        let _guard = self.lock_key(&key)?;

        if self.store.get(table, primary_key).is_none() {
            return Ok(false);
        }

        let record = LogRecord::delete_row(table, primary_key);
        let lsn = self.append(&record, key, table)?;
        // May expire or be evicted between the check and here; the logged
        // delete still lands as a tombstone behind the flushed value.
        self.store.tombstone(table, primary_key, lsn);
        Ok(true)
    }

    /// Reclaim the log prefix whose mutations have all been flushed.
    pub fn checkpoint(&self) -> CacheResult<CheckpointOutcome> {
        self.ensure_serving()?;
        self.coordinator.checkpoint().map_err(|e| {
            error!(event = %Event::CheckpointFailed, error = %e, "Checkpoint failed");
            CacheError::from(e)
        })
    }

    /// fsync the log without writing.
    pub fn sync(&self) -> CacheResult<()> {
        Ok(self.coordinator.sync()?)
    }

    pub fn state(&self) -> EngineState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(EngineState::Closing)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// What the startup replay found.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn stats(&self) -> CacheResult<EngineStats> {
        Ok(EngineStats {
            state: self.state(),
            resident_entries: self.store.len(),
            pending_records: self.coordinator.pending_count()?,
            log_len: self.coordinator.log_len()?,
            flush: self.flush_counters.snapshot(),
        })
    }

    /// Stop the evictor, let the flusher drain and sync the log.
    ///
    /// Entries still resident stay in the log and are replayed on the next
    /// open. Calling this twice is harmless.
    pub async fn shutdown(&self) -> CacheResult<FlushStats> {
        if self.state() == EngineState::Closing {
            return Ok(self.flush_counters.snapshot());
        }
        self.set_state(EngineState::Closing)?;
        info!(event = %Event::ShutdownStart, resident = self.store.len(), "Shutting down");

        let _ = self.shutdown.send(true);
        let tasks = self
            .tasks
            .lock()
            .map_err(|_| CacheError::LockPoisoned("background tasks"))?
            .take();

        if let Some(tasks) = tasks {
            if let Err(e) = tasks.evictor.await {
                warn!(error = %e, "Evictor task ended abnormally");
            }
            if let Err(e) = tasks.flusher.await {
                warn!(error = %e, "Flusher task ended abnormally");
            }
        }

        self.coordinator.sync()?;
        let stats = self.flush_counters.snapshot();
        info!(
            event = %Event::ShutdownComplete,
            applied = stats.applied,
            failed = stats.failed,
            "Shutdown complete"
        );
        Ok(stats)
    }

    fn append(&self, record: &LogRecord, key: EntryKey, table: &str) -> CacheResult<Lsn> {
        self.coordinator.append(record, key).map_err(|e| {
            error!(
                event = %Event::WalWriteFailed,
                table,
                kind = ?record.kind(),
                error = %e,
                "Log append failed"
            );
            CacheError::from(e)
        })
    }

    fn ensure_serving(&self) -> CacheResult<()> {
        match self.state() {
            EngineState::Serving => Ok(()),
            _ => Err(CacheError::Closed),
        }
    }

    fn set_state(&self, next: EngineState) -> CacheResult<()> {
        set_state(&self.state, next)
    }

    fn lock_key(&self, key: &EntryKey) -> CacheResult<MutexGuard<'_, ()>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.key_locks.len();

        self.key_locks[stripe]
            .lock()
            .map_err(|_| CacheError::LockPoisoned("key stripe"))
    }
}

fn set_state(state: &RwLock<EngineState>, next: EngineState) -> CacheResult<()> {
    let mut state = state
        .write()
        .map_err(|_| CacheError::LockPoisoned("engine state"))?;
    *state = next;
    Ok(())
}

impl Drop for Engine {
    /// Without `shutdown`, background loops are aborted mid-flight. The log
    /// is left exactly as a crash would leave it.
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            if let Some(tasks) = tasks.take() {
                tasks.evictor.abort();
                tasks.flusher.abort();
            }
        }
    }
}

fn validate_row_key(table: &str, primary_key: &ColumnMap) -> CacheResult<()> {
    if table.is_empty() {
        return Err(CacheError::MalformedInput("table name is empty".into()));
    }
    if table.as_bytes().contains(&KEY_SEPARATOR) {
        return Err(CacheError::MalformedInput(format!(
            "table name '{}' contains the key separator '{}'",
            table, KEY_SEPARATOR as char
        )));
    }
    if primary_key.is_empty() {
        return Err(CacheError::MalformedInput(format!(
            "empty primary key for table '{}'",
            table
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryBackend;
    use crate::row::columns;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CacheConfig {
        CacheConfig::new(dir.path().join("wal.log")).with_ttl(Duration::from_secs(60))
    }

    fn backend() -> Backend {
        let memory = Arc::new(MemoryBackend::new());
        memory.register_table("users", ["id"]);
        Backend::in_memory(memory)
    }

    #[test]
    fn test_open_requires_runtime() {
        let dir = TempDir::new().unwrap();
        let err = Engine::open(config(&dir), backend()).err().unwrap();
        assert!(matches!(err, CacheError::NoRuntime));
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let err = Engine::open(config(&dir).with_ttl(Duration::ZERO), backend())
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(config(&dir), backend()).unwrap();
        assert_eq!(engine.state(), EngineState::Serving);

        let pk = columns([("id", 1)]);
        engine.set("users", &pk, columns([("name", "Alice")])).unwrap();
        assert_eq!(
            engine.get("users", &pk).unwrap(),
            Some(columns([("name", "Alice")]))
        );

        assert!(engine.delete("users", &pk).unwrap());
        assert_eq!(engine.get("users", &pk).unwrap(), None);
        assert!(!engine.delete("users", &columns([("id", 99)])).unwrap());

        let stats = engine.stats().unwrap();
        assert_eq!(stats.pending_records, 2);
        assert_eq!(stats.resident_entries, 1);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_key_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(config(&dir), backend()).unwrap();

        assert!(!engine.delete("users", &columns([("id", 5)])).unwrap());
        assert_eq!(engine.stats().unwrap().log_len, 0);
    }

    #[tokio::test]
    async fn test_malformed_input_is_rejected_before_logging() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(config(&dir), backend()).unwrap();
        let pk = columns([("id", 1)]);

        for result in [
            engine.set("", &pk, ColumnMap::new()),
            engine.set("a|b", &pk, ColumnMap::new()),
            engine.set("users", &ColumnMap::new(), ColumnMap::new()),
        ] {
            assert!(matches!(result, Err(CacheError::MalformedInput(_))));
        }
        assert_eq!(engine.stats().unwrap().log_len, 0);
    }

    #[tokio::test]
    async fn test_writes_rejected_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(config(&dir), backend()).unwrap();
        let pk = columns([("id", 1)]);
        engine.set("users", &pk, columns([("name", "A")])).unwrap();

        engine.shutdown().await.unwrap();

        assert_eq!(engine.state(), EngineState::Closing);
        assert!(matches!(
            engine.set("users", &pk, ColumnMap::new()),
            Err(CacheError::Closed)
        ));
        assert!(matches!(engine.checkpoint(), Err(CacheError::Closed)));
        // Reads still see resident state
        assert!(engine.get("users", &pk).unwrap().is_some());
        // Idempotent
        engine.shutdown().await.unwrap();
    }

    #[test]
    fn test_validate_row_key() {
        let pk = columns([("id", 1)]);
        assert!(validate_row_key("users", &pk).is_ok());
        assert!(validate_row_key("", &pk).is_err());
        assert!(validate_row_key("a|b", &pk).is_err());
        assert!(validate_row_key("users", &ColumnMap::new()).is_err());
    }
}
