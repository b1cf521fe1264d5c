//! Flush worker
//!
//! Drains the queue in FIFO order. Each attempt resolves the schema, builds
//! the statement and applies it, all under one timeout. A confirmed flush
//! releases the mutation's log records and optionally triggers a
//! checkpoint. A failed flush is logged and abandoned: its records stay in
//! the log and are replayed on the next start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Mutation;
use crate::backing::{Backend, BackingError, BackingResult};
use crate::checkpoint::{CheckpointCoordinator, CheckpointOutcome, CheckpointResult};
use crate::observability::Event;
use crate::row::display_map;

/// Counters shared between the flusher and whoever reports on it.
#[derive(Debug, Default)]
pub struct FlushCounters {
    applied: AtomicU64,
    failed: AtomicU64,
    reclaimed_bytes: AtomicU64,
}

impl FlushCounters {
    pub fn snapshot(&self) -> FlushStats {
        FlushStats {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reclaimed_bytes: self.reclaimed_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    /// Mutations applied to the backing store
    pub applied: u64,
    /// Attempts abandoned (backend error or timeout)
    pub failed: u64,
    /// Log bytes reclaimed by flush-triggered checkpoints
    pub reclaimed_bytes: u64,
}

pub struct Flusher {
    queue: mpsc::Receiver<Mutation>,
    backend: Backend,
    coordinator: Arc<CheckpointCoordinator>,
    timeout: Duration,
    checkpoint_on_flush: bool,
    counters: Arc<FlushCounters>,
}

impl Flusher {
    pub fn new(
        queue: mpsc::Receiver<Mutation>,
        backend: Backend,
        coordinator: Arc<CheckpointCoordinator>,
        timeout: Duration,
        checkpoint_on_flush: bool,
    ) -> Self {
        Self {
            queue,
            backend,
            coordinator,
            timeout,
            checkpoint_on_flush,
            counters: Arc::new(FlushCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<FlushCounters> {
        self.counters.clone()
    }

    pub fn spawn(self, handle: &Handle) -> JoinHandle<()> {
        handle.spawn(self.run())
    }

    /// Process mutations until every sender is gone and the queue is empty.
    pub async fn run(mut self) {
        while let Some(mutation) = self.queue.recv().await {
            self.process(mutation).await;
        }

        info!(
            applied = self.counters.applied.load(Ordering::Relaxed),
            failed = self.counters.failed.load(Ordering::Relaxed),
            "Flush queue drained"
        );
    }

    async fn process(&self, mutation: Mutation) {
        match self.attempt(&mutation).await {
            Ok(()) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event = %Event::FlushApplied,
                    table = %mutation.table,
                    key = %display_map(&mutation.primary_key),
                    version = mutation.version,
                    delete = mutation.is_delete,
                    "Mutation applied to backing store"
                );
                self.release(&mutation).await;
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = %Event::FlushFailed,
                    table = %mutation.table,
                    key = %display_map(&mutation.primary_key),
                    version = mutation.version,
                    error = %e,
                    "Flush failed; mutation retained in log"
                );
            }
        }
    }

    async fn attempt(&self, mutation: &Mutation) -> BackingResult<()> {
        let backend = &self.backend;
        let work = async {
            let schema = backend.schemas.schema_of(&mutation.table).await?;
            let statement = backend.builder.build(mutation, &schema)?;
            backend.writer.apply(&statement).await
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(BackingError::Timeout(self.timeout)),
        }
    }

    /// Confirm the mutation's records and optionally reclaim log space.
    async fn release(&self, mutation: &Mutation) {
        let coordinator = self.coordinator.clone();
        let key = mutation.entry_key();
        let lsn = mutation.lsn;
        let checkpoint = self.checkpoint_on_flush;

        let result = tokio::task::spawn_blocking(
            move || -> CheckpointResult<Option<CheckpointOutcome>> {
                coordinator.confirm(&key, lsn)?;
                if checkpoint {
                    coordinator.checkpoint().map(Some)
                } else {
                    Ok(None)
                }
            },
        )
        .await;

        match result {
            Ok(Ok(Some(outcome))) => {
                self.counters
                    .reclaimed_bytes
                    .fetch_add(outcome.reclaimed_bytes, Ordering::Relaxed);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(
                event = %Event::CheckpointFailed,
                table = %mutation.table,
                error = %e,
                "Checkpoint after flush failed"
            ),
            Err(e) => warn!(
                event = %Event::CheckpointFailed,
                table = %mutation.table,
                error = %e,
                "Checkpoint task did not complete"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryBackend;
    use crate::row::{columns, Value};
    use crate::store::EntryKey;
    use crate::wal::LogRecord;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        memory: Arc<MemoryBackend>,
        coordinator: Arc<CheckpointCoordinator>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let coordinator =
            Arc::new(CheckpointCoordinator::open(&dir.path().join("wal.log")).unwrap());
        let memory = Arc::new(MemoryBackend::new());
        memory.register_table("users", ["id"]);
        Harness {
            _dir: dir,
            memory,
            coordinator,
        }
    }

    fn logged_put(coordinator: &CheckpointCoordinator, id: i64, name: &str) -> Mutation {
        let pk = columns([("id", id)]);
        let cols = columns([("name", name)]);
        let record = LogRecord::put_row("users", &pk, &cols);
        let lsn = coordinator
            .append(&record, EntryKey::new("users", &pk))
            .unwrap();
        Mutation {
            table: "users".into(),
            primary_key: pk,
            columns: cols,
            version: 1,
            is_delete: false,
            lsn,
        }
    }

    async fn run_flusher(h: &Harness, mutations: Vec<Mutation>, timeout: Duration) -> FlushStats {
        let (tx, rx) = mpsc::channel(16);
        let flusher = Flusher::new(
            rx,
            Backend::in_memory(h.memory.clone()),
            h.coordinator.clone(),
            timeout,
            true,
        );
        let counters = flusher.counters();
        let task = tokio::spawn(flusher.run());

        for mutation in mutations {
            tx.send(mutation).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();
        counters.snapshot()
    }

    #[tokio::test]
    async fn test_flush_applies_and_reclaims() {
        let h = harness();
        let m = logged_put(&h.coordinator, 1, "Alice");

        let stats = run_flusher(&h, vec![m], Duration::from_secs(5)).await;

        assert_eq!(stats.applied, 1);
        assert!(stats.reclaimed_bytes > 0);
        assert_eq!(h.coordinator.log_len().unwrap(), 0);
        assert_eq!(
            h.memory.row("users", &columns([("id", 1)])).unwrap().get("name"),
            Some(&Value::from("Alice"))
        );
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_log() {
        let h = harness();
        h.memory.set_failing(true);
        let m = logged_put(&h.coordinator, 1, "Alice");
        let len = h.coordinator.log_len().unwrap();

        let stats = run_flusher(&h, vec![m], Duration::from_secs(5)).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.applied, 0);
        assert_eq!(h.coordinator.log_len().unwrap(), len);
        assert_eq!(h.coordinator.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_table_is_a_flush_failure() {
        let h = harness();
        let pk = columns([("id", 1)]);
        let record = LogRecord::put_row("ghosts", &pk, &columns([("n", 1)]));
        let lsn = h
            .coordinator
            .append(&record, EntryKey::new("ghosts", &pk))
            .unwrap();
        let m = Mutation {
            table: "ghosts".into(),
            primary_key: pk,
            columns: columns([("n", 1)]),
            version: 1,
            is_delete: false,
            lsn,
        };

        let stats = run_flusher(&h, vec![m], Duration::from_secs(5)).await;

        assert_eq!(stats.failed, 1);
        assert!(h.coordinator.log_len().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_timeout_is_a_flush_failure() {
        let h = harness();
        h.memory.set_latency(Duration::from_millis(200));
        let m = logged_put(&h.coordinator, 1, "Alice");

        let stats = run_flusher(&h, vec![m], Duration::from_millis(20)).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(h.memory.applied(), 0);
        assert_eq!(h.coordinator.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_blocks_reclaim_of_later_records() {
        let h = harness();
        let first = logged_put(&h.coordinator, 1, "a");
        let second = logged_put(&h.coordinator, 2, "b");

        // Only the second flush succeeds; the first record stays at the head.
        let mut broken = first.clone();
        broken.table = "missing".into();
        let stats = run_flusher(&h, vec![broken, second], Duration::from_secs(5)).await;

        assert_eq!(stats.applied, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(h.coordinator.pending_count().unwrap(), 1);
        assert_eq!(h.coordinator.watermark().unwrap(), 0);
        assert!(h.coordinator.log_len().unwrap() > 0);
    }
}
