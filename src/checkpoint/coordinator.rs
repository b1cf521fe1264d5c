//! Watermark tracking and prefix reclamation
//!
//! The coordinator owns the log writer. Every record is registered as
//! pending under the same lock that appends it, so a checkpoint can never
//! observe a record on disk that it does not know about.
//!
//! A record stops being pending once the flush of its key has been
//! confirmed at an LSN at or above its own. The watermark is the offset of
//! the oldest pending record (or the log length when nothing is pending);
//! only the prefix before it is ever reclaimed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::errors::{CheckpointError, CheckpointResult};
use crate::observability::Event;
use crate::store::EntryKey;
use crate::wal::{LogPosition, LogRecord, LogWriter, Lsn};

/// Result of one `checkpoint()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointOutcome {
    /// Bytes removed from the front of the log
    pub reclaimed_bytes: u64,
    /// Log length after reclamation
    pub retained_bytes: u64,
    /// Records still awaiting flush confirmation
    pub pending_records: usize,
}

impl CheckpointOutcome {
    pub fn is_noop(&self) -> bool {
        self.reclaimed_bytes == 0
    }
}

#[derive(Debug, Clone)]
struct PendingRecord {
    offset: u64,
    len: u64,
    key: EntryKey,
}

struct Inner {
    writer: LogWriter,
    /// Pending records by LSN; LSN order equals file order
    pending: BTreeMap<Lsn, PendingRecord>,
    /// Pending LSNs per key, for confirmation
    by_key: HashMap<EntryKey, BTreeSet<Lsn>>,
    next_lsn: Lsn,
}

impl Inner {
    fn register(&mut self, position: LogPosition, key: EntryKey) -> Lsn {
        let lsn = self.next_lsn;
        self.next_lsn += 1;

        self.by_key.entry(key.clone()).or_default().insert(lsn);
        self.pending.insert(
            lsn,
            PendingRecord {
                offset: position.offset,
                len: position.len,
                key,
            },
        );
        lsn
    }

    fn watermark(&self) -> u64 {
        self.pending
            .values()
            .next()
            .map(|record| record.offset)
            .unwrap_or_else(|| self.writer.len())
    }
}

/// Shared handle over the log, used by both the engine and the flusher.
pub struct CheckpointCoordinator {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl CheckpointCoordinator {
    /// Open (or create) the log at `path`. Nothing is pending initially.
    pub fn open(path: &Path) -> CheckpointResult<Self> {
        let writer = LogWriter::open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                writer,
                pending: BTreeMap::new(),
                by_key: HashMap::new(),
                next_lsn: 1,
            }),
        })
    }

    fn lock(&self) -> CheckpointResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| CheckpointError::LockPoisoned)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append `record` and register it as pending for `key`.
    ///
    /// Returns the record's LSN. On error nothing is registered.
    pub fn append(&self, record: &LogRecord, key: EntryKey) -> CheckpointResult<Lsn> {
        let mut inner = self.lock()?;
        let position = inner.writer.append(record)?;
        Ok(inner.register(position, key))
    }

    /// Register a record found during replay at `position`.
    pub fn track_replayed(&self, position: LogPosition, key: EntryKey) -> CheckpointResult<Lsn> {
        let mut inner = self.lock()?;
        Ok(inner.register(position, key))
    }

    /// Drop everything after `valid_len` (a corrupted or torn tail).
    pub fn discard_tail(&self, valid_len: u64) -> CheckpointResult<()> {
        let mut inner = self.lock()?;
        inner.writer.truncate_to(valid_len)?;
        Ok(())
    }

    /// Mark every pending record of `key` with LSN ≤ `lsn` as flushed.
    ///
    /// Returns how many records were released.
    pub fn confirm(&self, key: &EntryKey, lsn: Lsn) -> CheckpointResult<usize> {
        let mut inner = self.lock()?;

        let released: Vec<Lsn> = match inner.by_key.get_mut(key) {
            Some(lsns) => {
                let newer = lsns.split_off(&(lsn + 1));
                let released = std::mem::replace(lsns, newer);
                if lsns.is_empty() {
                    inner.by_key.remove(key);
                }
                released.into_iter().collect()
            }
            None => Vec::new(),
        };

        for lsn in &released {
            inner.pending.remove(lsn);
        }

        debug!(key = %key, lsn, released = released.len(), "Flush confirmed");
        Ok(released.len())
    }

    /// Key of the oldest unflushed record, the one holding the watermark.
    pub fn oldest_pending(&self) -> CheckpointResult<Option<EntryKey>> {
        Ok(self.lock()?.pending.values().next().map(|head| head.key.clone()))
    }

    /// Offset below which every record has been applied to the backing store.
    pub fn watermark(&self) -> CheckpointResult<u64> {
        Ok(self.lock()?.watermark())
    }

    /// Reclaim the log prefix below the watermark.
    ///
    /// Idempotent: with no intervening writes or confirmations a second call
    /// reclaims nothing. Only whole records are ever removed, so the
    /// remaining log always replays cleanly.
    pub fn checkpoint(&self) -> CheckpointResult<CheckpointOutcome> {
        let mut inner = self.lock()?;
        let watermark = inner.watermark();

        if watermark == 0 {
            let outcome = CheckpointOutcome {
                reclaimed_bytes: 0,
                retained_bytes: inner.writer.len(),
                pending_records: inner.pending.len(),
            };
            let blocked_by = inner.pending.values().next().map(|head| head.key.to_string());
            debug!(
                event = %Event::CheckpointSkipped,
                retained = outcome.retained_bytes,
                pending = outcome.pending_records,
                blocked_by = blocked_by.as_deref().unwrap_or("-"),
                "Nothing to reclaim"
            );
            return Ok(outcome);
        }

        let reclaimed = inner.writer.reclaim_prefix(watermark)?;
        for record in inner.pending.values_mut() {
            record.offset -= reclaimed;
        }

        let outcome = CheckpointOutcome {
            reclaimed_bytes: reclaimed,
            retained_bytes: inner.writer.len(),
            pending_records: inner.pending.len(),
        };

        info!(
            event = %Event::CheckpointComplete,
            reclaimed = outcome.reclaimed_bytes,
            retained = outcome.retained_bytes,
            pending = outcome.pending_records,
            "Checkpoint reclaimed log prefix"
        );

        Ok(outcome)
    }

    /// fsync the log file.
    pub fn sync(&self) -> CheckpointResult<()> {
        self.lock()?.writer.sync()?;
        Ok(())
    }

    /// Current log length in bytes.
    pub fn log_len(&self) -> CheckpointResult<u64> {
        Ok(self.lock()?.writer.len())
    }

    /// Number of records not yet confirmed flushed.
    pub fn pending_count(&self) -> CheckpointResult<usize> {
        Ok(self.lock()?.pending.len())
    }

    /// Total bytes held by pending records.
    pub fn pending_bytes(&self) -> CheckpointResult<u64> {
        Ok(self.lock()?.pending.values().map(|r| r.len).sum())
    }
}
