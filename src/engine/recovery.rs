//! Log replay into the entry store
//!
//! - Starts at byte 0 and reads sequentially
//! - Put records upsert, Delete records tombstone
//! - Every replayed record is registered with the coordinator as pending,
//!   so nothing read here can be reclaimed before it is flushed
//! - A corrupted or torn tail ends replay and is cut off the file
//!
//! Replay is idempotent: the same log replayed twice produces the same
//! visible state.

use tracing::{info, warn};

use super::errors::CacheResult;
use crate::checkpoint::CheckpointCoordinator;
use crate::observability::Event;
use crate::store::{EntryKey, EntryStore};
use crate::wal::{self, LogPosition, TailDefect};

/// Statistics from one replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records applied to the store
    pub records_replayed: u64,
    pub puts: u64,
    pub deletes: u64,
    /// Well-framed records whose key or value did not decode
    pub records_skipped: u64,
    /// Offset just past the last valid record
    pub valid_len: u64,
    /// Bytes cut off after `valid_len`
    pub discarded_bytes: u64,
    /// Why replay stopped early, if it did
    pub defect: Option<TailDefect>,
}

pub(crate) fn recover(
    coordinator: &CheckpointCoordinator,
    store: &EntryStore,
) -> CacheResult<RecoveryReport> {
    info!(event = %Event::RecoveryStart, path = %coordinator.path().display(), "Replaying log");

    let mut reader = wal::replay(coordinator.path())?;
    let mut report = RecoveryReport::default();

    for replayed in reader.by_ref() {
        let op = match replayed.record.decode_row() {
            Ok(op) => op,
            Err(e) => {
                report.records_skipped += 1;
                warn!(
                    event = %Event::RecoveryRecordSkipped,
                    offset = replayed.offset,
                    error = %e,
                    "Skipping undecodable log record"
                );
                continue;
            }
        };

        let position = LogPosition {
            offset: replayed.offset,
            len: replayed.len,
        };
        let lsn = coordinator
            .track_replayed(position, EntryKey::new(&op.table, &op.primary_key))?;

        match op.columns {
            Some(columns) => {
                store.upsert(&op.table, &op.primary_key, columns, lsn);
                report.puts += 1;
            }
            None => {
                store.tombstone(&op.table, &op.primary_key, lsn);
                report.deletes += 1;
            }
        }
        report.records_replayed += 1;
    }

    report.valid_len = reader.valid_len();
    report.defect = reader.defect().cloned();
    let file_size = reader.file_size();
    drop(reader);

    if let Some(defect) = &report.defect {
        report.discarded_bytes = file_size.saturating_sub(report.valid_len);
        warn!(
            event = %Event::WalCorruption,
            valid_len = report.valid_len,
            discarded = report.discarded_bytes,
            defect = %defect,
            "Discarding invalid log tail"
        );
        coordinator.discard_tail(report.valid_len)?;
    }

    info!(
        event = %Event::RecoveryComplete,
        records = report.records_replayed,
        puts = report.puts,
        deletes = report.deletes,
        skipped = report.records_skipped,
        resident = store.len(),
        "Recovery complete"
    );

    Ok(report)
}
