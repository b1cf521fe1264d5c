//! Write-Ahead Log (WAL) subsystem
//!
//! The log is the single source of truth for recovery. A write is only
//! made visible in memory after its record is fully persisted here.
//!
//! # Invariants Enforced
//!
//! - fsync before a write is acknowledged
//! - Records are replayed strictly in append order
//! - A torn or corrupted tail ends replay without failing recovery
//! - Log space is only ever reclaimed as a prefix

mod errors;
mod reader;
mod record;
mod writer;

pub use errors::{Severity, WalError, WalErrorCode, WalResult};
pub use reader::{LogReader, ReplayedRecord, TailDefect};
pub use record::{LogRecord, RecordType, RowOp, MAGIC, MIN_RECORD_SIZE};
pub use writer::{LogPosition, LogWriter};

use std::path::Path;

/// Log sequence number: process-local, strictly increasing per append.
///
/// Not persisted. Replay assigns fresh numbers in file order.
pub type Lsn = u64;

/// Open the log at `path` for sequential replay.
pub fn replay(path: &Path) -> WalResult<LogReader> {
    LogReader::open(path)
}
