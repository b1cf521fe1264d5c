//! WAL writer with fsync enforcement
//!
//! - Every append is followed by fsync before it returns
//! - No batching, no group commit
//! - Truncation only ever removes a prefix of the log
//!
//! The writer is not internally synchronized; callers serialize access
//! (see `checkpoint::CheckpointCoordinator`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use super::errors::{WalError, WalResult};
use super::record::LogRecord;
use crate::observability::Event;

/// Byte range occupied by an appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    /// Offset of the first byte of the record
    pub offset: u64,
    /// Encoded record length
    pub len: u64,
}

impl LogPosition {
    /// Offset immediately after the record
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Append-only writer over a single log file.
pub struct LogWriter {
    /// Path to the log file
    path: PathBuf,
    /// Underlying file handle, opened in append mode
    file: File,
    /// Current file length
    len: u64,
    /// Offset of bytes from a failed append that could not be cut off.
    /// Appends are refused while set, since they would land behind them.
    unclean_tail: Option<u64>,
}

impl LogWriter {
    /// Opens or creates the log file at `path`.
    ///
    /// Creates parent directories if needed. Existing content is kept.
    ///
    /// # Errors
    ///
    /// Returns `CACHE_WAL_OPEN_FAILED` if the file cannot be created or opened.
    pub fn open(path: &Path) -> WalResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    WalError::open_failed(
                        format!("Failed to create WAL directory: {}", dir.display()),
                        e,
                    )
                })?;
            }
        }

        let file = Self::open_append(path)?;
        let len = file
            .metadata()
            .map_err(|e| WalError::open_failed("Failed to read WAL metadata", e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            unclean_tail: None,
        })
    }

    fn open_append(path: &Path) -> WalResult<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                WalError::open_failed(format!("Failed to open WAL file: {}", path.display()), e)
            })
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current log length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if a failed append left bytes that could not be removed.
    pub fn has_unclean_tail(&self) -> bool {
        self.unclean_tail.is_some()
    }

    /// Appends a record and fsyncs before returning.
    ///
    /// # Errors
    ///
    /// - `CACHE_WAL_APPEND_FAILED` if the write fails. Any partially written
    ///   bytes are cut off again so the tail stays well-formed. If they cannot
    ///   be cut off, every later append fails the same way until the tail is
    ///   truncated.
    /// - `CACHE_WAL_FSYNC_FAILED` if fsync fails (FATAL)
    pub fn append(&mut self, record: &LogRecord) -> WalResult<LogPosition> {
        let offset = self.len;

        if let Some(at) = self.unclean_tail {
            return Err(WalError::append_failed(
                "WAL holds unacknowledged bytes from a failed append",
                io::Error::new(io::ErrorKind::Other, "unclean WAL tail"),
            )
            .at_offset(at));
        }

        let serialized = record.serialize();

        if let Err(e) = self.file.write_all(&serialized) {
            self.roll_back(offset);
            return Err(WalError::append_failed("Failed to write WAL record", e).at_offset(offset));
        }

        if let Err(e) = self.file.sync_data() {
            // The record was never acknowledged; keep it out of the tail.
            self.roll_back(offset);
            return Err(WalError::fsync_failed("fsync failed after WAL append", e).at_offset(offset));
        }

        let position = LogPosition {
            offset,
            len: serialized.len() as u64,
        };
        self.len = position.end();

        debug!(
            event = %Event::WalAppend,
            offset,
            len = position.len,
            kind = ?record.kind(),
            "WAL record appended"
        );

        Ok(position)
    }

    /// Cut the file back to `offset` after a failed append.
    ///
    /// On failure the tracked length is reloaded from the file and the writer
    /// refuses appends, so offsets handed out never disagree with the file.
    fn roll_back(&mut self, offset: u64) {
        let result = self.file.set_len(offset);
        let err = match result {
            Ok(()) => return,
            Err(e) => e,
        };

        match self.file.metadata() {
            Ok(meta) => self.len = meta.len().max(offset),
            Err(meta_err) => {
                error!(
                    event = %Event::WalWriteFailed,
                    error = %meta_err,
                    "Failed to read WAL length after failed rollback"
                );
            }
        }
        self.unclean_tail = Some(offset);

        error!(
            event = %Event::WalWriteFailed,
            offset,
            len = self.len,
            error = %err,
            "Failed to roll back partial WAL write; appends disabled"
        );
    }

    /// Explicitly fsync the log file.
    pub fn sync(&self) -> WalResult<()> {
        self.file
            .sync_all()
            .map_err(|e| WalError::fsync_failed("Explicit WAL fsync failed", e))
    }

    /// Truncate the log to zero length.
    ///
    /// The next append starts at offset 0.
    pub fn truncate(&mut self) -> WalResult<()> {
        self.truncate_to(0)
    }

    /// Cut the log back to `len` bytes (used to drop a corrupted tail).
    pub fn truncate_to(&mut self, len: u64) -> WalResult<()> {
        if len >= self.len {
            if self.unclean_tail.map_or(false, |at| at >= self.len) {
                self.unclean_tail = None;
            }
            return Ok(());
        }

        self.file.set_len(len).map_err(|e| {
            WalError::truncate_failed(
                format!("Failed to truncate WAL file: {}", self.path.display()),
                e,
            )
            .at_offset(len)
        })?;
        self.file
            .sync_all()
            .map_err(|e| WalError::fsync_failed("fsync failed after WAL truncation", e))?;

        debug!(event = %Event::WalTruncate, len, "WAL truncated");
        self.len = len;
        if self.unclean_tail.map_or(false, |at| len <= at) {
            self.unclean_tail = None;
        }
        Ok(())
    }

    /// Remove the first `upto` bytes of the log, keeping everything after.
    ///
    /// A full-length prefix degrades to `truncate()`. Otherwise the retained
    /// suffix is written to a sibling file, fsynced, renamed over the log and
    /// the directory is fsynced, so a crash leaves either the old or the new
    /// log intact.
    ///
    /// Returns the number of bytes removed.
    pub fn reclaim_prefix(&mut self, upto: u64) -> WalResult<u64> {
        if upto == 0 {
            return Ok(0);
        }
        if upto >= self.len {
            let removed = self.len;
            self.truncate()?;
            return Ok(removed);
        }

        let suffix = self.read_suffix(upto)?;
        let tmp_path = self.compaction_path();

        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| {
                WalError::truncate_failed(
                    format!("Failed to create WAL compaction file: {}", tmp_path.display()),
                    e,
                )
            })?;
        tmp.write_all(&suffix).map_err(|e| {
            WalError::truncate_failed("Failed to write WAL compaction file", e)
        })?;
        tmp.sync_all()
            .map_err(|e| WalError::fsync_failed("Failed to fsync WAL compaction file", e))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            WalError::truncate_failed(
                format!("Failed to replace WAL file: {}", self.path.display()),
                e,
            )
        })?;
        self.sync_dir()?;

        self.file = Self::open_append(&self.path)?;
        self.len = suffix.len() as u64;
        self.unclean_tail = self.unclean_tail.map(|at| at.saturating_sub(upto));

        debug!(
            event = %Event::WalTruncate,
            removed = upto,
            retained = self.len,
            "WAL prefix reclaimed"
        );

        Ok(upto)
    }

    fn read_suffix(&self, from: u64) -> WalResult<Vec<u8>> {
        let read_err = |e: io::Error| {
            WalError::truncate_failed("Failed to read retained WAL suffix", e).at_offset(from)
        };

        let mut reader = File::open(&self.path).map_err(read_err)?;
        reader.seek(SeekFrom::Start(from)).map_err(read_err)?;

        let mut suffix = Vec::with_capacity((self.len - from) as usize);
        reader
            .take(self.len - from)
            .read_to_end(&mut suffix)
            .map_err(read_err)?;

        if suffix.len() as u64 != self.len - from {
            return Err(read_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "WAL shorter than tracked length",
            )));
        }

        Ok(suffix)
    }

    fn compaction_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".compact");
        self.path.with_file_name(name)
    }

    fn sync_dir(&self) -> WalResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let handle = File::open(dir).map_err(|e| {
            WalError::truncate_failed(
                format!("Failed to open WAL directory for fsync: {}", dir.display()),
                e,
            )
        })?;
        handle.sync_all().map_err(|e| {
            WalError::fsync_failed(
                format!("Failed to fsync WAL directory: {}", dir.display()),
                e,
            )
        })
    }
}
