//! WAL reader for sequential replay
//!
//! Replay rules:
//! - Replay always starts from byte 0 and reads strictly in order
//! - A bad magic, an implausible length, a record running past the end of
//!   the file or an unreadable body ends replay at that offset
//! - Everything before the defect is valid; the defect itself is reported,
//!   never raised, because it is the expected footprint of a crash in the
//!   middle of an append

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use super::errors::{WalError, WalResult};
use super::record::{LogRecord, FRAME_PREFIX_SIZE, MAGIC, MIN_RECORD_SIZE};

/// Reason replay stopped before the physical end of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailDefect {
    /// The record does not start with the magic sentinel
    BadMagic(u32),
    /// TOTAL_LEN is non-positive or smaller than the minimum record size
    ImplausibleLength(i32),
    /// TOTAL_LEN runs past the end of the file (torn trailing write)
    Truncated { declared: u64, remaining: u64 },
    /// Framing was valid but the body did not parse
    MalformedBody(String),
    /// An I/O error interrupted the scan
    Io(String),
}

impl fmt::Display for TailDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailDefect::BadMagic(magic) => write!(f, "bad magic 0x{:08X}", magic),
            TailDefect::ImplausibleLength(len) => write!(f, "implausible record length {}", len),
            TailDefect::Truncated {
                declared,
                remaining,
            } => write!(
                f,
                "record length {} exceeds remaining {} bytes",
                declared, remaining
            ),
            TailDefect::MalformedBody(reason) => write!(f, "malformed record body: {}", reason),
            TailDefect::Io(reason) => write!(f, "I/O error: {}", reason),
        }
    }
}

/// A record together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedRecord {
    pub offset: u64,
    pub len: u64,
    pub record: LogRecord,
}

/// Lazy, sequential reader over the log file.
///
/// Iterating yields records until the clean end of file or the first
/// defect. Afterwards `valid_len()` is the offset just past the last good
/// record and `defect()` explains an early stop.
pub struct LogReader {
    /// Buffered file handle; `None` when the log does not exist
    reader: Option<BufReader<File>>,
    /// Current byte offset in the file
    offset: u64,
    /// File size at open time
    file_size: u64,
    /// Set once iteration has ended
    finished: bool,
    /// Why iteration ended early, if it did
    defect: Option<TailDefect>,
}

impl LogReader {
    /// Opens the log for replay. A missing file replays as empty.
    ///
    /// # Errors
    ///
    /// Returns `CACHE_WAL_OPEN_FAILED` if the file exists but cannot be opened.
    pub fn open(path: &Path) -> WalResult<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    reader: None,
                    offset: 0,
                    file_size: 0,
                    finished: true,
                    defect: None,
                });
            }
            Err(e) => {
                return Err(WalError::open_failed(
                    format!("Failed to open WAL for replay: {}", path.display()),
                    e,
                ))
            }
        };

        let file_size = file
            .metadata()
            .map_err(|e| WalError::open_failed("Failed to read WAL metadata", e))?
            .len();

        Ok(Self {
            reader: Some(BufReader::new(file)),
            offset: 0,
            file_size,
            finished: false,
            defect: None,
        })
    }

    /// Offset just past the last valid record read so far.
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// File size observed when the reader was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// The defect that ended replay early, if any.
    pub fn defect(&self) -> Option<&TailDefect> {
        self.defect.as_ref()
    }

    fn stop(&mut self, defect: Option<TailDefect>) -> Option<ReplayedRecord> {
        self.finished = true;
        self.defect = defect;
        None
    }

    fn read_next(&mut self) -> Option<ReplayedRecord> {
        if self.finished {
            return None;
        }
        if self.offset >= self.file_size {
            return self.stop(None);
        }

        let remaining = self.file_size - self.offset;
        if remaining < FRAME_PREFIX_SIZE as u64 {
            return self.stop(Some(TailDefect::Truncated {
                declared: FRAME_PREFIX_SIZE as u64,
                remaining,
            }));
        }

        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return self.stop(None),
        };

        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        if let Err(e) = reader.read_exact(&mut prefix) {
            return self.stop(Some(TailDefect::Io(e.to_string())));
        }

        let magic = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        if magic != MAGIC {
            return self.stop(Some(TailDefect::BadMagic(magic)));
        }

        let total_len = i32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        if total_len <= 0 || (total_len as usize) < MIN_RECORD_SIZE {
            return self.stop(Some(TailDefect::ImplausibleLength(total_len)));
        }

        let declared = total_len as u64;
        if declared > remaining {
            return self.stop(Some(TailDefect::Truncated {
                declared,
                remaining,
            }));
        }

        let mut buf = vec![0u8; declared as usize];
        buf[..FRAME_PREFIX_SIZE].copy_from_slice(&prefix);
        if let Err(e) = reader.read_exact(&mut buf[FRAME_PREFIX_SIZE..]) {
            return self.stop(Some(TailDefect::Io(e.to_string())));
        }

        match LogRecord::deserialize(&buf) {
            Ok(record) => {
                let replayed = ReplayedRecord {
                    offset: self.offset,
                    len: declared,
                    record,
                };
                self.offset += declared;
                Some(replayed)
            }
            Err(e) => self.stop(Some(TailDefect::MalformedBody(e.to_string()))),
        }
    }
}

impl Iterator for LogReader {
    type Item = ReplayedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next()
    }
}
