//! Cache entries and their identity

use std::fmt;
use std::time::Instant;

use crate::row::{self, ColumnMap};
use crate::wal::Lsn;

/// Identity of a cached row: table plus canonical primary-key bytes.
///
/// The canonical encoding is order-independent and collision-free for
/// distinct mappings, so equal keys always address the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    table: String,
    key: Vec<u8>,
}

impl EntryKey {
    pub fn new(table: &str, primary_key: &ColumnMap) -> Self {
        Self {
            table: table.to_string(),
            key: row::encode_map(primary_key),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Canonical primary-key bytes
    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match row::decode_map(&self.key) {
            Ok(pk) => write!(f, "{}{}", self.table, row::display_map(&pk)),
            Err(_) => write!(f, "{}<{} bytes>", self.table, self.key.len()),
        }
    }
}

/// A versioned, TTL-bound cached row.
///
/// `columns == None` is a tombstone: the row is deleted but kept resident
/// until the delete has been handed to the flusher.
///
/// `version` only grows while the entry stays resident. A key that is
/// evicted and written again starts over at 1, so versions never order
/// writes across an eviction; use `lsn` for that.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub(crate) primary_key: ColumnMap,
    pub(crate) columns: Option<ColumnMap>,
    pub(crate) version: u64,
    pub(crate) dirty: bool,
    pub(crate) expires_at: Instant,
    /// Sequence number of the log record behind the latest mutation
    pub(crate) lsn: Lsn,
}

impl Entry {
    pub(crate) fn new(
        primary_key: ColumnMap,
        columns: Option<ColumnMap>,
        expires_at: Instant,
        lsn: Lsn,
    ) -> Self {
        Self {
            primary_key,
            columns,
            version: 1,
            dirty: true,
            expires_at,
            lsn,
        }
    }

    pub fn primary_key(&self) -> &ColumnMap {
        &self.primary_key
    }

    pub fn columns(&self) -> Option<&ColumnMap> {
        self.columns.as_ref()
    }

    /// Mutations since this entry became resident.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_tombstone(&self) -> bool {
        self.columns.is_none()
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// Replace the row state, bumping the version.
    pub(crate) fn apply(&mut self, columns: Option<ColumnMap>, lsn: Lsn) {
        self.columns = columns;
        self.version += 1;
        self.dirty = true;
        self.lsn = lsn;
    }
}
