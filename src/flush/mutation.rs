use crate::row::ColumnMap;
use crate::store::{Entry, EntryKey};
use crate::wal::Lsn;

/// Snapshot of an entry at the moment it is handed to the flusher.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub table: String,
    pub primary_key: ColumnMap,
    /// Row columns; empty for deletes
    pub columns: ColumnMap,
    pub version: u64,
    pub is_delete: bool,
    /// LSN of the latest log record reflected in this snapshot
    pub lsn: Lsn,
}

impl Mutation {
    pub fn from_entry(key: &EntryKey, entry: &Entry) -> Self {
        Self {
            table: key.table().to_string(),
            primary_key: entry.primary_key().clone(),
            columns: entry.columns().cloned().unwrap_or_default(),
            version: entry.version(),
            is_delete: entry.is_tombstone(),
            lsn: entry.lsn(),
        }
    }

    pub fn entry_key(&self) -> EntryKey {
        EntryKey::new(&self.table, &self.primary_key)
    }
}
