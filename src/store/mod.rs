//! In-memory entry store
//!
//! Concurrent mapping of `(table, primary key)` to versioned entries with a
//! per-entry TTL. Backed by a sharded `DashMap`: operations on keys in
//! different shards never contend, operations on the same key are
//! linearized by the shard lock.
//!
//! Reads apply lazy expiry: an entry whose TTL has passed is invisible to
//! `get` even while it is still resident waiting for the evictor.

mod entry;

pub use entry::{Entry, EntryKey};

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;

use crate::row::ColumnMap;
use crate::wal::Lsn;

/// Concurrent, TTL-aware, versioned row storage.
pub struct EntryStore {
    entries: DashMap<EntryKey, Entry>,
    ttl: Duration,
}

impl EntryStore {
    /// Create an empty store whose entries live for `ttl` after each write.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of resident entries, expired and tombstoned ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace a row.
    ///
    /// A new entry starts at version 1. An existing entry gets the new
    /// columns, a bumped version, `dirty = true` and a refreshed expiry.
    ///
    /// Returns the entry's version after the write.
    pub fn upsert(
        &self,
        table: &str,
        primary_key: &ColumnMap,
        columns: ColumnMap,
        lsn: Lsn,
    ) -> u64 {
        let expires_at = Instant::now() + self.ttl;

        match self.entries.entry(EntryKey::new(table, primary_key)) {
            Slot::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.apply(Some(columns), lsn);
                entry.expires_at = expires_at;
                entry.version
            }
            Slot::Vacant(slot) => {
                slot.insert(Entry::new(
                    primary_key.clone(),
                    Some(columns),
                    expires_at,
                    lsn,
                ));
                1
            }
        }
    }

    /// Read a row. `None` if unknown, deleted or expired.
    pub fn get(&self, table: &str, primary_key: &ColumnMap) -> Option<ColumnMap> {
        let now = Instant::now();
        let entry = self.entries.get(&EntryKey::new(table, primary_key))?;

        if entry.is_expired(now) {
            return None;
        }
        entry.columns.clone()
    }

    /// Whether an entry (live, expired or tombstoned) is resident.
    pub fn contains(&self, table: &str, primary_key: &ColumnMap) -> bool {
        self.entries.contains_key(&EntryKey::new(table, primary_key))
    }

    /// Mark a resident row deleted.
    ///
    /// The entry stays resident as a dirty tombstone so the delete can be
    /// flushed. Returns whether a visible row existed. Unknown keys are
    /// left untouched and return `false`.
    pub fn delete(&self, table: &str, primary_key: &ColumnMap, lsn: Lsn) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(&EntryKey::new(table, primary_key)) {
            Some(mut entry) => {
                let existed = entry.columns.is_some() && !entry.is_expired(now);
                entry.apply(None, lsn);
                existed
            }
            None => false,
        }
    }

    /// Like `delete`, but creates a tombstone when no entry is resident.
    ///
    /// Used when a delete is already in the log and must reach the backing
    /// store even though its entry is gone (evicted concurrently, or the
    /// earlier PUT was reclaimed before a restart).
    pub fn tombstone(&self, table: &str, primary_key: &ColumnMap, lsn: Lsn) -> bool {
        let now = Instant::now();

        match self.entries.entry(EntryKey::new(table, primary_key)) {
            Slot::Occupied(mut slot) => {
                let entry = slot.get_mut();
                let existed = entry.columns.is_some() && !entry.is_expired(now);
                entry.apply(None, lsn);
                existed
            }
            Slot::Vacant(slot) => {
                slot.insert(Entry::new(primary_key.clone(), None, now + self.ttl, lsn));
                false
            }
        }
    }

    /// Snapshot of the keys whose entries had expired at `now`.
    ///
    /// Collected first and removed afterwards with `remove_expired`, so the
    /// scan never holds a shard lock while another shard is mutated.
    pub fn expired_keys(&self, now: Instant) -> Vec<EntryKey> {
        self.entries
            .iter()
            .filter(|item| item.value().is_expired(now))
            .map(|item| item.key().clone())
            .collect()
    }

    /// Remove an entry if it is still expired at `now`.
    ///
    /// The expiry check and removal happen under the shard lock, so an entry
    /// refreshed by a concurrent write after the scan is left alone.
    pub fn remove_expired(&self, key: &EntryKey, now: Instant) -> Option<Entry> {
        self.entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .map(|(_, entry)| entry)
    }

    /// Clone of the resident entry for `key`.
    pub fn entry(&self, table: &str, primary_key: &ColumnMap) -> Option<Entry> {
        self.entries
            .get(&EntryKey::new(table, primary_key))
            .map(|entry| entry.clone())
    }
}
