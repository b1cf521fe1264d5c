//! In-process backing store
//!
//! Implements both `SchemaRegistry` and `BackingWriter` over concurrent maps.
//! Rows are keyed by the canonical encoding of their primary-key columns.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::errors::{BackingError, BackingResult};
use super::statement::{Statement, StatementKind, TableSchema};
use super::{BackingWriter, SchemaRegistry};
use crate::row::{self, ColumnMap};

#[derive(Default)]
pub struct MemoryBackend {
    schemas: DashMap<String, TableSchema>,
    rows: DashMap<String, BTreeMap<Vec<u8>, ColumnMap>>,
    applied: AtomicUsize,
    fail_writes: AtomicBool,
    /// Artificial latency per apply, in milliseconds
    latency_ms: AtomicU64,
    history: Mutex<Vec<Statement>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a table's key layout.
    pub fn register_table<I, S>(&self, table: &str, primary_key_columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemas.insert(
            table.to_string(),
            TableSchema::new(table, primary_key_columns),
        );
    }

    /// Full stored row for `primary_key` (named by schema key columns).
    pub fn row(&self, table: &str, primary_key: &ColumnMap) -> Option<ColumnMap> {
        self.rows
            .get(table)
            .and_then(|rows| rows.get(&row::encode_map(primary_key)).cloned())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows.get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    /// Number of statements applied successfully.
    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// Make every subsequent `apply` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successfully applied statements, oldest first.
    pub fn history(&self) -> Vec<Statement> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SchemaRegistry for MemoryBackend {
    async fn schema_of(&self, table: &str) -> BackingResult<TableSchema> {
        self.schemas
            .get(table)
            .map(|schema| schema.clone())
            .ok_or_else(|| BackingError::SchemaNotFound(table.to_string()))
    }
}

#[async_trait]
impl BackingWriter for MemoryBackend {
    async fn apply(&self, statement: &Statement) -> BackingResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackingError::execution(format!(
                "backend unavailable for table '{}'",
                statement.table
            )));
        }

        let key: ColumnMap = statement.key.iter().cloned().collect();
        let encoded = row::encode_map(&key);
        let mut rows = self.rows.entry(statement.table.clone()).or_default();

        match statement.kind {
            StatementKind::Upsert => {
                let mut full = key;
                full.extend(statement.values.iter().cloned());
                rows.insert(encoded, full);
            }
            StatementKind::Delete => {
                rows.remove(&encoded);
            }
        }
        drop(rows);

        self.applied.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut history) = self.history.lock() {
            history.push(statement.clone());
        }
        Ok(())
    }
}
