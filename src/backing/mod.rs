//! Backing store collaborators
//!
//! The cache never talks to a database directly. Flushing goes through
//! three seams:
//!
//! - `SchemaRegistry` resolves a table's primary-key columns
//! - `StatementBuilder` turns a `Mutation` into a backend statement
//! - `BackingWriter` executes that statement
//!
//! Implementations must be thread-safe. `BackingWriter::apply` must be
//! idempotent: upserts overwrite, deletes of absent rows succeed.

mod errors;
mod memory;
mod statement;

pub use errors::{BackingError, BackingResult};
pub use memory::MemoryBackend;
pub use statement::{
    bind_primary_key, MySqlStatementBuilder, Statement, StatementKind, TableSchema,
};

use std::sync::Arc;

use async_trait::async_trait;

use crate::flush::Mutation;

/// Source of table key layouts.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Fails with `SchemaNotFound` if the table is unknown.
    async fn schema_of(&self, table: &str) -> BackingResult<TableSchema>;
}

/// Executes statements against persistent storage.
#[async_trait]
pub trait BackingWriter: Send + Sync {
    async fn apply(&self, statement: &Statement) -> BackingResult<()>;
}

/// Builds backend statements for mutations.
pub trait StatementBuilder: Send + Sync {
    fn build(&self, mutation: &Mutation, schema: &TableSchema) -> BackingResult<Statement>;
}

/// The collaborators handed to the engine.
#[derive(Clone)]
pub struct Backend {
    pub schemas: Arc<dyn SchemaRegistry>,
    pub builder: Arc<dyn StatementBuilder>,
    pub writer: Arc<dyn BackingWriter>,
}

impl Backend {
    pub fn new(
        schemas: Arc<dyn SchemaRegistry>,
        builder: Arc<dyn StatementBuilder>,
        writer: Arc<dyn BackingWriter>,
    ) -> Self {
        Self {
            schemas,
            builder,
            writer,
        }
    }

    /// A backend served entirely by one `MemoryBackend`, with MySQL statements.
    pub fn in_memory(store: Arc<MemoryBackend>) -> Self {
        Self {
            schemas: store.clone(),
            builder: Arc::new(MySqlStatementBuilder),
            writer: store,
        }
    }
}
