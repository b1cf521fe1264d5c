//! Backing store errors
//!
//! None of these ever reach `set`/`get`/`delete` callers. The flusher logs
//! them and leaves the mutation in the log for a later retry.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackingError {
    #[error("schema not found for table '{0}'")]
    SchemaNotFound(String),

    #[error("no value for primary key column '{column}' of table '{table}'")]
    MissingKeyValue { table: String, column: String },

    #[error("statement execution failed: {0}")]
    Execution(String),

    #[error("backing store did not respond within {0:?}")]
    Timeout(Duration),
}

impl BackingError {
    pub fn execution(message: impl Into<String>) -> Self {
        BackingError::Execution(message.into())
    }
}

pub type BackingResult<T> = Result<T, BackingError>;
