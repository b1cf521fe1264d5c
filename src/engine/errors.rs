//! Engine-facing errors
//!
//! Foreground calls fail only when durability cannot be honored or the
//! input is malformed. Backing store trouble never surfaces here.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::wal::WalError;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The log could not be written, synced or truncated
    #[error("durability failure: {0}")]
    Durability(#[from] WalError),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine is shutting down or has shut down
    #[error("engine is closed")]
    Closed,

    /// `Engine::open` was called outside a tokio runtime
    #[error("no tokio runtime available to host background tasks")]
    NoRuntime,

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl CacheError {
    pub fn is_durability(&self) -> bool {
        matches!(self, CacheError::Durability(_))
    }
}

impl From<CheckpointError> for CacheError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Wal(e) => CacheError::Durability(e),
            CheckpointError::LockPoisoned => CacheError::LockPoisoned("log coordinator"),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
