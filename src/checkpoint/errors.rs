//! Checkpoint coordination errors

use thiserror::Error;

use crate::wal::WalError;

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The underlying log operation failed
    #[error(transparent)]
    Wal(#[from] WalError),

    /// A thread panicked while holding the coordinator lock
    #[error("checkpoint coordinator lock poisoned")]
    LockPoisoned,
}

impl CheckpointError {
    /// Whether the log can no longer be trusted by this process
    pub fn is_fatal(&self) -> bool {
        match self {
            CheckpointError::Wal(e) => e.is_fatal(),
            CheckpointError::LockPoisoned => true,
        }
    }
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;
