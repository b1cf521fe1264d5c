//! Observable lifecycle events
//!
//! Every log line emitted by the cache carries one of these as its `event`
//! field, so operators can filter on a stable name regardless of message
//! wording.

use std::fmt;

/// Observable events in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Engine open begins
    OpenStart,
    /// Engine is serving requests
    Serving,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,

    // WAL
    /// WAL record appended
    WalAppend,
    /// WAL truncated or prefix reclaimed
    WalTruncate,
    /// Corrupted or torn WAL tail found during replay
    WalCorruption,
    /// WAL append/fsync failed, write rejected
    WalWriteFailed,

    // Recovery
    /// Replay begins
    RecoveryStart,
    /// Replay finished
    RecoveryComplete,
    /// A replayed record could not be decoded and was skipped
    RecoveryRecordSkipped,

    // Eviction
    /// Expired entry removed from memory
    Evicted,
    /// Flush queue full, eviction deferred
    EvictionDeferred,

    // Flush
    /// Mutation applied to the backing store
    FlushApplied,
    /// Backing store rejected or timed out a mutation
    FlushFailed,

    // Checkpoint
    /// Log space reclaimed
    CheckpointComplete,
    /// Nothing could be reclaimed
    CheckpointSkipped,
    /// Reclamation failed
    CheckpointFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::OpenStart => "CACHE_OPEN_BEGIN",
            Event::Serving => "CACHE_SERVING",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",

            Event::WalAppend => "WAL_APPEND",
            Event::WalTruncate => "WAL_TRUNCATED",
            Event::WalCorruption => "WAL_CORRUPTION",
            Event::WalWriteFailed => "WAL_WRITE_FAILED",

            Event::RecoveryStart => "RECOVERY_BEGIN",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",
            Event::RecoveryRecordSkipped => "RECOVERY_RECORD_SKIPPED",

            Event::Evicted => "ENTRY_EVICTED",
            Event::EvictionDeferred => "EVICTION_DEFERRED",

            Event::FlushApplied => "FLUSH_APPLIED",
            Event::FlushFailed => "FLUSH_FAILED",

            Event::CheckpointComplete => "CHECKPOINT_COMPLETE",
            Event::CheckpointSkipped => "CHECKPOINT_SKIPPED",
            Event::CheckpointFailed => "CHECKPOINT_FAILED",
        }
    }

    /// Returns true if this event means a caller-visible write failed
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::WalWriteFailed | Event::CheckpointFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
