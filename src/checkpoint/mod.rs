//! Checkpoint subsystem
//!
//! Checkpoint is the ONLY mechanism that shrinks the log.
//!
//! # Rules
//!
//! - Only a prefix is ever removed
//! - The prefix ends at the watermark: the offset of the oldest record whose
//!   mutation has not been confirmed applied to the backing store
//! - Outstanding records keep their bytes, whatever their position
//! - Calling checkpoint twice without intervening writes changes nothing
//!
//! # Crash Safety
//!
//! - Full reclamation is a truncate + fsync
//! - Partial reclamation writes the suffix to a sibling file, fsyncs it,
//!   renames it over the log and fsyncs the directory
//! - A crash at any step leaves a log that replays cleanly

mod coordinator;
mod errors;

pub use coordinator::{CheckpointCoordinator, CheckpointOutcome};
pub use errors::{CheckpointError, CheckpointResult};
