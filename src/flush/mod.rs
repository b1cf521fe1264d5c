//! Asynchronous flush pipeline
//!
//! The queue is a bounded `tokio::sync::mpsc` channel. Its only producer is
//! the evictor, which reserves a slot before removing an entry; when the
//! queue is full the entry simply stays resident until a later sweep.
//! Nothing handed to the queue is ever dropped.

mod flusher;
mod mutation;

pub use flusher::{FlushCounters, FlushStats, Flusher};
pub use mutation::Mutation;

use tokio::sync::mpsc;

/// Create the bounded flush queue.
pub fn queue(capacity: usize) -> (mpsc::Sender<Mutation>, mpsc::Receiver<Mutation>) {
    mpsc::channel(capacity)
}
