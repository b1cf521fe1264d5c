//! Expiry-driven eviction
//!
//! A single background loop wakes every poll interval and removes entries
//! whose TTL has passed. Dirty entries are handed to the flush queue as part
//! of their removal:
//!
//! 1. Reserve a queue slot without waiting
//! 2. Remove the entry, re-checking expiry under its shard lock
//! 3. Send the entry's mutation through the reserved slot
//!
//! When no slot is free the entry stays resident and the sweep ends; the
//! next cycle retries. The evictor never blocks on the flusher and never
//! drops a mutation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::flush::Mutation;
use crate::observability::Event;
use crate::store::EntryStore;

/// What one sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    /// Entries removed from the store
    pub evicted: usize,
    /// Mutations handed to the flush queue
    pub enqueued: usize,
    /// Whether the sweep stopped early on a full (or closed) queue
    pub deferred: bool,
}

pub struct Evictor {
    store: Arc<EntryStore>,
    queue: mpsc::Sender<Mutation>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Evictor {
    pub fn new(
        store: Arc<EntryStore>,
        queue: mpsc::Sender<Mutation>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            queue,
            interval,
            shutdown,
        }
    }

    pub fn spawn(self, handle: &Handle) -> JoinHandle<()> {
        handle.spawn(self.run())
    }

    /// Sweep every interval until shutdown is signalled.
    ///
    /// Returning drops the queue sender, which lets the flusher drain and
    /// finish.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(resident = self.store.len(), "Evictor stopped");
    }

    /// Remove every entry expired at `now`, handing dirty ones to the queue.
    pub fn sweep(&self, now: Instant) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for key in self.store.expired_keys(now) {
            let permit = match self.queue.try_reserve() {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(
                        event = %Event::EvictionDeferred,
                        key = %key,
                        reason = %e,
                        "Flush queue unavailable; eviction deferred"
                    );
                    outcome.deferred = true;
                    break;
                }
            };

            // Refreshed since the scan: leave it, the permit is released.
            let Some(entry) = self.store.remove_expired(&key, now) else {
                continue;
            };

            outcome.evicted += 1;
            if entry.is_dirty() {
                permit.send(Mutation::from_entry(&key, &entry));
                outcome.enqueued += 1;
            }

            debug!(
                event = %Event::Evicted,
                key = %key,
                version = entry.version(),
                dirty = entry.is_dirty(),
                tombstone = entry.is_tombstone(),
                "Entry evicted"
            );
        }

        outcome
    }
}
