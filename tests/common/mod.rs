//! Shared test harness
//!
//! Each harness owns a temp directory for the log and an in-memory backing
//! store with two tables registered:
//! - `users` keyed by `id`
//! - `orders` keyed by `(tenant, id)`

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cachedb::{Backend, CacheConfig, Engine, MemoryBackend};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub struct Harness {
    pub dir: TempDir,
    pub backend: Arc<MemoryBackend>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();

        let backend = Arc::new(MemoryBackend::new());
        backend.register_table("users", ["id"]);
        backend.register_table("orders", ["tenant", "id"]);

        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            backend,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.dir.path().join("logs").join("wal.log")
    }

    /// Entries never expire during a test unless the config says otherwise.
    pub fn config(&self) -> CacheConfig {
        CacheConfig::new(self.wal_path())
            .with_ttl(Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(10))
    }

    /// Short TTL and fast polling, so entries flush within a test.
    pub fn flushing_config(&self) -> CacheConfig {
        self.config().with_ttl(Duration::from_millis(50))
    }

    pub fn open(&self, config: CacheConfig) -> Engine {
        Engine::open(config, Backend::in_memory(self.backend.clone()))
            .expect("Failed to open engine")
    }

    pub fn wal_bytes(&self) -> Vec<u8> {
        std::fs::read(self.wal_path()).unwrap_or_default()
    }

    pub fn wal_len(&self) -> u64 {
        std::fs::metadata(self.wal_path())
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Simulate a crash: background loops are aborted, nothing is drained,
/// the log is left as it is on disk.
pub fn crash(engine: Engine) {
    drop(engine);
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

