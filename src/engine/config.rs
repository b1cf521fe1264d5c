//! Cache engine configuration
//!
//! Every field has a serde default, so a partial JSON document (or `{}`)
//! is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CacheError, CacheResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Log file location (default: "logs/wal.log")
    #[serde(default = "default_wal_path")]
    pub wal_path: PathBuf,

    /// Eviction delay after the last write, in milliseconds (default: 2000)
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Evictor cadence in milliseconds (default: 100)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Bounded flush queue size (default: 1024)
    #[serde(default = "default_flush_queue_capacity")]
    pub flush_queue_capacity: usize,

    /// Per-attempt backing store timeout in milliseconds (default: 5000)
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Attempt log reclamation after every confirmed flush (default: true)
    #[serde(default = "default_checkpoint_on_flush")]
    pub checkpoint_on_flush: bool,
}

fn default_wal_path() -> PathBuf {
    PathBuf::from("logs/wal.log")
}

fn default_ttl_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_flush_queue_capacity() -> usize {
    1024
}

fn default_flush_timeout_ms() -> u64 {
    5000
}

fn default_checkpoint_on_flush() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            wal_path: default_wal_path(),
            ttl_ms: default_ttl_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            flush_queue_capacity: default_flush_queue_capacity(),
            flush_timeout_ms: default_flush_timeout_ms(),
            checkpoint_on_flush: default_checkpoint_on_flush(),
        }
    }
}

impl CacheConfig {
    /// Default configuration with the log at `wal_path`
    pub fn new(wal_path: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: wal_path.into(),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_flush_queue_capacity(mut self, capacity: usize) -> Self {
        self.flush_queue_capacity = capacity;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_checkpoint_on_flush(mut self, enabled: bool) -> Self {
        self.checkpoint_on_flush = enabled;
        self
    }

    pub fn from_json_str(json: &str) -> CacheResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CacheError::InvalidConfig(format!("malformed config: {}", e)))
    }

    pub fn from_json_file(path: &Path) -> CacheResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CacheError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> CacheResult<()> {
        if self.wal_path.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig("wal_path must not be empty".into()));
        }
        if self.ttl_ms == 0 {
            return Err(CacheError::InvalidConfig("ttl_ms must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if self.flush_queue_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "flush_queue_capacity must be positive".into(),
            ));
        }
        if self.flush_timeout_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "flush_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}
