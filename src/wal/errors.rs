//! WAL error types
//!
//! Error codes:
//! - CACHE_WAL_OPEN_FAILED (ERROR severity)
//! - CACHE_WAL_APPEND_FAILED (ERROR severity)
//! - CACHE_WAL_FSYNC_FAILED (FATAL severity)
//! - CACHE_WAL_TRUNCATE_FAILED (FATAL severity)
//!
//! Corruption found during replay is not an error: the reader stops at the
//! last valid record and reports the defect (see `reader::TailDefect`).

use std::fmt;
use std::io;

/// Severity levels for WAL errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, cache continues
    Error,
    /// Durability of the log can no longer be assumed
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// WAL-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalErrorCode {
    /// Log file or directory could not be opened/created
    CacheWalOpenFailed,
    /// Writing a record failed
    CacheWalAppendFailed,
    /// fsync of the log failed
    CacheWalFsyncFailed,
    /// Truncating or compacting the log failed
    CacheWalTruncateFailed,
}

impl WalErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            WalErrorCode::CacheWalOpenFailed => "CACHE_WAL_OPEN_FAILED",
            WalErrorCode::CacheWalAppendFailed => "CACHE_WAL_APPEND_FAILED",
            WalErrorCode::CacheWalFsyncFailed => "CACHE_WAL_FSYNC_FAILED",
            WalErrorCode::CacheWalTruncateFailed => "CACHE_WAL_TRUNCATE_FAILED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            WalErrorCode::CacheWalOpenFailed => Severity::Error,
            WalErrorCode::CacheWalAppendFailed => Severity::Error,
            WalErrorCode::CacheWalFsyncFailed => Severity::Fatal,
            WalErrorCode::CacheWalTruncateFailed => Severity::Fatal,
        }
    }
}

impl fmt::Display for WalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// WAL error type with full context
#[derive(Debug)]
pub struct WalError {
    /// Error code
    code: WalErrorCode,
    /// Human-readable message
    message: String,
    /// Optional details about the error context
    details: Option<String>,
    /// Underlying IO error
    source: io::Error,
}

impl WalError {
    /// Create a new open failed error
    pub fn open_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(WalErrorCode::CacheWalOpenFailed, message, source)
    }

    /// Create a new append failed error
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(WalErrorCode::CacheWalAppendFailed, message, source)
    }

    /// Create a new fsync failed error
    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(WalErrorCode::CacheWalFsyncFailed, message, source)
    }

    /// Create a new truncate failed error
    pub fn truncate_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(WalErrorCode::CacheWalTruncateFailed, message, source)
    }

    fn new(code: WalErrorCode, message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source,
        }
    }

    /// Attach the byte offset the failing operation targeted
    pub fn at_offset(mut self, offset: u64) -> Self {
        self.details = Some(format!("byte_offset: {}", offset));
        self
    }

    /// Returns the error code
    pub fn code(&self) -> WalErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether the log must be considered unusable
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        write!(f, ": {}", self.source)
    }
}

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Result type for WAL operations
pub type WalResult<T> = Result<T, WalError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_error() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "disk error")
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(WalErrorCode::CacheWalOpenFailed.code(), "CACHE_WAL_OPEN_FAILED");
        assert_eq!(WalErrorCode::CacheWalAppendFailed.code(), "CACHE_WAL_APPEND_FAILED");
        assert_eq!(WalErrorCode::CacheWalFsyncFailed.code(), "CACHE_WAL_FSYNC_FAILED");
        assert_eq!(
            WalErrorCode::CacheWalTruncateFailed.code(),
            "CACHE_WAL_TRUNCATE_FAILED"
        );
    }

    #[test]
    fn test_fsync_failed_is_fatal() {
        let err = WalError::fsync_failed("fsync failed", disk_error());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_append_failed_is_not_fatal() {
        let err = WalError::append_failed("write failed", disk_error());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_display_contains_context() {
        let err = WalError::append_failed("write failed", disk_error()).at_offset(128);
        let display = err.to_string();
        assert!(display.contains("CACHE_WAL_APPEND_FAILED"));
        assert!(display.contains("ERROR"));
        assert!(display.contains("byte_offset: 128"));
        assert!(display.contains("disk error"));
    }

    #[test]
    fn test_source_is_io_error() {
        use std::error::Error;
        let err = WalError::truncate_failed("truncate failed", disk_error());
        assert!(err.source().is_some());
    }
}
