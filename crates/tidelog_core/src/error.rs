//! Error types for the log engine.

use std::io;
use thiserror::Error;

/// Result type for log engine operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in log engine operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidelog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log device cannot accept more data.
    ///
    /// Raised when syncing the log file keeps failing after repeated
    /// retries, which on most platforms means the device is out of space.
    #[error("log device is full or cannot be synced")]
    LogFull,

    /// The store was opened read-only and a write was attempted.
    #[error("log is read-only")]
    ReadOnly,

    /// A zero-length log record was submitted.
    #[error("zero-length log record")]
    ZeroLengthRecord,

    /// A log record is too large to fit in a single log file.
    #[error("log record of {len} bytes exceeds maximum log file size {max}")]
    RecordExceedsMaxFileSize {
        /// Total on-disk length of the record.
        len: u64,
        /// Maximum log file size.
        max: u64,
    },

    /// The log file number space is exhausted.
    #[error("log file number exceeds maximum")]
    ExceedsMaxLogFileNumber,

    /// The store has been marked corrupt; all operations fail until reboot.
    #[error("store is corrupt: {cause}")]
    StoreCorrupt {
        /// Description of the original failure.
        cause: String,
    },

    /// A checksum over flushed log data did not verify.
    #[error("log checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum recorded in the log.
        expected: u32,
        /// Checksum computed over the data.
        actual: u32,
    },

    /// The log contains structurally invalid data.
    #[error("log corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the log directory lock.
    #[error("log directory is locked by another process")]
    Locked,

    /// The requested operation is not supported in the current state.
    #[error("unsupported operation: {message}")]
    Unsupported {
        /// Description of why the operation is unsupported.
        message: String,
    },
}

impl LogError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a store-corrupt error.
    pub fn store_corrupt(cause: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            cause: cause.into(),
        }
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}
