//! # tidelog core
//!
//! Write-ahead log engine for tidelog.
//!
//! The log is the store's single source of truth for durability: every
//! change is logged before it is applied, so after a crash the store can
//! be rebuilt by replaying the log forward (redo) and rolling unfinished
//! transactions back (undo). This crate owns the whole log lifecycle:
//!
//! - [`LogInstant`] addresses, the total order over log records
//! - The buffered, checksummed log writer and its file chain
//! - Forward and backward scans over logged records
//! - Checkpoints, log rotation, and log truncation
//! - Crash recovery with redo, undo, and reprepare passes
//!
//! The engine does not interpret operation payloads. Embedders supply a
//! [`DataStore`], a [`TransactionControl`] table (or use the bundled
//! [`TransactionTable`]), and an [`OperationDecoder`] that turns payload
//! bytes back into redo/undo-able operations during recovery.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidelog_core::{group, LogConfig, LogEngine, LogRecord, TransactionId};
//! # use tidelog_core::{DataStore, LogResult, LogInstant, OperationDecoder, LogOperation};
//! # struct Store;
//! # impl DataStore for Store {
//! #     fn checkpoint(&self) -> LogResult<()> { Ok(()) }
//! #     fn post_recovery(&self) -> LogResult<()> { Ok(()) }
//! #     fn remove_dropped_stubs(&self, _: LogInstant) -> LogResult<()> { Ok(()) }
//! #     fn mark_corrupt(&self, _: &str) {}
//! # }
//! # struct Decoder;
//! # impl OperationDecoder for Decoder {
//! #     fn decode(&self, _: &[u8]) -> LogResult<Box<dyn LogOperation>> { unimplemented!() }
//! # }
//! # fn main() -> LogResult<()> {
//! let txns = Arc::new(tidelog_core::TransactionTable::new());
//! let engine = LogEngine::boot_dir(
//!     std::path::Path::new("my_store"),
//!     LogConfig::default(),
//!     Arc::new(Store),
//!     txns,
//!     Arc::new(Decoder),
//!     None,
//! )?;
//!
//! let txid = TransactionId::new(1);
//! engine.append(&LogRecord::operation(txid, group::FIRST, b"change".to_vec()))?;
//! let commit = engine.append(&LogRecord::operation(
//!     txid,
//!     group::LAST | group::COMMIT,
//!     Vec::new(),
//! ))?;
//! engine.flush(commit)?; // the transaction is now durable
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chain;
mod checkpoint;
mod config;
mod control;
mod engine;
mod error;
mod instant;
mod ops;
mod record;
mod recovery;
mod scan;
#[cfg(test)]
pub(crate) mod testutil;
mod txn;
mod types;
mod writer;

pub use chain::{
    DirDevice, FileChain, LogDevice, LogFileHeader, MemDevice, LOCK_FILE, LOG_FILE_HEADER_SIZE,
    LOG_FILE_MAGIC, LOG_FILE_VERSION,
};
pub use checkpoint::{CheckpointPayload, TruncationPoint};
pub use config::{
    LogConfig, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE, DEFAULT_CHECKPOINT_INTERVAL,
    DEFAULT_LOG_SWITCH_INTERVAL, MAX_BUFFER_SIZE, MAX_INTERVAL, MIN_BUFFER_SIZE, MIN_INTERVAL,
};
pub use control::{
    ControlData, CONTROL_FILE, CONTROL_FILE_SIZE, CONTROL_MAGIC, CONTROL_MIRROR_FILE,
    CONTROL_VERSION, FLAG_BETA, FLAG_NO_SYNC,
};
pub use engine::LogEngine;
pub use error::{LogError, LogResult};
pub use instant::LogInstant;
pub use ops::{DataStore, LogCipher, LogOperation, OperationDecoder, TransactionControl};
pub use record::{
    LogRecord, LogRecordBody, CHECKSUM_RECORD_SIZE, CRC32_ALGORITHM, LOG_RECORD_OVERHEAD,
};
pub use scan::{BackwardScan, ForwardScan, ScanLimit, ScannedRecord};
pub use txn::{TransactionTable, TxnEntry, TxnSnapshot, TxnState};
pub use types::{compute_crc32, group, TransactionId};
pub use writer::LogWriter;

pub use tidelog_storage::DurabilityMode;
