//! Log scanning.
//!
//! Scans read records straight off the log files, using the wrapper
//! around each record body to move forward (leading length) or backward
//! (trailing length) and the file headers to cross file boundaries.

mod backward;
mod forward;

pub use backward::BackwardScan;
pub use forward::{ForwardScan, ScanLimit};

use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::ops::LogCipher;
use crate::record::{LogRecord, LogRecordBody, LOG_RECORD_OVERHEAD, RECORD_PREFIX_SIZE};
use std::sync::Arc;
use tidelog_storage::StorageBackend;

/// A record returned by a scan, with the address it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    /// Address of the record.
    pub instant: LogInstant,
    /// The decoded record.
    pub record: LogRecord,
}

/// Result of parsing the wrapper at a position.
pub(crate) enum Wrapper {
    /// A structurally plausible record of `body_len` body bytes.
    Record {
        /// Length of the record body.
        body_len: usize,
        /// Instant stamped into the wrapper.
        instant: LogInstant,
    },
    /// The zero end-of-file marker.
    EndMarker,
    /// The bytes at this position do not form a record.
    Torn,
}

/// Parses the record wrapper at `pos`, reading no further than
/// `readable_end`.
pub(crate) fn read_wrapper(
    backend: &dyn StorageBackend,
    file_number: u64,
    pos: u64,
    readable_end: u64,
) -> LogResult<Wrapper> {
    if pos + 4 > readable_end {
        return Ok(Wrapper::Torn);
    }
    let len_bytes = backend.read_at(pos, 4)?;
    let body_len = u32::from_le_bytes(
        len_bytes
            .as_slice()
            .try_into()
            .map_err(|_| LogError::corruption("short wrapper read"))?,
    ) as u64;

    if body_len == 0 {
        return Ok(Wrapper::EndMarker);
    }
    if body_len < RECORD_PREFIX_SIZE as u64 || pos + LOG_RECORD_OVERHEAD + body_len > readable_end {
        return Ok(Wrapper::Torn);
    }

    let instant_bytes = backend.read_at(pos + 4, 8)?;
    let instant = LogInstant::from_u64(u64::from_le_bytes(
        instant_bytes
            .as_slice()
            .try_into()
            .map_err(|_| LogError::corruption("short wrapper read"))?,
    ));
    if instant != LogInstant::make(file_number, pos) {
        return Ok(Wrapper::Torn);
    }

    let trailing = backend.read_at(pos + 12 + body_len, 4)?;
    let trailing_len = u32::from_le_bytes(
        trailing
            .as_slice()
            .try_into()
            .map_err(|_| LogError::corruption("short wrapper read"))?,
    ) as u64;
    if trailing_len != body_len {
        return Ok(Wrapper::Torn);
    }

    Ok(Wrapper::Record {
        body_len: body_len as usize,
        instant,
    })
}

/// Decrypts a record's payload in place if a cipher is configured.
pub(crate) fn decrypt_record(
    cipher: Option<&Arc<dyn LogCipher>>,
    mut record: LogRecord,
) -> LogResult<LogRecord> {
    if let Some(cipher) = cipher {
        match &mut record.body {
            LogRecordBody::Operation { payload } | LogRecordBody::Compensation { payload, .. } => {
                if !payload.is_empty() {
                    *payload = cipher.decrypt(payload)?;
                }
            }
            _ => {}
        }
    }
    Ok(record)
}
