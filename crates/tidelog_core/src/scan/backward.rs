//! Backward log scan.
//!
//! Walks the trailing length field behind each record to find the record
//! before it, and jumps to the previous file through the header's
//! previous-end pointer. Used by rollback and by the recovery undo and
//! reprepare passes, always over flushed bytes.

use super::{decrypt_record, read_wrapper, ScannedRecord, Wrapper};
use crate::chain::{FileChain, LOG_FILE_HEADER_SIZE};
use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::ops::LogCipher;
use crate::record::{LogRecord, RecordPrefix, LOG_RECORD_OVERHEAD, RECORD_PREFIX_SIZE};
use crate::types::{group, TransactionId};
use std::sync::Arc;
use tidelog_storage::StorageBackend;

/// A backward scan over the log.
///
/// Checksum records are skipped; their bytes were verified when the log
/// was last read forward.
pub struct BackwardScan<'a> {
    chain: &'a FileChain,
    cipher: Option<Arc<dyn LogCipher>>,
    backend: Box<dyn StorageBackend>,
    file_number: u64,
    /// Start position of the record most recently visited; the next step
    /// walks backward from here.
    pos: u64,
    /// When set, the next call returns the record at this position
    /// instead of walking backward.
    next_start: Option<u64>,
    filter_txid: Option<TransactionId>,
    instant: LogInstant,
    done: bool,
}

impl<'a> BackwardScan<'a> {
    /// Opens a scan whose first returned record is the one at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the starting log file cannot be opened.
    pub fn open_at(chain: &'a FileChain, start: LogInstant) -> LogResult<Self> {
        let file_number = start.file_number();
        let backend = chain.open_log_file(file_number)?;
        Ok(Self {
            chain,
            cipher: None,
            backend,
            file_number,
            pos: start.position(),
            next_start: Some(start.position()),
            filter_txid: None,
            instant: LogInstant::INVALID,
            done: false,
        })
    }

    /// Decrypts operation payloads with the given cipher.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Option<Arc<dyn LogCipher>>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Returns only records of the given transaction.
    #[must_use]
    pub fn with_txid_filter(mut self, txid: TransactionId) -> Self {
        self.filter_txid = Some(txid);
        self
    }

    /// Address of the most recently returned record.
    #[must_use]
    pub fn instant(&self) -> LogInstant {
        self.instant
    }

    /// Repositions the scan so the next record returned is the one
    /// logged before `instant`. Rollback uses this to jump over the span
    /// a compensation record has already undone.
    ///
    /// # Errors
    ///
    /// Returns an error if the target file cannot be opened.
    pub fn reset_position(&mut self, instant: LogInstant) -> LogResult<()> {
        if instant.file_number() != self.file_number {
            self.backend = self.chain.open_log_file(instant.file_number())?;
            self.file_number = instant.file_number();
        }
        self.pos = instant.position();
        self.next_start = None;
        self.done = false;
        Ok(())
    }

    /// Reads the next record, moving toward the start of the log.
    ///
    /// Returns `None` once the scan has walked past the first record of
    /// the oldest file on the device.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or when the bytes walked over do
    /// not form valid records.
    pub fn next(&mut self) -> LogResult<Option<ScannedRecord>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let record_start = match self.next_start.take() {
                Some(start) => start,
                None => match self.step_back()? {
                    Some(start) => start,
                    None => return Ok(None),
                },
            };

            let size = self.backend.size()?;
            let (body_len, instant) =
                match read_wrapper(self.backend.as_ref(), self.file_number, record_start, size)? {
                    Wrapper::Record { body_len, instant } => (body_len, instant),
                    Wrapper::EndMarker | Wrapper::Torn => {
                        return Err(LogError::corruption(format!(
                            "no record at ({},{}) walking backward",
                            self.file_number, record_start
                        )));
                    }
                };
            self.pos = record_start;

            let prefix_bytes = self
                .backend
                .read_at(record_start + 12, RECORD_PREFIX_SIZE)?;
            let prefix = RecordPrefix::decode(&prefix_bytes)?;
            if prefix.group & group::CHECKSUM != 0 {
                continue;
            }
            if let Some(txid) = self.filter_txid {
                if prefix.txid != txid {
                    continue;
                }
            }

            let body = self.backend.read_at(record_start + 12, body_len)?;
            let record = LogRecord::decode(&body)?;
            let record = decrypt_record(self.cipher.as_ref(), record)?;

            self.instant = instant;
            return Ok(Some(ScannedRecord { instant, record }));
        }
    }

    /// Finds the start of the record logged before the one at `self.pos`,
    /// jumping to the previous file when the current one is exhausted.
    fn step_back(&mut self) -> LogResult<Option<u64>> {
        let mut end = self.pos;
        if end <= LOG_FILE_HEADER_SIZE {
            let header = FileChain::read_header(self.backend.as_ref())?;
            if header.prev_end.is_invalid() {
                self.done = true;
                return Ok(None);
            }
            self.backend = self.chain.open_log_file(header.prev_end.file_number())?;
            self.file_number = header.prev_end.file_number();
            end = header.prev_end.position();
        }

        let trailer_at = end.checked_sub(4).ok_or_else(|| {
            LogError::corruption("backward scan walked past the start of a log file")
        })?;
        let trailing = self.backend.read_at(trailer_at, 4)?;
        let body_len = u32::from_le_bytes(
            trailing
                .as_slice()
                .try_into()
                .map_err(|_| LogError::corruption("short trailer read"))?,
        ) as u64;

        let record_start = end
            .checked_sub(LOG_RECORD_OVERHEAD + body_len)
            .filter(|start| *start >= LOG_FILE_HEADER_SIZE)
            .ok_or_else(|| {
                LogError::corruption(format!(
                    "trailer at ({},{}) points before the file header",
                    self.file_number, trailer_at
                ))
            })?;
        Ok(Some(record_start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::LogHarness as Harness;

    #[test]
    fn reads_records_in_reverse() {
        let mut h = Harness::new();
        let i1 = h.append(&Harness::op(1, group::FIRST, 1));
        let i2 = h.append(&Harness::op(1, 0, 2));
        let i3 = h.append(&Harness::op(1, group::LAST | group::COMMIT, 3));
        h.flush();

        let mut scan = BackwardScan::open_at(&h.chain, i3).unwrap();
        assert_eq!(scan.next().unwrap().unwrap().instant, i3);
        assert_eq!(scan.next().unwrap().unwrap().instant, i2);
        assert_eq!(scan.next().unwrap().unwrap().instant, i1);
        assert!(scan.next().unwrap().is_none());
        assert_eq!(scan.instant(), i1);
    }

    #[test]
    fn filters_by_transaction() {
        let mut h = Harness::new();
        let i1 = h.append(&Harness::op(7, group::FIRST, 1));
        h.append(&Harness::op(8, group::FIRST, 2));
        let i3 = h.append(&Harness::op(7, 0, 3));
        h.append(&Harness::op(8, group::LAST | group::ABORT, 4));
        h.flush();

        let last = h.append(&Harness::op(7, 0, 5));
        h.flush();

        let mut scan = BackwardScan::open_at(&h.chain, last)
            .unwrap()
            .with_txid_filter(TransactionId::new(7));
        assert_eq!(scan.next().unwrap().unwrap().instant, last);
        assert_eq!(scan.next().unwrap().unwrap().instant, i3);
        assert_eq!(scan.next().unwrap().unwrap().instant, i1);
        assert!(scan.next().unwrap().is_none());
    }

    #[test]
    fn crosses_file_boundary_backward() {
        let mut h = Harness::new();
        let i1 = h.append(&Harness::op(1, group::FIRST, 1));
        h.switch_file();
        let i2 = h.append(&Harness::op(1, 0, 2));
        h.flush();

        let mut scan = BackwardScan::open_at(&h.chain, i2).unwrap();
        assert_eq!(scan.next().unwrap().unwrap().instant, i2);
        let prev = scan.next().unwrap().unwrap();
        assert_eq!(prev.instant, i1);
        assert_eq!(prev.instant.file_number(), 1);
        assert!(scan.next().unwrap().is_none());
    }

    #[test]
    fn reset_position_skips_a_compensated_span() {
        let mut h = Harness::new();
        let i1 = h.append(&Harness::op(1, group::FIRST, 1));
        let i2 = h.append(&Harness::op(1, 0, 2));
        let clr = h.append(&LogRecord::compensation(TransactionId::new(1), i2, vec![9; 4]));
        h.flush();

        let mut scan = BackwardScan::open_at(&h.chain, clr).unwrap();
        let first = scan.next().unwrap().unwrap();
        assert_eq!(first.instant, clr);
        assert_eq!(first.record.undo_instant(), Some(i2));

        // jump over the record the compensation already rolled back
        scan.reset_position(i2).unwrap();
        assert_eq!(scan.next().unwrap().unwrap().instant, i1);
        assert!(scan.next().unwrap().is_none());
    }

    #[test]
    fn checksum_records_are_skipped() {
        let mut h = Harness::with_buffer(80, 2);
        // small buffers force a checksum record ahead of each append
        let i1 = h.append(&Harness::op(1, group::FIRST, 1));
        let i2 = h.append(&Harness::op(1, group::LAST | group::COMMIT, 2));
        h.flush();

        let mut scan = BackwardScan::open_at(&h.chain, i2).unwrap();
        assert_eq!(scan.next().unwrap().unwrap().instant, i2);
        assert_eq!(scan.next().unwrap().unwrap().instant, i1);
        assert!(scan.next().unwrap().is_none());
    }
}
