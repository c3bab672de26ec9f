//! Forward log scan.

use super::{decrypt_record, read_wrapper, ScannedRecord, Wrapper};
use crate::chain::{FileChain, LOG_FILE_HEADER_SIZE};
use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::ops::LogCipher;
use crate::record::{LogRecord, LogRecordBody, RecordPrefix, LOG_RECORD_OVERHEAD, RECORD_PREFIX_SIZE};
use crate::types::{compute_crc32, TransactionId};
use std::sync::Arc;
use tidelog_storage::StorageBackend;

/// How far a forward scan is willing to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLimit {
    /// Read only bytes below the flushed high-water mark; anything
    /// structurally wrong below it is corruption.
    Flushed,
    /// Read to the end of the files on the device; structurally wrong
    /// bytes mark the fuzzy end of the log. Used by recovery.
    EndOfDevice,
}

/// A forward scan over the log.
///
/// Checksum records are consumed internally and never returned; with
/// verification enabled the bytes they vouch for are checked as the scan
/// passes over them.
pub struct ForwardScan<'a> {
    chain: &'a FileChain,
    cipher: Option<Arc<dyn LogCipher>>,
    backend: Box<dyn StorageBackend>,
    file_number: u64,
    pos: u64,
    limit: ScanLimit,
    verify_checksums: bool,
    filter_txid: Option<TransactionId>,
    filter_group: Option<u32>,
    instant: LogInstant,
    record_end: LogInstant,
    fuzzy_end: Option<LogInstant>,
    done: bool,
}

impl<'a> ForwardScan<'a> {
    /// Opens a scan positioned at `start`; the first record returned is
    /// the one at that address.
    ///
    /// # Errors
    ///
    /// Returns an error if the starting log file cannot be opened.
    pub fn open(chain: &'a FileChain, start: LogInstant, limit: ScanLimit) -> LogResult<Self> {
        let file_number = start.file_number();
        let backend = chain.open_log_file(file_number)?;
        Ok(Self {
            chain,
            cipher: None,
            backend,
            file_number,
            pos: start.position(),
            limit,
            verify_checksums: false,
            filter_txid: None,
            filter_group: None,
            instant: LogInstant::INVALID,
            record_end: start,
            fuzzy_end: None,
            done: false,
        })
    }

    /// Decrypts operation payloads with the given cipher.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Option<Arc<dyn LogCipher>>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Verifies checksum records against the bytes they cover.
    #[must_use]
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Returns only records of the given transaction.
    #[must_use]
    pub fn with_txid_filter(mut self, txid: TransactionId) -> Self {
        self.filter_txid = Some(txid);
        self
    }

    /// Returns only records whose group intersects the given mask.
    #[must_use]
    pub fn with_group_filter(mut self, mask: u32) -> Self {
        self.filter_group = Some(mask);
        self
    }

    /// Address of the most recently returned record.
    #[must_use]
    pub fn instant(&self) -> LogInstant {
        self.instant
    }

    /// Address just past the most recently returned record; after the
    /// scan is exhausted this is the end of the readable log.
    #[must_use]
    pub fn record_end(&self) -> LogInstant {
        self.record_end
    }

    /// Where unreadable bytes begin, if the scan hit a torn tail.
    #[must_use]
    pub fn fuzzy_end(&self) -> Option<LogInstant> {
        self.fuzzy_end
    }

    /// Repositions the scan; the next record returned is the one at
    /// `instant`.
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
        self.record_end = instant;
        self.done = false;
        Ok(())
    }

    /// Reads the next record.
    ///
    /// Returns `None` at the end of the log. Under
    /// [`ScanLimit::EndOfDevice`], structural damage ends the scan and is
    /// reported through [`ForwardScan::fuzzy_end`]; under
    /// [`ScanLimit::Flushed`] it is an error.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, or on corruption below the
    /// flushed mark.
    pub fn next(&mut self) -> LogResult<Option<ScannedRecord>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let readable = self.readable_end()?;
            if self.pos >= readable {
                if self.advance_file()? {
                    continue;
                }
                return Ok(None);
            }

            let record_start = self.pos;
            let (body_len, instant) = match read_wrapper(
                self.backend.as_ref(),
                self.file_number,
                record_start,
                readable,
            )? {
                Wrapper::Record { body_len, instant } => (body_len, instant),
                Wrapper::EndMarker => {
                    if self.advance_file()? {
                        continue;
                    }
                    return Ok(None);
                }
                Wrapper::Torn => {
                    return self.torn(record_start, "torn log record");
                }
            };
            let next_pos = record_start + LOG_RECORD_OVERHEAD + body_len as u64;

            let prefix_bytes = self
                .backend
                .read_at(record_start + 12, RECORD_PREFIX_SIZE)?;
            let prefix = match RecordPrefix::decode(&prefix_bytes) {
                Ok(prefix) => prefix,
                Err(_) => return self.torn(record_start, "unrecognized log record"),
            };

            if prefix.group & crate::types::group::CHECKSUM != 0 {
                match self.handle_checksum(record_start, body_len, next_pos, readable)? {
                    Some(()) => {
                        self.pos = next_pos;
                        continue;
                    }
                    None => return Ok(None),
                }
            }

            if let Some(txid) = self.filter_txid {
                if prefix.txid != txid {
                    self.pos = next_pos;
                    continue;
                }
            }
            if let Some(mask) = self.filter_group {
                if prefix.group & mask == 0 {
                    self.pos = next_pos;
                    continue;
                }
            }

            let body = self.backend.read_at(record_start + 12, body_len)?;
            let record = match LogRecord::decode(&body) {
                Ok(record) => record,
                Err(_) => return self.torn(record_start, "undecodable log record"),
            };
            let record = decrypt_record(self.cipher.as_ref(), record)?;

            self.instant = instant;
            self.record_end = LogInstant::make(self.file_number, next_pos);
            self.pos = next_pos;
            return Ok(Some(ScannedRecord { instant, record }));
        }
    }

    /// Verifies (if enabled) and consumes the checksum record at
    /// `record_start`. Returns `None` when verification failed under the
    /// tolerant limit and the scan is over.
    fn handle_checksum(
        &mut self,
        record_start: u64,
        body_len: usize,
        next_pos: u64,
        readable: u64,
    ) -> LogResult<Option<()>> {
        if !self.verify_checksums {
            return Ok(Some(()));
        }

        let body = self.backend.read_at(record_start + 12, body_len)?;
        let record = match LogRecord::decode(&body) {
            Ok(record) => record,
            Err(_) => {
                return self
                    .torn(record_start, "undecodable checksum record")
                    .map(|_| None)
            }
        };
        let LogRecordBody::Checksum { value, count, .. } = record.body else {
            return Err(LogError::corruption("checksum group on non-checksum record"));
        };

        if next_pos + u64::from(count) > readable {
            return match self.limit {
                ScanLimit::EndOfDevice => {
                    self.mark_fuzzy(record_start);
                    Ok(None)
                }
                ScanLimit::Flushed => Err(LogError::corruption(
                    "checksum record covers unflushed bytes",
                )),
            };
        }

        let covered = self.backend.read_at(next_pos, count as usize)?;
        let actual = compute_crc32(&covered);
        if actual != value {
            return match self.limit {
                ScanLimit::EndOfDevice => {
                    tracing::debug!(
                        file = self.file_number,
                        position = record_start,
                        "checksum mismatch marks end of usable log"
                    );
                    self.mark_fuzzy(record_start);
                    Ok(None)
                }
                ScanLimit::Flushed => Err(LogError::ChecksumMismatch {
                    expected: value,
                    actual,
                }),
            };
        }
        Ok(Some(()))
    }

    fn torn(&mut self, at: u64, what: &str) -> LogResult<Option<ScannedRecord>> {
        match self.limit {
            ScanLimit::EndOfDevice => {
                tracing::debug!(
                    file = self.file_number,
                    position = at,
                    "{what} marks end of usable log"
                );
                self.mark_fuzzy(at);
                Ok(None)
            }
            ScanLimit::Flushed => Err(LogError::corruption(format!(
                "{what} at ({},{}) below the flushed mark",
                self.file_number, at
            ))),
        }
    }

    fn mark_fuzzy(&mut self, at: u64) {
        self.fuzzy_end = Some(LogInstant::make(self.file_number, at));
        self.done = true;
    }

    fn readable_end(&self) -> LogResult<u64> {
        match self.limit {
            ScanLimit::EndOfDevice => Ok(self.backend.size()?),
            ScanLimit::Flushed => {
                let flushed = self.chain.flushed_end();
                if flushed.file_number() > self.file_number {
                    Ok(self.backend.size()?)
                } else if flushed.file_number() == self.file_number {
                    Ok(flushed.position())
                } else {
                    Ok(0)
                }
            }
        }
    }

    fn advance_file(&mut self) -> LogResult<bool> {
        let next = self.file_number + 1;
        if !self.chain.file_exists(next) {
            self.done = true;
            return Ok(false);
        }
        self.backend = self.chain.open_log_file(next)?;
        self.file_number = next;
        self.pos = LOG_FILE_HEADER_SIZE;
        self.record_end = LogInstant::make(next, LOG_FILE_HEADER_SIZE);
        Ok(true)
    }
}
