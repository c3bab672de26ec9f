//! Log record body codec.
//!
//! A record on disk is wrapped as
//! `[u32 length][u64 instant][body][u32 length]` where `length` counts only
//! the body bytes. The trailing copy of the length lets a backward scan
//! walk from record to record without an index. The body itself is a
//! tagged union: an opcode byte, the group flags, the transaction id, and
//! variant-specific fields.

use crate::checkpoint::CheckpointPayload;
use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::types::{group, TransactionId};

/// Bytes of wrapper around every record body: leading length, instant,
/// trailing length.
pub const LOG_RECORD_OVERHEAD: u64 = 16;

/// Size of the fixed body prefix: opcode, group flags, transaction id.
pub const RECORD_PREFIX_SIZE: usize = 13;

/// Body size of a checksum record (prefix plus algorithm, value, count).
pub const CHECKSUM_BODY_SIZE: usize = RECORD_PREFIX_SIZE + 9;

/// Total on-disk size of a checksum record including the wrapper.
pub const CHECKSUM_RECORD_SIZE: u64 = LOG_RECORD_OVERHEAD + CHECKSUM_BODY_SIZE as u64;

/// Algorithm identifier for CRC32 checksum records.
pub const CRC32_ALGORITHM: u8 = 1;

const OP_OPERATION: u8 = 1;
const OP_COMPENSATION: u8 = 2;
const OP_CHECKSUM: u8 = 3;
const OP_CHECKPOINT: u8 = 4;

/// Sequential reader over a byte slice used by the on-disk codecs.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> LogResult<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(LogError::corruption("truncated log data"));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> LogResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> LogResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> LogResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_u64(&mut self) -> LogResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| LogError::corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> LogResult<&'a [u8]> {
        self.take(len)
    }

    /// Consumes and returns all remaining bytes.
    pub(crate) fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Fails if any bytes remain unconsumed.
    pub(crate) fn finish(&self) -> LogResult<()> {
        if self.pos != self.buf.len() {
            return Err(LogError::corruption(format!(
                "trailing bytes in log data: consumed {}, total {}",
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }
}

/// The fixed prefix every record body starts with.
///
/// Scans that filter by transaction or group read only this prefix and
/// seek past the rest of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPrefix {
    /// Variant opcode.
    pub opcode: u8,
    /// Group flags.
    pub group: u32,
    /// Transaction the record belongs to.
    pub txid: TransactionId,
}

impl RecordPrefix {
    /// Decodes the prefix from the start of a record body.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        let mut r = ByteReader::new(bytes);
        let opcode = r.read_u8()?;
        if !(OP_OPERATION..=OP_CHECKPOINT).contains(&opcode) {
            return Err(LogError::corruption(format!(
                "unknown log record opcode {opcode}"
            )));
        }
        let group = r.read_u32()?;
        if group & !group::ALL != 0 {
            return Err(LogError::corruption(format!(
                "unknown group flags {group:#x}"
            )));
        }
        let txid = TransactionId::new(r.read_u64()?);
        Ok(Self {
            opcode,
            group,
            txid,
        })
    }
}

/// Variant-specific part of a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecordBody {
    /// A client operation; the payload is opaque to the log.
    Operation {
        /// Encoded operation bytes, interpreted by the operation decoder.
        payload: Vec<u8>,
    },

    /// A compensation record rolling back an earlier operation.
    Compensation {
        /// Address of the operation this record compensates.
        undo_instant: LogInstant,
        /// Optional compensating payload.
        payload: Vec<u8>,
    },

    /// A checksum over the bytes that follow this record.
    Checksum {
        /// Checksum algorithm identifier.
        algorithm: u8,
        /// Checksum value.
        value: u32,
        /// Number of bytes covered, starting just after this record.
        count: u32,
    },

    /// A checkpoint marker.
    Checkpoint {
        /// Checkpoint contents.
        payload: CheckpointPayload,
    },
}

/// A decoded log record: group flags, transaction id, and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Group flags describing the record's role within its transaction.
    pub group: u32,
    /// Transaction the record belongs to.
    pub txid: TransactionId,
    /// Variant-specific contents.
    pub body: LogRecordBody,
}

impl LogRecord {
    /// Creates an operation record.
    #[must_use]
    pub fn operation(txid: TransactionId, group: u32, payload: Vec<u8>) -> Self {
        Self {
            group,
            txid,
            body: LogRecordBody::Operation { payload },
        }
    }

    /// Creates a compensation record for the operation at `undo_instant`.
    #[must_use]
    pub fn compensation(txid: TransactionId, undo_instant: LogInstant, payload: Vec<u8>) -> Self {
        Self {
            group: group::COMPENSATION,
            txid,
            body: LogRecordBody::Compensation {
                undo_instant,
                payload,
            },
        }
    }

    /// Creates a checksum record covering `count` bytes with CRC32 `value`.
    #[must_use]
    pub fn checksum(value: u32, count: u32) -> Self {
        Self {
            group: group::CHECKSUM,
            txid: TransactionId::INTERNAL,
            body: LogRecordBody::Checksum {
                algorithm: CRC32_ALGORITHM,
                value,
                count,
            },
        }
    }

    /// Creates a checkpoint record.
    #[must_use]
    pub fn checkpoint(payload: CheckpointPayload) -> Self {
        Self {
            group: group::CHECKPOINT | group::FIRST | group::LAST | group::COMMIT,
            txid: TransactionId::INTERNAL,
            body: LogRecordBody::Checkpoint { payload },
        }
    }

    /// Returns `true` if this is the first record of its transaction.
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.group & group::FIRST != 0
    }

    /// Returns `true` if this record ends its transaction.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.group & group::LAST != 0 && self.group & (group::COMMIT | group::ABORT) != 0
    }

    /// Returns `true` if this record marks a prepare.
    #[must_use]
    pub fn is_prepare(&self) -> bool {
        self.group & group::PREPARE != 0
    }

    /// Returns `true` if this is a compensation record.
    #[must_use]
    pub fn is_compensation(&self) -> bool {
        matches!(self.body, LogRecordBody::Compensation { .. })
    }

    /// Returns `true` if this is a checksum record.
    #[must_use]
    pub fn is_checksum(&self) -> bool {
        matches!(self.body, LogRecordBody::Checksum { .. })
    }

    /// Returns `true` if this is a checkpoint record.
    #[must_use]
    pub fn is_checkpoint(&self) -> bool {
        matches!(self.body, LogRecordBody::Checkpoint { .. })
    }

    /// Returns the operation payload, if this record carries one.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            LogRecordBody::Operation { payload } | LogRecordBody::Compensation { payload, .. } => {
                Some(payload)
            }
            _ => None,
        }
    }

    /// Returns the compensated address, for compensation records.
    #[must_use]
    pub fn undo_instant(&self) -> Option<LogInstant> {
        match &self.body {
            LogRecordBody::Compensation { undo_instant, .. } => Some(*undo_instant),
            _ => None,
        }
    }

    fn opcode(&self) -> u8 {
        match &self.body {
            LogRecordBody::Operation { .. } => OP_OPERATION,
            LogRecordBody::Compensation { .. } => OP_COMPENSATION,
            LogRecordBody::Checksum { .. } => OP_CHECKSUM,
            LogRecordBody::Checkpoint { .. } => OP_CHECKPOINT,
        }
    }

    /// Encodes the record body.
    pub fn encode(&self) -> LogResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(RECORD_PREFIX_SIZE + 16);
        buf.push(self.opcode());
        buf.extend_from_slice(&self.group.to_le_bytes());
        buf.extend_from_slice(&self.txid.as_u64().to_le_bytes());

        match &self.body {
            LogRecordBody::Operation { payload } => {
                buf.extend_from_slice(payload);
            }
            LogRecordBody::Compensation {
                undo_instant,
                payload,
            } => {
                buf.extend_from_slice(&undo_instant.as_u64().to_le_bytes());
                buf.extend_from_slice(payload);
            }
            LogRecordBody::Checksum {
                algorithm,
                value,
                count,
            } => {
                buf.push(*algorithm);
                buf.extend_from_slice(&value.to_le_bytes());
                buf.extend_from_slice(&count.to_le_bytes());
            }
            LogRecordBody::Checkpoint { payload } => {
                payload.encode_into(&mut buf);
            }
        }

        Ok(buf)
    }

    /// Decodes a record body.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        let prefix = RecordPrefix::decode(bytes)?;
        let mut r = ByteReader::new(&bytes[RECORD_PREFIX_SIZE..]);

        let body = match prefix.opcode {
            OP_OPERATION => LogRecordBody::Operation {
                payload: r.take_rest().to_vec(),
            },
            OP_COMPENSATION => {
                let undo_instant = LogInstant::from_u64(r.read_u64()?);
                LogRecordBody::Compensation {
                    undo_instant,
                    payload: r.take_rest().to_vec(),
                }
            }
            OP_CHECKSUM => {
                let algorithm = r.read_u8()?;
                if algorithm != CRC32_ALGORITHM {
                    return Err(LogError::corruption(format!(
                        "unknown checksum algorithm {algorithm}"
                    )));
                }
                let value = r.read_u32()?;
                let count = r.read_u32()?;
                r.finish()?;
                LogRecordBody::Checksum {
                    algorithm,
                    value,
                    count,
                }
            }
            OP_CHECKPOINT => {
                let payload = CheckpointPayload::decode(&mut r)?;
                r.finish()?;
                LogRecordBody::Checkpoint { payload }
            }
            _ => unreachable!("prefix decode validated the opcode"),
        };

        Ok(Self {
            group: prefix.group,
            txid: prefix.txid,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::TruncationPoint;
    use proptest::prelude::*;

    #[test]
    fn operation_roundtrip() {
        let record = LogRecord::operation(
            TransactionId::new(9),
            group::FIRST | group::LAST | group::COMMIT,
            vec![1, 2, 3, 4],
        );
        let bytes = record.encode().unwrap();
        assert_eq!(LogRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn operation_empty_payload_roundtrip() {
        let record = LogRecord::operation(TransactionId::new(9), group::LAST | group::ABORT, vec![]);
        let bytes = record.encode().unwrap();
        assert_eq!(bytes.len(), RECORD_PREFIX_SIZE);
        assert_eq!(LogRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn compensation_roundtrip() {
        let record = LogRecord::compensation(
            TransactionId::new(3),
            LogInstant::make(2, 512),
            vec![0xAA, 0xBB],
        );
        let bytes = record.encode().unwrap();
        let decoded = LogRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.undo_instant(), Some(LogInstant::make(2, 512)));
        assert!(decoded.is_compensation());
    }

    #[test]
    fn checksum_record_size_is_fixed() {
        let record = LogRecord::checksum(0xDEAD_BEEF, 100);
        let bytes = record.encode().unwrap();
        assert_eq!(bytes.len(), CHECKSUM_BODY_SIZE);
        assert_eq!(
            bytes.len() as u64 + LOG_RECORD_OVERHEAD,
            CHECKSUM_RECORD_SIZE
        );
        assert_eq!(LogRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn checkpoint_roundtrip() {
        let record = LogRecord::checkpoint(CheckpointPayload {
            redo_lwm: LogInstant::make(4, 100),
            undo_lwm: LogInstant::make(3, 50),
            truncation_points: vec![TruncationPoint {
                owner: "backup".into(),
                instant: LogInstant::make(2, 24),
            }],
            txn_snapshot: None,
        });
        let bytes = record.encode().unwrap();
        let decoded = LogRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.is_checkpoint());
        assert!(decoded.is_complete());
    }

    #[test]
    fn prefix_matches_full_decode() {
        let record = LogRecord::operation(TransactionId::new(77), group::FIRST, vec![5; 32]);
        let bytes = record.encode().unwrap();
        let prefix = RecordPrefix::decode(&bytes).unwrap();
        assert_eq!(prefix.group, group::FIRST);
        assert_eq!(prefix.txid, TransactionId::new(77));
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut bytes = LogRecord::checksum(1, 2).encode().unwrap();
        bytes[0] = 0x7F;
        assert!(matches!(
            LogRecord::decode(&bytes),
            Err(crate::error::LogError::Corruption { .. })
        ));
    }

    #[test]
    fn truncated_body_rejected() {
        let bytes = LogRecord::checksum(1, 2).encode().unwrap();
        assert!(LogRecord::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    proptest! {
        #[test]
        fn operation_payload_roundtrip(
            txid in any::<u64>(),
            payload in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let record = LogRecord::operation(
                TransactionId::new(txid),
                group::FIRST | group::LAST | group::COMMIT,
                payload,
            );
            let bytes = record.encode().unwrap();
            prop_assert_eq!(LogRecord::decode(&bytes).unwrap(), record);
        }
    }
}
