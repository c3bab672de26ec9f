//! Checkpoint record contents.

use crate::error::LogResult;
use crate::instant::LogInstant;
use crate::record::ByteReader;
use crate::txn::TxnSnapshot;

/// A named floor below which log files must be retained.
///
/// Owners such as an online backup register a truncation point with the
/// engine; checkpoint truncation never deletes a log file at or above the
/// lowest registered point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationPoint {
    /// Name of the component that registered the point.
    pub owner: String,
    /// Oldest instant the owner still needs.
    pub instant: LogInstant,
}

/// Body of a checkpoint record.
///
/// `redo_lwm` is the end of the log when the checkpoint started: recovery
/// replays data changes only from here forward. `undo_lwm` is the first
/// instant of the oldest transaction live at checkpoint time: recovery
/// scans from here so it can rebuild transaction state. `undo_lwm` is
/// never greater than `redo_lwm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPayload {
    /// Redo low-water mark.
    pub redo_lwm: LogInstant,
    /// Undo low-water mark.
    pub undo_lwm: LogInstant,
    /// Truncation points registered at checkpoint time.
    pub truncation_points: Vec<TruncationPoint>,
    /// Snapshot of the live-transaction table, if one was captured.
    ///
    /// When absent, recovery rebuilds the table by scanning from
    /// `undo_lwm`.
    pub txn_snapshot: Option<TxnSnapshot>,
}

impl CheckpointPayload {
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.redo_lwm.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.undo_lwm.as_u64().to_le_bytes());

        buf.extend_from_slice(&(self.truncation_points.len() as u32).to_le_bytes());
        for point in &self.truncation_points {
            let owner = point.owner.as_bytes();
            buf.extend_from_slice(&(owner.len() as u16).to_le_bytes());
            buf.extend_from_slice(owner);
            buf.extend_from_slice(&point.instant.as_u64().to_le_bytes());
        }

        match &self.txn_snapshot {
            Some(snapshot) => {
                buf.push(1);
                snapshot.encode_into(buf);
            }
            None => buf.push(0),
        }
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> LogResult<Self> {
        let redo_lwm = LogInstant::from_u64(r.read_u64()?);
        let undo_lwm = LogInstant::from_u64(r.read_u64()?);

        let count = r.read_u32()? as usize;
        let mut truncation_points = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let owner_len = r.read_u16()? as usize;
            let owner = String::from_utf8(r.read_bytes(owner_len)?.to_vec())
                .map_err(|_| crate::error::LogError::corruption("truncation point owner"))?;
            let instant = LogInstant::from_u64(r.read_u64()?);
            truncation_points.push(TruncationPoint { owner, instant });
        }

        let txn_snapshot = match r.read_u8()? {
            0 => None,
            1 => Some(TxnSnapshot::decode(r)?),
            other => {
                return Err(crate::error::LogError::corruption(format!(
                    "unknown snapshot marker {other}"
                )))
            }
        };

        Ok(Self {
            redo_lwm,
            undo_lwm,
            truncation_points,
            txn_snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{TxnEntry, TxnState};
    use crate::types::TransactionId;

    #[test]
    fn roundtrip_without_snapshot() {
        let payload = CheckpointPayload {
            redo_lwm: LogInstant::make(5, 4096),
            undo_lwm: LogInstant::make(4, 128),
            truncation_points: vec![],
            txn_snapshot: None,
        };
        let mut buf = Vec::new();
        payload.encode_into(&mut buf);

        let mut r = ByteReader::new(&buf);
        let decoded = CheckpointPayload::decode(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn roundtrip_with_snapshot_and_points() {
        let payload = CheckpointPayload {
            redo_lwm: LogInstant::make(5, 4096),
            undo_lwm: LogInstant::make(4, 128),
            truncation_points: vec![
                TruncationPoint {
                    owner: "backup".into(),
                    instant: LogInstant::make(3, 24),
                },
                TruncationPoint {
                    owner: "replicator".into(),
                    instant: LogInstant::make(4, 24),
                },
            ],
            txn_snapshot: Some(TxnSnapshot {
                entries: vec![TxnEntry {
                    txid: TransactionId::new(11),
                    first_instant: LogInstant::make(4, 128),
                    last_instant: LogInstant::make(5, 2048),
                    state: TxnState::Active,
                }],
            }),
        };
        let mut buf = Vec::new();
        payload.encode_into(&mut buf);

        let mut r = ByteReader::new(&buf);
        let decoded = CheckpointPayload::decode(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn truncated_payload_rejected() {
        let payload = CheckpointPayload {
            redo_lwm: LogInstant::make(1, 24),
            undo_lwm: LogInstant::make(1, 24),
            truncation_points: vec![],
            txn_snapshot: None,
        };
        let mut buf = Vec::new();
        payload.encode_into(&mut buf);
        buf.truncate(buf.len() - 1);

        let mut r = ByteReader::new(&buf);
        assert!(CheckpointPayload::decode(&mut r).is_err());
    }
}
