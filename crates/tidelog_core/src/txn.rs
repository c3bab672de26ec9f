//! Live-transaction table.
//!
//! A concrete [`TransactionControl`] implementation suitable for most
//! embedders. Checkpoint records carry a snapshot of this table so that
//! recovery can seed it without rescanning from the beginning of time.

use crate::error::LogResult;
use crate::instant::LogInstant;
use crate::ops::TransactionControl;
use crate::record::ByteReader;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// State of a live transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// The transaction is running.
    Active,
    /// The transaction has prepared and awaits a commit or abort decision.
    Prepared,
}

/// One live transaction as the log sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnEntry {
    /// Transaction id.
    pub txid: TransactionId,
    /// Address of the transaction's first log record.
    pub first_instant: LogInstant,
    /// Address of the transaction's most recent log record.
    pub last_instant: LogInstant,
    /// Current state.
    pub state: TxnState,
}

/// Serializable snapshot of the transaction table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnSnapshot {
    /// Entries captured at snapshot time.
    pub entries: Vec<TxnEntry>,
}

impl TxnSnapshot {
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.txid.as_u64().to_le_bytes());
            buf.extend_from_slice(&entry.first_instant.as_u64().to_le_bytes());
            buf.extend_from_slice(&entry.last_instant.as_u64().to_le_bytes());
            buf.push(match entry.state {
                TxnState::Active => 0,
                TxnState::Prepared => 1,
            });
        }
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> LogResult<Self> {
        let count = r.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let txid = TransactionId::new(r.read_u64()?);
            let first_instant = LogInstant::from_u64(r.read_u64()?);
            let last_instant = LogInstant::from_u64(r.read_u64()?);
            let state = match r.read_u8()? {
                0 => TxnState::Active,
                1 => TxnState::Prepared,
                other => {
                    return Err(crate::error::LogError::corruption(format!(
                        "unknown transaction state {other}"
                    )))
                }
            };
            entries.push(TxnEntry {
                txid,
                first_instant,
                last_instant,
                state,
            });
        }
        Ok(Self { entries })
    }
}

/// Default in-memory transaction table.
#[derive(Debug, Default)]
pub struct TransactionTable {
    entries: Mutex<HashMap<TransactionId, TxnEntry>>,
}

impl TransactionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no transaction is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl TransactionControl for TransactionTable {
    fn start_transaction(&self, txid: TransactionId, first_instant: LogInstant) {
        self.entries.lock().entry(txid).or_insert(TxnEntry {
            txid,
            first_instant,
            last_instant: first_instant,
            state: TxnState::Active,
        });
    }

    fn note_operation(&self, txid: TransactionId, instant: LogInstant) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&txid) {
            Some(entry) => entry.last_instant = instant,
            None => {
                entries.insert(
                    txid,
                    TxnEntry {
                        txid,
                        first_instant: instant,
                        last_instant: instant,
                        state: TxnState::Active,
                    },
                );
            }
        }
    }

    fn complete_transaction(&self, txid: TransactionId) {
        self.entries.lock().remove(&txid);
    }

    fn mark_prepared(&self, txid: TransactionId) {
        if let Some(entry) = self.entries.lock().get_mut(&txid) {
            entry.state = TxnState::Prepared;
        }
    }

    fn find_transaction(&self, txid: TransactionId) -> Option<TxnEntry> {
        self.entries.lock().get(&txid).copied()
    }

    fn first_active_instant(&self) -> Option<LogInstant> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.first_instant)
            .min()
    }

    fn snapshot(&self) -> TxnSnapshot {
        let mut entries: Vec<TxnEntry> = self.entries.lock().values().copied().collect();
        entries.sort_by_key(|entry| entry.txid);
        TxnSnapshot { entries }
    }

    fn install_snapshot(&self, snapshot: TxnSnapshot) {
        let mut entries = self.entries.lock();
        entries.clear();
        for entry in snapshot.entries {
            entries.insert(entry.txid, entry);
        }
    }

    fn active_transactions(&self) -> Vec<TxnEntry> {
        let mut active: Vec<TxnEntry> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.state == TxnState::Active)
            .copied()
            .collect();
        active.sort_by_key(|entry| entry.txid);
        active
    }

    fn prepared_transactions(&self) -> Vec<TxnEntry> {
        let mut prepared: Vec<TxnEntry> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.state == TxnState::Prepared)
            .copied()
            .collect();
        prepared.sort_by_key(|entry| entry.txid);
        prepared
    }
}
