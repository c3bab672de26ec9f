//! Collaborator seams between the log engine and the rest of the store.
//!
//! The log does not know what its payloads mean. The layer above supplies
//! these traits at boot: a [`DataStore`] the log can checkpoint and
//! corrupt-latch, a [`TransactionControl`] tracking live transactions, an
//! [`OperationDecoder`] that turns payload bytes back into redo/undo-able
//! operations during recovery, and optionally a [`LogCipher`].
//!
//! All implementations must synchronize internally; the log calls them
//! from multiple threads.

use crate::error::LogResult;
use crate::instant::LogInstant;
use crate::txn::{TxnEntry, TxnSnapshot};
use crate::types::TransactionId;

/// The persistent store the log protects.
pub trait DataStore: Send + Sync {
    /// Flushes all dirty store state to disk as part of a checkpoint.
    ///
    /// When this returns, every change logged before the checkpoint's redo
    /// low-water mark must be durable in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if store state cannot be made durable.
    fn checkpoint(&self) -> LogResult<()>;

    /// Called once after recovery completes, before the store is opened
    /// for business.
    ///
    /// # Errors
    ///
    /// Returns an error if post-recovery work fails; the store will be
    /// marked corrupt.
    fn post_recovery(&self) -> LogResult<()>;

    /// Reclaims containers dropped before the given instant.
    ///
    /// Invoked after a checkpoint establishes that no recovery pass will
    /// ever need log records older than `instant`.
    ///
    /// # Errors
    ///
    /// Returns an error if reclamation fails.
    fn remove_dropped_stubs(&self, instant: LogInstant) -> LogResult<()>;

    /// Propagates the corrupt latch into the store.
    ///
    /// After this call the store must refuse to flush further changes.
    fn mark_corrupt(&self, cause: &str);
}

/// Live-transaction bookkeeping consulted by checkpoints and recovery.
pub trait TransactionControl: Send + Sync {
    /// Registers a transaction whose first record is at `first_instant`.
    fn start_transaction(&self, txid: TransactionId, first_instant: LogInstant);

    /// Records that `txid` logged a record at `instant`.
    fn note_operation(&self, txid: TransactionId, instant: LogInstant);

    /// Removes a transaction that committed or aborted.
    fn complete_transaction(&self, txid: TransactionId);

    /// Moves a transaction into the prepared state.
    fn mark_prepared(&self, txid: TransactionId);

    /// Looks up a transaction by id.
    fn find_transaction(&self, txid: TransactionId) -> Option<TxnEntry>;

    /// Returns the first instant logged by the oldest live transaction.
    ///
    /// `None` when no transaction is live; checkpoints then use the
    /// current end of the log as the undo low-water mark.
    fn first_active_instant(&self) -> Option<LogInstant>;

    /// Captures the current table for inclusion in a checkpoint record.
    fn snapshot(&self) -> TxnSnapshot;

    /// Replaces the table with a snapshot read from a checkpoint record.
    fn install_snapshot(&self, snapshot: TxnSnapshot);

    /// Returns all transactions that are live and not prepared.
    fn active_transactions(&self) -> Vec<TxnEntry>;

    /// Returns all transactions in the prepared state.
    fn prepared_transactions(&self) -> Vec<TxnEntry>;
}

/// A logged operation reconstituted from its payload during recovery.
pub trait LogOperation: Send {
    /// Returns `true` if the operation's effect is missing from the store
    /// and must be reapplied.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be examined.
    fn needs_redo(&self, data: &dyn DataStore) -> LogResult<bool>;

    /// Reapplies the operation's effect.
    ///
    /// `instant` is the address the operation was logged at, available to
    /// implementations that stamp pages with log addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if the effect cannot be applied.
    fn redo(&self, data: &dyn DataStore, instant: LogInstant) -> LogResult<()>;

    /// Returns `true` if the operation can be rolled back.
    ///
    /// Non-undoable records (pure markers such as begin or commit) are
    /// skipped by the undo pass.
    fn undoable(&self) -> bool;

    /// Produces the payload for the compensation record that will roll
    /// this operation back. May be empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the compensating payload cannot be built.
    fn undo_payload(&self) -> LogResult<Vec<u8>>;

    /// Applies the compensating effect, rolling this operation back.
    ///
    /// `clr_instant` is the address of the compensation record that was
    /// logged before this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn undo(&self, data: &dyn DataStore, clr_instant: LogInstant) -> LogResult<()>;

    /// Re-acquires the resources a prepared transaction held at crash
    /// time, so the transaction can later be committed or aborted.
    ///
    /// # Errors
    ///
    /// Returns an error if the resources cannot be re-acquired.
    fn reprepare(&self, data: &dyn DataStore) -> LogResult<()>;
}

/// Decodes operation payloads back into [`LogOperation`]s.
pub trait OperationDecoder: Send + Sync {
    /// Decodes one operation payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn decode(&self, payload: &[u8]) -> LogResult<Box<dyn LogOperation>>;
}

/// Optional payload encryption.
///
/// Applied to operation and compensation payloads only; record wrappers,
/// checksum records, checkpoint records, and file headers stay in the
/// clear so scans can navigate the log without keys. Both directions must
/// preserve length.
pub trait LogCipher: Send + Sync {
    /// Cipher block size in bytes.
    fn block_size(&self) -> usize;

    /// Encrypts a payload. The result must have the same length.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    fn encrypt(&self, data: &[u8]) -> LogResult<Vec<u8>>;

    /// Decrypts a payload. The result must have the same length.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails.
    fn decrypt(&self, data: &[u8]) -> LogResult<Vec<u8>>;
}
