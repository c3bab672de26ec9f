//! Crash recovery.
//!
//! Boot hands recovery the control file's checkpoint address. Recovery
//! replays the log forward from the checkpoint's low-water marks to bring
//! the store up to date (redo), rolls back transactions that never
//! finished (undo), and re-acquires what prepared transactions were
//! holding (reprepare). Work the store already contains is filtered out
//! by each operation's own `needs_redo` check and by the redo low-water
//! mark.
//!
//! The end of the log is found, not trusted: the forward scan runs in its
//! tolerant mode, and the first torn or unverifiable bytes become the new
//! end. Whatever sits past that point is zeroed so the bytes of a dead
//! tail can never resurface as records.

use crate::chain::LOG_FILE_HEADER_SIZE;
use crate::checkpoint::CheckpointPayload;
use crate::control::ControlData;
use crate::engine::LogEngine;
use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::record::{LogRecord, LogRecordBody};
use crate::scan::{BackwardScan, ForwardScan, ScanLimit, ScannedRecord};
use crate::txn::TxnEntry;
use crate::types::group;
use std::sync::atomic::Ordering;

/// Largest chunk written while zeroing a dead tail.
const ZERO_FILL_CHUNK: usize = 64 * 1024;

struct RedoOutcome {
    log_end: LogInstant,
    fuzzy: bool,
    records: u64,
}

impl LogEngine {
    /// Called when control files exist but every log file is gone.
    ///
    /// With an explicitly configured log device this is refused; the
    /// operator pointed the store at the wrong place. Otherwise the store
    /// opens read-only so its data can still be salvaged.
    pub(crate) fn missing_log_fallback(&self) -> LogResult<()> {
        if self.config.log_device.is_some() {
            return Err(LogError::unsupported(
                "configured log device holds no log files",
            ));
        }
        tracing::warn!("log files are missing; opening the store read-only");
        self.read_only.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Recovers the store from the log.
    pub(crate) fn recover(&self, control: &ControlData) -> LogResult<()> {
        let checkpoint = self.locate_checkpoint(control);
        let (redo_lwm, undo_lwm, seeded) = match &checkpoint {
            Some(payload) => {
                let seeded = match payload.txn_snapshot.clone() {
                    Some(snapshot) => {
                        self.txns.install_snapshot(snapshot);
                        true
                    }
                    None => false,
                };
                (payload.redo_lwm, payload.undo_lwm, seeded)
            }
            None => (LogInstant::INVALID, LogInstant::INVALID, false),
        };

        let start = if undo_lwm.is_valid() {
            undo_lwm
        } else {
            LogInstant::make(self.chain.first_file_number(), LOG_FILE_HEADER_SIZE)
        };
        tracing::info!(%start, %redo_lwm, "recovery started");

        let outcome = match self.redo_pass(start, redo_lwm, seeded) {
            Ok(outcome) => outcome,
            Err(err @ LogError::StoreCorrupt { .. }) => return Err(err),
            Err(err) => return Err(self.mark_corrupt(&format!("redo failed: {err}"))),
        };

        if self.is_read_only() {
            if outcome.fuzzy {
                return Err(LogError::unsupported(
                    "log has a torn tail but the store is read-only",
                ));
            }
            if !self.txns.active_transactions().is_empty() {
                return Err(LogError::unsupported(
                    "log holds unfinished transactions but the store is read-only",
                ));
            }
        } else {
            self.truncate_dead_tail(outcome.log_end)?;
            self.undo_pass()?;
            self.reprepare_pass()?;
            self.flush(LogInstant::INVALID)?;
        }

        if control.last_checkpoint.is_valid() && checkpoint.is_some() {
            self.set_checkpoint_instant(control.last_checkpoint);
        }
        if let Err(err) = self.data.post_recovery() {
            return Err(self.mark_corrupt(&format!("post-recovery failed: {err}")));
        }
        tracing::info!(
            records = outcome.records,
            end = %outcome.log_end,
            fuzzy = outcome.fuzzy,
            "recovery complete"
        );
        Ok(())
    }

    /// Reads the checkpoint record named by the control file. A missing
    /// or damaged checkpoint is not fatal; recovery falls back to
    /// scanning the whole log.
    fn locate_checkpoint(&self, control: &ControlData) -> Option<CheckpointPayload> {
        if control.last_checkpoint.is_invalid() {
            return None;
        }
        match self.read_checkpoint_payload(control.last_checkpoint) {
            Ok(payload) => Some(payload),
            Err(err) => {
                tracing::warn!(
                    checkpoint = %control.last_checkpoint,
                    error = %err,
                    "checkpoint record unreadable; recovering from the start of the log"
                );
                None
            }
        }
    }

    fn read_checkpoint_payload(&self, instant: LogInstant) -> LogResult<CheckpointPayload> {
        let mut scan = ForwardScan::open(&self.chain, instant, ScanLimit::EndOfDevice)?;
        match scan.next()? {
            Some(ScannedRecord {
                record:
                    LogRecord {
                        body: LogRecordBody::Checkpoint { payload },
                        ..
                    },
                ..
            }) => Ok(payload),
            Some(_) => Err(LogError::corruption(
                "record at the checkpoint address is not a checkpoint",
            )),
            None => Err(LogError::corruption("no record at the checkpoint address")),
        }
    }

    /// Forward pass: rebuilds the live-transaction table and reapplies
    /// logged changes the store may have lost.
    fn redo_pass(
        &self,
        start: LogInstant,
        redo_lwm: LogInstant,
        seeded: bool,
    ) -> LogResult<RedoOutcome> {
        let mut scan = ForwardScan::open(&self.chain, start, ScanLimit::EndOfDevice)?
            .with_cipher(self.cipher.clone())
            .with_checksum_verification(true);
        let mut records = 0u64;

        while let Some(ScannedRecord { instant, record }) = scan.next()? {
            records += 1;
            if record.is_checkpoint() {
                continue;
            }
            let before_redo = redo_lwm.is_valid() && instant < redo_lwm;
            let resolves = record.is_complete() || record.is_prepare();
            if before_redo && !record.is_first() && !resolves {
                // the store already holds this change and the snapshot
                // already tracks this transaction
                continue;
            }

            let txid = record.txid;
            match (self.txns.find_transaction(txid).is_some(), record.is_first()) {
                (true, true) => {
                    // the scan starts at the oldest live transaction's
                    // first record, which the snapshot already tracks
                }
                (false, true) => self.txns.start_transaction(txid, instant),
                (true, false) => self.txns.note_operation(txid, instant),
                (false, false) => {
                    if before_redo && resolves {
                        continue; // finished before the checkpoint
                    }
                    if seeded {
                        return Err(LogError::corruption(format!(
                            "record at {instant} belongs to unknown transaction {txid}"
                        )));
                    }
                    self.txns.note_operation(txid, instant);
                }
            }

            if !before_redo {
                match &record.body {
                    LogRecordBody::Operation { payload } if !payload.is_empty() => {
                        let op = self.decoder.decode(payload)?;
                        if op.needs_redo(self.data.as_ref())? {
                            op.redo(self.data.as_ref(), instant)?;
                        }
                    }
                    LogRecordBody::Compensation { undo_instant, .. } => {
                        self.redo_compensation(*undo_instant, instant)?;
                    }
                    _ => {}
                }
            }

            if record.is_complete() {
                self.txns.complete_transaction(txid);
            } else if record.is_prepare() {
                self.txns.mark_prepared(txid);
            }
        }

        Ok(RedoOutcome {
            log_end: scan.record_end(),
            fuzzy: scan.fuzzy_end().is_some(),
            records,
        })
    }

    /// Replaying a compensation record means rolling the original
    /// operation back again, against the address of the compensation.
    fn redo_compensation(
        &self,
        undo_instant: LogInstant,
        clr_instant: LogInstant,
    ) -> LogResult<()> {
        let mut scan = ForwardScan::open(&self.chain, undo_instant, ScanLimit::EndOfDevice)?
            .with_cipher(self.cipher.clone());
        let Some(found) = scan.next()? else {
            return Err(LogError::corruption(format!(
                "compensation at {clr_instant} points at missing record {undo_instant}"
            )));
        };
        let Some(payload) = found.record.payload().filter(|p| !p.is_empty()) else {
            return Err(LogError::corruption(format!(
                "compensation at {clr_instant} points at a record with no payload"
            )));
        };
        let op = self.decoder.decode(payload)?;
        if op.needs_redo(self.data.as_ref())? {
            op.undo(self.data.as_ref(), clr_instant)?;
        }
        Ok(())
    }

    /// Zeroes everything past the recovered end of the log, removes any
    /// files past the end file, and installs the writer at the end.
    fn truncate_dead_tail(&self, log_end: LogInstant) -> LogResult<()> {
        let last = self.chain.last_file_number();
        for file_number in (log_end.file_number() + 1)..=last {
            self.chain
                .device()
                .delete(&crate::chain::FileChain::log_file_name(file_number))?;
            tracing::warn!(file = file_number, "removed log file past the torn tail");
        }
        self.chain
            .set_range(self.chain.first_file_number(), log_end.file_number());

        let backend = self.chain.open_log_file(log_end.file_number())?;
        let size = backend.size()?;
        let mut pos = log_end.position();
        if pos < size {
            tracing::info!(end = %log_end, tail = size - pos, "zeroing the dead tail");
            let zeros = vec![0u8; ZERO_FILL_CHUNK.min((size - pos) as usize)];
            while pos < size {
                let chunk = zeros.len().min((size - pos) as usize);
                backend.write_at(pos, &zeros[..chunk])?;
                pos += chunk as u64;
            }
            backend.sync()?;
        }
        self.install_writer(backend, log_end)
    }

    /// Rolls back every transaction left active after redo.
    fn undo_pass(&self) -> LogResult<()> {
        for entry in self.txns.active_transactions() {
            if let Err(err) = self.undo_transaction(&entry) {
                if matches!(err, LogError::StoreCorrupt { .. }) {
                    return Err(err);
                }
                return Err(self.mark_corrupt(&format!(
                    "rollback of {} failed: {err}",
                    entry.txid
                )));
            }
        }
        Ok(())
    }

    fn undo_transaction(&self, entry: &TxnEntry) -> LogResult<()> {
        tracing::debug!(txid = %entry.txid, "rolling back unfinished transaction");
        let mut scan = BackwardScan::open_at(&self.chain, entry.last_instant)?
            .with_cipher(self.cipher.clone())
            .with_txid_filter(entry.txid);

        while let Some(ScannedRecord { instant, record }) = scan.next()? {
            match &record.body {
                LogRecordBody::Compensation { undo_instant, .. } => {
                    // everything from here back to the compensated record
                    // was already rolled back before the crash
                    scan.reset_position(*undo_instant)?;
                    continue;
                }
                LogRecordBody::Operation { payload } if !payload.is_empty() => {
                    let op = self.decoder.decode(payload)?;
                    if op.undoable() {
                        let clr = LogRecord::compensation(entry.txid, instant, op.undo_payload()?);
                        let clr_instant = self.append(&clr)?;
                        op.undo(self.data.as_ref(), clr_instant)?;
                    }
                }
                _ => {}
            }
            if instant <= entry.first_instant {
                break;
            }
        }

        let close = LogRecord::operation(entry.txid, group::LAST | group::ABORT, Vec::new());
        self.append(&close)?;
        Ok(())
    }

    /// Lets every prepared transaction re-acquire what it held.
    fn reprepare_pass(&self) -> LogResult<()> {
        for entry in self.txns.prepared_transactions() {
            if let Err(err) = self.reprepare_transaction(&entry) {
                if matches!(err, LogError::StoreCorrupt { .. }) {
                    return Err(err);
                }
                return Err(self.mark_corrupt(&format!(
                    "reprepare of {} failed: {err}",
                    entry.txid
                )));
            }
        }
        Ok(())
    }

    fn reprepare_transaction(&self, entry: &TxnEntry) -> LogResult<()> {
        tracing::debug!(txid = %entry.txid, "repreparing transaction");
        let mut scan = BackwardScan::open_at(&self.chain, entry.last_instant)?
            .with_cipher(self.cipher.clone())
            .with_txid_filter(entry.txid);

        while let Some(ScannedRecord { instant, record }) = scan.next()? {
            match &record.body {
                LogRecordBody::Compensation { undo_instant, .. } => {
                    scan.reset_position(*undo_instant)?;
                    continue;
                }
                LogRecordBody::Operation { payload } if !payload.is_empty() => {
                    let op = self.decoder.decode(payload)?;
                    if op.undoable() {
                        op.reprepare(self.data.as_ref())?;
                    }
                }
                _ => {}
            }
            if instant <= entry.first_instant {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{LogDevice, MemDevice};
    use crate::config::LogConfig;
    use crate::ops::{DataStore, TransactionControl};
    use crate::testutil::{op_payload, TestDecoder, TestStore};
    use crate::txn::TransactionTable;
    use crate::types::TransactionId;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    struct Booted {
        store: Arc<TestStore>,
        txns: Arc<TransactionTable>,
        engine: Arc<LogEngine>,
    }

    fn boot(device: &Arc<MemDevice>, config: LogConfig) -> LogResult<Booted> {
        let store = TestStore::new();
        let txns = Arc::new(TransactionTable::new());
        let decoder = Arc::new(TestDecoder::new(Arc::clone(&store)));
        let engine = LogEngine::boot(
            Arc::clone(device) as Arc<dyn LogDevice>,
            config,
            Arc::clone(&store) as Arc<dyn DataStore>,
            Arc::clone(&txns) as Arc<dyn TransactionControl>,
            decoder,
            None,
        )?;
        Ok(Booted {
            store,
            txns,
            engine,
        })
    }

    fn op(txid: u64, flags: u32, id: u64) -> LogRecord {
        LogRecord::operation(TransactionId::new(txid), flags, op_payload(id, true))
    }

    fn marker(txid: u64, flags: u32) -> LogRecord {
        LogRecord::operation(TransactionId::new(txid), flags, Vec::new())
    }

    #[test]
    fn replays_committed_work_after_a_crash() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            first.engine.append(&op(1, group::FIRST, 10)).unwrap();
            let i = first
                .engine
                .append(&op(1, group::LAST | group::COMMIT, 11))
                .unwrap();
            first.engine.flush(i).unwrap();
            // dropped without shutdown: a crash
        }

        let second = boot(&device, LogConfig::default()).unwrap();
        assert_eq!(second.store.redone_ids(), vec![10, 11]);
        assert!(second.txns.active_transactions().is_empty());
        assert!(second.store.post_recovery_done.load(Ordering::SeqCst));
        // the post-boot checkpoint ran
        assert!(second.engine.checkpoint_instant().is_valid());
        second.engine.shutdown().unwrap();
    }

    #[test]
    fn unflushed_records_do_not_come_back() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            let i = first
                .engine
                .append(&op(1, group::FIRST | group::LAST | group::COMMIT, 10))
                .unwrap();
            first.engine.flush(i).unwrap();
            // buffered only; lost with the crash
            first
                .engine
                .append(&op(2, group::FIRST | group::LAST | group::COMMIT, 99))
                .unwrap();
        }

        let second = boot(&device, LogConfig::default()).unwrap();
        assert_eq!(second.store.redone_ids(), vec![10]);
        second.engine.shutdown().unwrap();
    }

    #[test]
    fn rolls_back_an_unfinished_transaction() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            first.engine.append(&op(1, group::FIRST, 10)).unwrap();
            let i = first.engine.append(&op(1, 0, 11)).unwrap();
            first.engine.flush(i).unwrap();
        }

        let second = boot(&device, LogConfig::default()).unwrap();
        assert_eq!(second.store.redone_ids(), vec![10, 11]);
        // newest first, each through a fresh compensation record
        assert_eq!(second.store.undone_ids(), vec![11, 10]);
        assert!(second.txns.active_transactions().is_empty());
        second.engine.shutdown().unwrap();

        // a third boot replays the compensations instead of undoing again
        let third = boot(&device, LogConfig::default()).unwrap();
        assert!(third.txns.active_transactions().is_empty());
        third.engine.shutdown().unwrap();
    }

    #[test]
    fn compensated_span_is_not_undone_twice() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            first.engine.append(&op(1, group::FIRST, 10)).unwrap();
            let i2 = first.engine.append(&op(1, 0, 11)).unwrap();
            // the transaction had already rolled record 11 back
            let clr = LogRecord::compensation(TransactionId::new(1), i2, op_payload(11, true));
            let i3 = first.engine.append(&clr).unwrap();
            first.engine.flush(i3).unwrap();
        }

        let second = boot(&device, LogConfig::default()).unwrap();
        assert_eq!(second.store.redone_ids(), vec![10, 11]);
        // 11 undone once replaying the compensation, then the scan jumps
        // over it and only 10 is undone afresh
        assert_eq!(second.store.undone_ids(), vec![11, 10]);
        assert!(second.txns.active_transactions().is_empty());
        second.engine.shutdown().unwrap();
    }

    #[test]
    fn compensation_replay_respects_what_the_store_kept() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            first.engine.append(&op(1, group::FIRST, 10)).unwrap();
            let i2 = first.engine.append(&op(1, 0, 11)).unwrap();
            let clr = LogRecord::compensation(TransactionId::new(1), i2, op_payload(11, true));
            let i3 = first.engine.append(&clr).unwrap();
            first.engine.flush(i3).unwrap();
        }

        // the store made everything durable through record 11's rollback
        let store = TestStore::new();
        store.applied.lock().extend([10, 11]);
        let txns = Arc::new(TransactionTable::new());
        let decoder = Arc::new(TestDecoder::new(Arc::clone(&store)));
        let engine = LogEngine::boot(
            Arc::clone(&device) as Arc<dyn LogDevice>,
            LogConfig::default(),
            Arc::clone(&store) as Arc<dyn DataStore>,
            Arc::clone(&txns) as Arc<dyn TransactionControl>,
            decoder,
            None,
        )
        .unwrap();

        // neither the operations nor the compensation replay
        assert!(store.redone_ids().is_empty());
        // the live rollback still undoes record 10
        assert_eq!(store.undone_ids(), vec![10]);
        assert!(txns.active_transactions().is_empty());
        engine.shutdown().unwrap();
    }

    #[test]
    fn torn_tail_is_zeroed_and_log_reusable() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            let i = first
                .engine
                .append(&op(1, group::FIRST | group::LAST | group::COMMIT, 10))
                .unwrap();
            first.engine.flush(i).unwrap();
        }
        // a torn write past the flushed end
        let backend = device.open("log1.dat").unwrap();
        backend.append(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02]).unwrap();

        let second = boot(&device, LogConfig::default()).unwrap();
        assert_eq!(second.store.redone_ids(), vec![10]);
        let i = second
            .engine
            .append(&op(2, group::FIRST | group::LAST | group::COMMIT, 20))
            .unwrap();
        second.engine.flush(i).unwrap();
        drop(second);

        let third = boot(&device, LogConfig::default()).unwrap();
        assert!(third.store.redone_ids().contains(&20));
        third.engine.shutdown().unwrap();
    }

    #[test]
    fn redo_skips_work_below_the_checkpoint() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            let i = first
                .engine
                .append(&op(1, group::FIRST | group::LAST | group::COMMIT, 10))
                .unwrap();
            first.engine.flush(i).unwrap();
            first.engine.checkpoint(true).unwrap();
            let i = first
                .engine
                .append(&op(2, group::FIRST | group::LAST | group::COMMIT, 20))
                .unwrap();
            first.engine.flush(i).unwrap();
        }

        let second = boot(&device, LogConfig::default()).unwrap();
        // record 10 was covered by the checkpoint; only 20 replays
        assert_eq!(second.store.redone_ids(), vec![20]);
        second.engine.shutdown().unwrap();
    }

    #[test]
    fn prepared_transaction_survives_reboots() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            first.engine.append(&op(7, group::FIRST, 10)).unwrap();
            first.engine.append(&op(7, 0, 11)).unwrap();
            let i = first
                .engine
                .append(&marker(7, group::LAST | group::PREPARE))
                .unwrap();
            first.engine.flush(i).unwrap();
        }

        let second = boot(&device, LogConfig::default()).unwrap();
        assert_eq!(second.store.redone_ids(), vec![10, 11]);
        assert!(second.store.undone_ids().is_empty());
        // newest first, resources re-acquired
        assert_eq!(*second.store.reprepared.lock(), vec![11, 10]);
        assert_eq!(second.txns.prepared_transactions().len(), 1);
        second.engine.shutdown().unwrap();

        // the shutdown checkpoint's snapshot carries the prepared
        // transaction into the next boot
        let third = boot(&device, LogConfig::default()).unwrap();
        assert_eq!(third.txns.prepared_transactions().len(), 1);
        assert_eq!(*third.store.reprepared.lock(), vec![11, 10]);
        assert!(third.store.redone_ids().is_empty());
        third.engine.shutdown().unwrap();
    }

    #[test]
    fn read_only_boot_of_a_clean_log() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            let i = first
                .engine
                .append(&op(1, group::FIRST | group::LAST | group::COMMIT, 10))
                .unwrap();
            first.engine.flush(i).unwrap();
            first.engine.shutdown().unwrap();
        }

        let second = boot(&device, LogConfig::new().with_read_only(true)).unwrap();
        assert!(second.engine.is_read_only());
        assert!(matches!(
            second.engine.append(&op(2, group::FIRST, 20)),
            Err(LogError::ReadOnly)
        ));
        assert!(!second.engine.checkpoint(true).unwrap());
    }

    #[test]
    fn read_only_boot_refuses_a_log_that_needs_recovery() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            let i = first.engine.append(&op(1, group::FIRST, 10)).unwrap();
            first.engine.flush(i).unwrap();
        }

        assert!(matches!(
            boot(&device, LogConfig::new().with_read_only(true)),
            Err(LogError::Unsupported { .. })
        ));
    }

    #[test]
    fn missing_log_files_fall_back_to_read_only() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            first.engine.shutdown().unwrap();
        }
        device.delete("log1.dat").unwrap();

        let second = boot(&device, LogConfig::default()).unwrap();
        assert!(second.engine.is_read_only());
        assert!(matches!(
            second.engine.append(&op(1, group::FIRST, 1)),
            Err(LogError::ReadOnly)
        ));
    }

    #[test]
    fn missing_log_files_on_an_explicit_device_refused() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            first.engine.shutdown().unwrap();
        }
        device.delete("log1.dat").unwrap();

        assert!(matches!(
            boot(&device, LogConfig::new().with_log_device("/mnt/logs")),
            Err(LogError::Unsupported { .. })
        ));
    }

    #[test]
    fn recovery_without_a_readable_checkpoint_scans_everything() {
        let device = Arc::new(MemDevice::new());
        {
            let first = boot(&device, LogConfig::default()).unwrap();
            let i = first
                .engine
                .append(&op(1, group::FIRST | group::LAST | group::COMMIT, 10))
                .unwrap();
            first.engine.flush(i).unwrap();
            first.engine.checkpoint(true).unwrap();
            let i = first
                .engine
                .append(&op(2, group::FIRST | group::LAST | group::COMMIT, 20))
                .unwrap();
            first.engine.flush(i).unwrap();
        }
        // tear both control files back to a fresh state: the checkpoint
        // address is lost but the log itself is intact
        crate::control::write_control_files(
            device.as_ref(),
            &ControlData::new(LogInstant::INVALID, false),
        )
        .unwrap();

        let second = boot(&device, LogConfig::default()).unwrap();
        assert_eq!(second.store.redone_ids(), vec![10, 20]);
        second.engine.shutdown().unwrap();
    }
}
