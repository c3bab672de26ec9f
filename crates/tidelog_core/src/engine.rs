//! The log engine.
//!
//! Owns the file chain, the buffered writer, and all position accounting.
//! Appends go through [`LogEngine::append`], which assigns each record its
//! [`LogInstant`] and keeps the live-transaction table in step with the
//! record's group flags. Durability is a separate step: a record is
//! recoverable only once [`LogEngine::flush`] has covered it.
//!
//! A background daemon runs checkpoints when enough log has accumulated;
//! [`LogEngine::checkpoint`] can also be called directly.

use crate::chain::{DirDevice, FileChain, LogDevice, LOG_FILE_HEADER_SIZE};
use crate::checkpoint::{CheckpointPayload, TruncationPoint};
use crate::config::LogConfig;
use crate::control::{read_control_files, write_control_files, ControlData};
use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::ops::{DataStore, LogCipher, OperationDecoder, TransactionControl};
use crate::record::{LogRecord, LogRecordBody, CHECKSUM_RECORD_SIZE, LOG_RECORD_OVERHEAD};
use crate::scan::{BackwardScan, ForwardScan, ScanLimit};
use crate::types::TransactionId;
use crate::writer::LogWriter;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tidelog_storage::StorageBackend;

/// How long the checkpoint daemon sleeps between wakeups.
const DAEMON_POLL: Duration = Duration::from_millis(500);

struct EngineState {
    file_number: u64,
    end_position: u64,
    last_flush: LogInstant,
    checkpoint_instant: LogInstant,
    checkpoint_in_progress: bool,
    frozen: bool,
    written_since_checkpoint: u64,
    checkpoint_due: bool,
    truncation_points: HashMap<String, LogInstant>,
    writer: Option<Arc<LogWriter>>,
}

/// The write-ahead log engine.
///
/// Created through [`LogEngine::boot`]; booting recovers the store from
/// whatever the log holds before the engine accepts new work.
pub struct LogEngine {
    pub(crate) chain: FileChain,
    pub(crate) config: LogConfig,
    pub(crate) data: Arc<dyn DataStore>,
    pub(crate) txns: Arc<dyn TransactionControl>,
    pub(crate) decoder: Arc<dyn OperationDecoder>,
    pub(crate) cipher: Option<Arc<dyn LogCipher>>,
    state: Mutex<EngineState>,
    cond: Condvar,
    corrupt: Mutex<Option<String>>,
    pub(crate) read_only: AtomicBool,
    stop_daemon: AtomicBool,
    daemon: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LogEngine {
    /// Boots the log on the given device, recovering the store if the
    /// log holds work the store has not seen.
    ///
    /// # Errors
    ///
    /// Returns an error if the control files or log files are damaged
    /// beyond recovery, or if recovery itself fails.
    pub fn boot(
        device: Arc<dyn LogDevice>,
        config: LogConfig,
        data: Arc<dyn DataStore>,
        txns: Arc<dyn TransactionControl>,
        decoder: Arc<dyn OperationDecoder>,
        cipher: Option<Arc<dyn LogCipher>>,
    ) -> LogResult<Arc<Self>> {
        let read_only = config.read_only;
        let engine = Arc::new(Self {
            chain: FileChain::new(device),
            config,
            data,
            txns,
            decoder,
            cipher,
            state: Mutex::new(EngineState {
                file_number: 0,
                end_position: 0,
                last_flush: LogInstant::INVALID,
                checkpoint_instant: LogInstant::INVALID,
                checkpoint_in_progress: false,
                frozen: false,
                written_since_checkpoint: 0,
                checkpoint_due: false,
                truncation_points: HashMap::new(),
                writer: None,
            }),
            cond: Condvar::new(),
            corrupt: Mutex::new(None),
            read_only: AtomicBool::new(read_only),
            stop_daemon: AtomicBool::new(false),
            daemon: Mutex::new(None),
        });

        match read_control_files(engine.chain.device())? {
            None => {
                if engine.config.read_only {
                    return Err(LogError::unsupported(
                        "cannot create a log in read-only mode",
                    ));
                }
                engine.initialize_fresh()?;
            }
            Some(control) => {
                let files = engine.chain.list_log_files()?;
                if files.is_empty() {
                    engine.missing_log_fallback()?;
                } else {
                    engine.chain.set_range(files[0], files[files.len() - 1]);
                    engine.recover(&control)?;
                    if !engine.is_read_only() {
                        engine.checkpoint(true)?;
                    }
                }
            }
        }

        if !engine.is_read_only() {
            engine.spawn_daemon()?;
        }
        Ok(engine)
    }

    /// Boots the log under `store_dir`, honoring the configured log
    /// device override.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Locked`] if another process holds the log
    /// directory, or any error [`LogEngine::boot`] can return.
    pub fn boot_dir(
        store_dir: &Path,
        config: LogConfig,
        data: Arc<dyn DataStore>,
        txns: Arc<dyn TransactionControl>,
        decoder: Arc<dyn OperationDecoder>,
        cipher: Option<Arc<dyn LogCipher>>,
    ) -> LogResult<Arc<Self>> {
        let dir = config
            .log_device
            .clone()
            .unwrap_or_else(|| store_dir.join("log"));
        let device: Arc<dyn LogDevice> = if config.read_only {
            Arc::new(DirDevice::open_read_only(&dir)?)
        } else {
            Arc::new(DirDevice::open(&dir, config.durability)?)
        };
        Self::boot(device, config, data, txns, decoder, cipher)
    }

    fn initialize_fresh(&self) -> LogResult<()> {
        let backend = self.chain.create_log_file(1, LogInstant::INVALID)?;
        self.chain.set_range(1, 1);
        write_control_files(
            self.chain.device(),
            &ControlData::new(LogInstant::INVALID, self.config.no_sync),
        )?;

        let writer = Arc::new(LogWriter::new(
            backend,
            LOG_FILE_HEADER_SIZE,
            self.config.buffer_size,
            self.config.buffer_count,
            self.config.no_sync,
        ));
        let start = LogInstant::make(1, LOG_FILE_HEADER_SIZE);
        let mut state = self.state.lock();
        state.file_number = 1;
        state.end_position = LOG_FILE_HEADER_SIZE;
        state.last_flush = start;
        state.writer = Some(writer);
        drop(state);
        self.chain.set_flushed(start);
        tracing::info!("created a fresh log");
        Ok(())
    }

    /// Installs the writer at the true end of the log. Recovery calls
    /// this once it has found where usable records stop.
    pub(crate) fn install_writer(
        &self,
        backend: Box<dyn StorageBackend>,
        end: LogInstant,
    ) -> LogResult<()> {
        let writer = Arc::new(LogWriter::new(
            backend,
            end.position(),
            self.config.buffer_size,
            self.config.buffer_count,
            self.config.no_sync,
        ));
        let mut state = self.state.lock();
        state.file_number = end.file_number();
        state.end_position = end.position();
        state.last_flush = end;
        state.writer = Some(writer);
        drop(state);
        self.chain.set_flushed(end);
        Ok(())
    }

    /// Appends a record, returning the instant it was logged at.
    ///
    /// The record is buffered; call [`LogEngine::flush`] with the
    /// returned instant to make it durable. The live-transaction table is
    /// updated from the record's group flags.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ReadOnly`] on a read-only log,
    /// [`LogError::RecordExceedsMaxFileSize`] for a record that cannot
    /// fit any log file, and [`LogError::StoreCorrupt`] after a write
    /// failure has latched the corrupt flag.
    pub fn append(&self, record: &LogRecord) -> LogResult<LogInstant> {
        self.check_corrupt()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(LogError::ReadOnly);
        }

        let body = self.encode_body(record)?;
        let total = LOG_RECORD_OVERHEAD + body.len() as u64;
        if LOG_FILE_HEADER_SIZE + total + CHECKSUM_RECORD_SIZE > LogInstant::MAX_FILE_SIZE {
            return Err(LogError::RecordExceedsMaxFileSize {
                len: total,
                max: LogInstant::MAX_FILE_SIZE,
            });
        }

        match self.append_body(record, &body, total) {
            Ok(instant) => Ok(instant),
            Err(err @ (LogError::LogFull | LogError::ExceedsMaxLogFileNumber)) => Err(err),
            Err(err) => Err(self.mark_corrupt(&err.to_string())),
        }
    }

    fn append_body(&self, record: &LogRecord, body: &[u8], total: u64) -> LogResult<LogInstant> {
        let mut state = self.state.lock();
        while state.frozen {
            self.cond.wait(&mut state);
        }

        if state.end_position + total + CHECKSUM_RECORD_SIZE > LogInstant::MAX_FILE_SIZE {
            self.switch_log_file_locked(&mut state)?;
        }
        let writer = Arc::clone(state.writer.as_ref().ok_or(LogError::ReadOnly)?);

        let reserved = writer.reserve_space(total, state.file_number, state.end_position)?;
        state.end_position += reserved;
        let instant = LogInstant::make(state.file_number, state.end_position);
        writer.append(instant, body)?;
        state.end_position += total;
        state.written_since_checkpoint += reserved + total;
        // the transaction table must reflect this record before a
        // checkpoint can read it, so update it under the engine lock
        self.note_transaction(record, instant);
        drop(state);
        Ok(instant)
    }

    fn note_transaction(&self, record: &LogRecord, instant: LogInstant) {
        if record.is_checksum() || record.is_checkpoint() || record.txid == TransactionId::INTERNAL
        {
            return;
        }
        if record.is_first() {
            self.txns.start_transaction(record.txid, instant);
        } else {
            self.txns.note_operation(record.txid, instant);
        }
        if record.is_complete() {
            self.txns.complete_transaction(record.txid);
        } else if record.is_prepare() {
            self.txns.mark_prepared(record.txid);
        }
    }

    /// Flushes and syncs the log at least through `instant`.
    ///
    /// An invalid instant flushes everything buffered. Returns without
    /// touching the device when the instant is already durable. Blocks
    /// while the log is frozen.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::LogFull`] when the device cannot be synced,
    /// and [`LogError::StoreCorrupt`] after a write failure.
    pub fn flush(&self, instant: LogInstant) -> LogResult<()> {
        self.check_corrupt()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (writer, target) = {
            let mut state = self.state.lock();
            while state.frozen {
                self.cond.wait(&mut state);
            }
            if instant.is_valid() && instant <= state.last_flush {
                return Ok(());
            }
            let Some(writer) = state.writer.as_ref().map(Arc::clone) else {
                return Ok(());
            };
            (writer, LogInstant::make(state.file_number, state.end_position))
        };
        self.check_corrupt()?;

        // byte IO runs without the engine lock; appends keep going
        match writer.flush_all().and_then(|()| writer.sync()) {
            Ok(()) => {}
            Err(LogError::LogFull) => return Err(LogError::LogFull),
            Err(err) => return Err(self.mark_corrupt(&err.to_string())),
        }

        let (flushed, due) = {
            let mut state = self.state.lock();
            if target > state.last_flush {
                state.last_flush = target;
            }
            let due = state.written_since_checkpoint > self.config.checkpoint_interval
                || state.end_position > self.config.log_switch_interval;
            if due {
                state.checkpoint_due = true;
            }
            (state.last_flush, due)
        };

        self.chain.set_flushed(flushed);
        if due {
            self.cond.notify_all();
        }
        Ok(())
    }

    /// Takes a checkpoint: flushes the store, logs a checkpoint record,
    /// updates the control files, and truncates log files no recovery
    /// will ever need.
    ///
    /// When another checkpoint is already running, returns `Ok(false)`
    /// immediately if `wait` is `false`, otherwise waits its turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the log cannot be written; a
    /// failure after the checkpoint record is logged latches the corrupt
    /// flag.
    pub fn checkpoint(&self, wait: bool) -> LogResult<bool> {
        self.check_corrupt()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let (redo_lwm, undo_lwm, truncation_points) = {
            let mut state = self.state.lock();
            while state.checkpoint_in_progress {
                if !wait {
                    return Ok(false);
                }
                self.cond.wait(&mut state);
            }
            if state.frozen {
                return Ok(false);
            }
            state.checkpoint_in_progress = true;
            state.checkpoint_due = false;

            if state.end_position > self.config.log_switch_interval {
                if let Err(err) = self.switch_log_file_locked(&mut state) {
                    state.checkpoint_in_progress = false;
                    drop(state);
                    self.cond.notify_all();
                    return Err(err);
                }
            }

            let redo = LogInstant::make(state.file_number, state.end_position);
            let undo = self
                .txns
                .first_active_instant()
                .map_or(redo, |first| first.min(redo));
            let points: Vec<TruncationPoint> = {
                let mut points: Vec<_> = state
                    .truncation_points
                    .iter()
                    .map(|(owner, instant)| TruncationPoint {
                        owner: owner.clone(),
                        instant: *instant,
                    })
                    .collect();
                points.sort_by(|a, b| a.owner.cmp(&b.owner));
                points
            };
            (redo, undo, points)
        };

        let result = self.run_checkpoint(redo_lwm, undo_lwm, truncation_points);
        self.state.lock().checkpoint_in_progress = false;
        self.cond.notify_all();
        result.map(|()| true)
    }

    fn run_checkpoint(
        &self,
        redo_lwm: LogInstant,
        undo_lwm: LogInstant,
        truncation_points: Vec<TruncationPoint>,
    ) -> LogResult<()> {
        tracing::debug!(%redo_lwm, %undo_lwm, "checkpoint starting");
        self.data.checkpoint()?;

        let payload = CheckpointPayload {
            redo_lwm,
            undo_lwm,
            truncation_points,
            txn_snapshot: Some(self.txns.snapshot()),
        };
        let record = LogRecord::checkpoint(payload);
        let instant = self.append(&record)?;
        self.flush(instant)?;

        if let Err(err) = write_control_files(
            self.chain.device(),
            &ControlData::new(instant, self.config.no_sync),
        ) {
            return Err(self.mark_corrupt(&err.to_string()));
        }

        let keep_below = {
            let mut state = self.state.lock();
            state.checkpoint_instant = instant;
            state.written_since_checkpoint = 0;
            state.checkpoint_due = false;
            if state.frozen || self.config.keep_all_logs {
                None
            } else {
                let mut keep = undo_lwm.file_number().min(instant.file_number());
                for point in state.truncation_points.values() {
                    if point.is_valid() {
                        keep = keep.min(point.file_number());
                    }
                }
                Some(keep)
            }
        };
        if let Some(keep) = keep_below {
            if let Err(err) = self.chain.delete_files_below(keep) {
                tracing::warn!(error = %err, "log truncation failed; old files remain");
            }
        }

        if let Err(err) = self.data.remove_dropped_stubs(undo_lwm) {
            return Err(self.mark_corrupt(&err.to_string()));
        }
        tracing::info!(checkpoint = %instant, "checkpoint complete");
        Ok(())
    }

    /// Closes the current log file with an end marker and starts the
    /// next one.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ExceedsMaxLogFileNumber`] when the file number
    /// space is exhausted; write failures latch the corrupt flag.
    pub fn switch_log_file(&self) -> LogResult<()> {
        self.check_corrupt()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(LogError::ReadOnly);
        }
        let mut state = self.state.lock();
        match self.switch_log_file_locked(&mut state) {
            Ok(()) => Ok(()),
            Err(err @ (LogError::LogFull | LogError::ExceedsMaxLogFileNumber)) => Err(err),
            Err(err) => {
                drop(state);
                Err(self.mark_corrupt(&err.to_string()))
            }
        }
    }

    fn switch_log_file_locked(&self, state: &mut EngineState) -> LogResult<()> {
        let next = state.file_number + 1;
        if next > LogInstant::MAX_FILE_NUMBER {
            return Err(LogError::ExceedsMaxLogFileNumber);
        }
        let writer = Arc::clone(state.writer.as_ref().ok_or(LogError::ReadOnly)?);

        writer.flush_all()?;
        writer.write_end_marker()?;
        writer.sync()?;
        let prev_end = LogInstant::make(state.file_number, state.end_position);
        self.chain.set_flushed(prev_end);

        let backend = self.chain.create_log_file(next, prev_end)?;
        writer.replace_file(backend, LOG_FILE_HEADER_SIZE);
        state.file_number = next;
        state.end_position = LOG_FILE_HEADER_SIZE;
        state.last_flush = LogInstant::make(next, LOG_FILE_HEADER_SIZE);
        self.chain.set_flushed(state.last_flush);
        tracing::info!(file = next, "switched to a new log file");
        Ok(())
    }

    /// Suspends appends, flushes, and log truncation, for an external
    /// backup.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::StoreCorrupt`] if the log is corrupt.
    pub fn freeze(&self) -> LogResult<()> {
        self.check_corrupt()?;
        self.state.lock().frozen = true;
        tracing::info!("log frozen");
        Ok(())
    }

    /// Resumes appends after [`LogEngine::freeze`].
    pub fn unfreeze(&self) {
        self.state.lock().frozen = false;
        self.cond.notify_all();
        tracing::info!("log unfrozen");
    }

    /// Registers (or moves) a named truncation point: log files holding
    /// `instant` and later are kept through checkpoints until the owner
    /// clears its point.
    pub fn register_truncation_point(&self, owner: &str, instant: LogInstant) {
        self.state
            .lock()
            .truncation_points
            .insert(owner.to_owned(), instant);
    }

    /// Removes a named truncation point.
    pub fn clear_truncation_point(&self, owner: &str) {
        self.state.lock().truncation_points.remove(owner);
    }

    /// Opens a forward scan starting at `start`; an invalid start means
    /// the first record after the most recent checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupt or the start file is gone.
    pub fn open_forward_scan(
        &self,
        start: LogInstant,
        limit: ScanLimit,
    ) -> LogResult<ForwardScan<'_>> {
        self.check_corrupt()?;
        let start = if start.is_valid() {
            start
        } else {
            let checkpoint = self.state.lock().checkpoint_instant;
            if checkpoint.is_valid() {
                checkpoint
            } else {
                LogInstant::make(self.chain.first_file_number(), LOG_FILE_HEADER_SIZE)
            }
        };
        Ok(ForwardScan::open(&self.chain, start, limit)?.with_cipher(self.cipher.clone()))
    }

    /// Opens a backward scan whose first record is the one at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupt or the start file is gone.
    pub fn open_backward_scan(&self, start: LogInstant) -> LogResult<BackwardScan<'_>> {
        self.check_corrupt()?;
        Ok(BackwardScan::open_at(&self.chain, start)?.with_cipher(self.cipher.clone()))
    }

    /// Latches the corrupt flag and returns the error every subsequent
    /// operation will fail with. Only the first cause is kept.
    pub fn mark_corrupt(&self, cause: &str) -> LogError {
        let mut latch = self.corrupt.lock();
        if latch.is_none() {
            *latch = Some(cause.to_owned());
            tracing::error!(cause, "log marked corrupt");
            // drop the writer without flushing; its buffers are suspect
            self.state.lock().writer = None;
            self.data.mark_corrupt(cause);
        }
        LogError::store_corrupt(latch.as_deref().unwrap_or(cause))
    }

    pub(crate) fn check_corrupt(&self) -> LogResult<()> {
        match self.corrupt.lock().as_deref() {
            Some(cause) => Err(LogError::store_corrupt(cause)),
            None => Ok(()),
        }
    }

    /// Returns `true` once the corrupt flag has latched.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        self.corrupt.lock().is_some()
    }

    /// Returns `true` if the log was opened, or fell back to, read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Address the next record will be logged at.
    #[must_use]
    pub fn end_instant(&self) -> LogInstant {
        let state = self.state.lock();
        LogInstant::make(state.file_number, state.end_position)
    }

    /// High-water mark of durable log.
    #[must_use]
    pub fn flushed_instant(&self) -> LogInstant {
        self.state.lock().last_flush
    }

    /// Address of the most recent completed checkpoint record.
    #[must_use]
    pub fn checkpoint_instant(&self) -> LogInstant {
        self.state.lock().checkpoint_instant
    }

    pub(crate) fn set_checkpoint_instant(&self, instant: LogInstant) {
        self.state.lock().checkpoint_instant = instant;
    }

    fn encode_body(&self, record: &LogRecord) -> LogResult<Vec<u8>> {
        match (&self.cipher, record.payload()) {
            (Some(cipher), Some(payload)) if !payload.is_empty() => {
                let mut sealed = record.clone();
                match &mut sealed.body {
                    LogRecordBody::Operation { payload }
                    | LogRecordBody::Compensation { payload, .. } => {
                        *payload = cipher.encrypt(payload)?;
                    }
                    _ => {}
                }
                sealed.encode()
            }
            _ => record.encode(),
        }
    }

    fn spawn_daemon(self: &Arc<Self>) -> LogResult<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("log-checkpoint".to_owned())
            .spawn(move || loop {
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                if engine.stop_daemon.load(Ordering::SeqCst) {
                    break;
                }
                // ours may be the last reference once the owner is gone
                if Arc::strong_count(&engine) == 1 {
                    break;
                }
                let due = {
                    let mut state = engine.state.lock();
                    if !state.checkpoint_due {
                        engine
                            .cond
                            .wait_for(&mut state, DAEMON_POLL);
                    }
                    state.checkpoint_due && !state.checkpoint_in_progress
                };
                if due && !engine.stop_daemon.load(Ordering::SeqCst) {
                    if let Err(err) = engine.checkpoint(true) {
                        tracing::error!(error = %err, "background checkpoint failed");
                    }
                }
            })?;
        *self.daemon.lock() = Some(handle);
        Ok(())
    }

    /// Shuts the engine down: takes a final checkpoint, stops the
    /// checkpoint daemon, and flushes the log. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush or checkpoint fails.
    pub fn shutdown(&self) -> LogResult<()> {
        self.stop_daemon.store(true, Ordering::SeqCst);
        self.cond.notify_all();
        if let Some(handle) = self.daemon.lock().take() {
            let _ = handle.join();
        }

        if self.is_corrupt() || self.is_read_only() {
            return Ok(());
        }
        self.flush(LogInstant::INVALID)?;
        self.checkpoint(true)?;
        tracing::info!("log shut down cleanly");
        Ok(())
    }
}

impl Drop for LogEngine {
    fn drop(&mut self) {
        // the daemon holds only a weak reference; wake it so it exits
        self.stop_daemon.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }
}
