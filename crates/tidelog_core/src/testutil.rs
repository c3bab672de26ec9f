//! Shared test doubles and fixtures.

use crate::chain::{FileChain, MemDevice, LOG_FILE_HEADER_SIZE};
use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::ops::{DataStore, LogOperation, OperationDecoder};
use crate::record::{ByteReader, LogRecord, LOG_RECORD_OVERHEAD};
use crate::types::TransactionId;
use crate::writer::LogWriter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A chain plus a writer, driving the same reserve/append protocol the
/// engine uses, so scan and recovery tests can lay down real log bytes.
pub(crate) struct LogHarness {
    pub chain: FileChain,
    pub writer: LogWriter,
    pub file_number: u64,
    pub end: u64,
}

impl LogHarness {
    pub fn new() -> Self {
        Self::with_buffer(4096, 2)
    }

    pub fn with_buffer(buffer_size: usize, buffer_count: usize) -> Self {
        let chain = FileChain::new(Arc::new(MemDevice::new()));
        let backend = chain.create_log_file(1, LogInstant::INVALID).unwrap();
        let writer = LogWriter::new(backend, LOG_FILE_HEADER_SIZE, buffer_size, buffer_count, true);
        Self {
            chain,
            writer,
            file_number: 1,
            end: LOG_FILE_HEADER_SIZE,
        }
    }

    pub fn append(&mut self, record: &LogRecord) -> LogInstant {
        let body = record.encode().unwrap();
        let total = LOG_RECORD_OVERHEAD + body.len() as u64;
        let reserved = self
            .writer
            .reserve_space(total, self.file_number, self.end)
            .unwrap();
        self.end += reserved;
        let instant = LogInstant::make(self.file_number, self.end);
        self.writer.append(instant, &body).unwrap();
        self.end += total;
        instant
    }

    pub fn flush(&self) {
        self.writer.flush_all().unwrap();
        self.chain
            .set_flushed(LogInstant::make(self.file_number, self.end));
    }

    pub fn switch_file(&mut self) {
        self.writer.flush_all().unwrap();
        self.writer.write_end_marker().unwrap();
        let prev_end = LogInstant::make(self.file_number, self.end);
        let backend = self
            .chain
            .create_log_file(self.file_number + 1, prev_end)
            .unwrap();
        self.writer.replace_file(backend, LOG_FILE_HEADER_SIZE);
        self.file_number += 1;
        self.end = LOG_FILE_HEADER_SIZE;
        self.chain
            .set_flushed(LogInstant::make(self.file_number, self.end));
    }

    pub fn op(txid: u64, flags: u32, fill: u8) -> LogRecord {
        LogRecord::operation(TransactionId::new(txid), flags, vec![fill; 8])
    }
}

/// Records every callback the log engine makes into the store.
#[derive(Default)]
pub(crate) struct TestStore {
    pub redone: Mutex<Vec<(u64, LogInstant)>>,
    pub undone: Mutex<Vec<(u64, LogInstant)>>,
    pub reprepared: Mutex<Vec<u64>>,
    pub checkpoints: AtomicUsize,
    pub stub_removals: Mutex<Vec<LogInstant>>,
    pub post_recovery_done: AtomicBool,
    pub corrupt_cause: Mutex<Option<String>>,
    pub fail_checkpoint: AtomicBool,
    pub fail_stub_removal: AtomicBool,
    /// Operation ids the store claims to hold already; `needs_redo`
    /// answers false for these.
    pub applied: Mutex<Vec<u64>>,
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn redone_ids(&self) -> Vec<u64> {
        self.redone.lock().iter().map(|(id, _)| *id).collect()
    }

    pub fn undone_ids(&self) -> Vec<u64> {
        self.undone.lock().iter().map(|(id, _)| *id).collect()
    }
}

impl DataStore for TestStore {
    fn checkpoint(&self) -> LogResult<()> {
        if self.fail_checkpoint.load(Ordering::SeqCst) {
            return Err(LogError::corruption("injected checkpoint failure"));
        }
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_recovery(&self) -> LogResult<()> {
        self.post_recovery_done.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn remove_dropped_stubs(&self, instant: LogInstant) -> LogResult<()> {
        if self.fail_stub_removal.load(Ordering::SeqCst) {
            return Err(LogError::corruption("injected stub removal failure"));
        }
        self.stub_removals.lock().push(instant);
        Ok(())
    }

    fn mark_corrupt(&self, cause: &str) {
        let mut latch = self.corrupt_cause.lock();
        if latch.is_none() {
            *latch = Some(cause.to_owned());
        }
    }
}

/// An operation whose payload is `[id u64][undoable u8]`; effects are
/// recorded into the [`TestStore`] the decoder was built with.
pub(crate) struct TestOp {
    pub id: u64,
    pub undoable: bool,
    store: Arc<TestStore>,
}

pub(crate) fn op_payload(id: u64, undoable: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.extend_from_slice(&id.to_le_bytes());
    buf.push(u8::from(undoable));
    buf
}

impl LogOperation for TestOp {
    fn needs_redo(&self, _data: &dyn DataStore) -> LogResult<bool> {
        Ok(!self.store.applied.lock().contains(&self.id))
    }

    fn redo(&self, _data: &dyn DataStore, instant: LogInstant) -> LogResult<()> {
        self.store.redone.lock().push((self.id, instant));
        Ok(())
    }

    fn undoable(&self) -> bool {
        self.undoable
    }

    fn undo_payload(&self) -> LogResult<Vec<u8>> {
        Ok(op_payload(self.id, self.undoable))
    }

    fn undo(&self, _data: &dyn DataStore, clr_instant: LogInstant) -> LogResult<()> {
        self.store.undone.lock().push((self.id, clr_instant));
        Ok(())
    }

    fn reprepare(&self, _data: &dyn DataStore) -> LogResult<()> {
        self.store.reprepared.lock().push(self.id);
        Ok(())
    }
}

pub(crate) struct TestDecoder {
    store: Arc<TestStore>,
}

impl TestDecoder {
    pub fn new(store: Arc<TestStore>) -> Self {
        Self { store }
    }
}

impl OperationDecoder for TestDecoder {
    fn decode(&self, payload: &[u8]) -> LogResult<Box<dyn LogOperation>> {
        let mut r = ByteReader::new(payload);
        let id = r.read_u64()?;
        let undoable = r.read_u8()? != 0;
        Ok(Box::new(TestOp {
            id,
            undoable,
            store: Arc::clone(&self.store),
        }))
    }
}
