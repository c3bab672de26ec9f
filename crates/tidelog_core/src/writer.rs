//! Buffered log writer.
//!
//! Records are staged in a small fixed pool of buffers before being
//! written to the current log file. Each buffer begins with space reserved
//! for a checksum record; when the buffer is sealed, a CRC32 over the rest
//! of the buffer is written into that space, so every stretch of flushed
//! bytes is preceded by a record that vouches for it. A record too large
//! for a buffer is written directly to the file behind its own checksum
//! record.
//!
//! Buffer indices move between a free queue and a dirty queue. Only one
//! thread drains the dirty queue at a time; a drain also picks up buffers
//! that become dirty while it runs, bounded by the pool size so the
//! draining thread cannot be captured indefinitely.
//!
//! The writer does not allocate log addresses. The engine owns position
//! accounting and calls [`LogWriter::reserve_space`] before every append
//! so that checksum records consume address space at the right point.

use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::record::{LogRecord, CHECKSUM_RECORD_SIZE, LOG_RECORD_OVERHEAD};
use crate::types::compute_crc32;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;
use tidelog_storage::StorageBackend;

const WRITE_RETRIES: u32 = 5;
const SYNC_RETRIES: u32 = 20;
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(200);

struct LogBuffer {
    bytes: Vec<u8>,
    len: usize,
    /// Address reserved for this buffer's checksum record; invalid while
    /// the buffer is fresh.
    checksum_instant: LogInstant,
}

impl LogBuffer {
    fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            len: 0,
            checksum_instant: LogInstant::INVALID,
        }
    }

    fn reset(&mut self) {
        self.len = 0;
        self.checksum_instant = LogInstant::INVALID;
    }
}

struct PoolState {
    buffers: Vec<LogBuffer>,
    free: VecDeque<usize>,
    dirty: VecDeque<usize>,
    current: usize,
    flush_in_progress: bool,
    /// Set when the next append must bypass the buffers; holds the
    /// address reserved for the preceding checksum record.
    pending_direct: Option<LogInstant>,
}

struct FileState {
    backend: Box<dyn StorageBackend>,
    /// Next write offset in the file. May lie below the file size when
    /// recovery zero-filled a torn tail; writes then overwrite in place.
    position: u64,
}

/// Buffered writer over the current log file.
///
/// Thread safe; append-side calls are expected to be serialized by the
/// engine, while flushing may proceed concurrently from any thread.
pub struct LogWriter {
    pool: Mutex<PoolState>,
    pool_cond: Condvar,
    file: Mutex<FileState>,
    buffer_size: usize,
    no_sync: bool,
}

impl LogWriter {
    /// Creates a writer over `backend`, positioned at `position`.
    #[must_use]
    pub fn new(
        backend: Box<dyn StorageBackend>,
        position: u64,
        buffer_size: usize,
        buffer_count: usize,
        no_sync: bool,
    ) -> Self {
        let buffer_count = buffer_count.max(1);
        let buffers = (0..buffer_count).map(|_| LogBuffer::new(buffer_size)).collect();
        let free = (1..buffer_count).collect();

        Self {
            pool: Mutex::new(PoolState {
                buffers,
                free,
                dirty: VecDeque::new(),
                current: 0,
                flush_in_progress: false,
                pending_direct: None,
            }),
            pool_cond: Condvar::new(),
            file: Mutex::new(FileState { backend, position }),
            buffer_size,
            no_sync,
        }
    }

    /// Returns the next write offset in the current file.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.file.lock().position
    }

    /// Points the writer at a new file. All buffers must have been
    /// flushed first.
    pub fn replace_file(&self, backend: Box<dyn StorageBackend>, position: u64) {
        let mut file = self.file.lock();
        file.backend = backend;
        file.position = position;
    }

    /// Ensures buffer space for a record of `total_len` on-disk bytes.
    ///
    /// Must be called before [`LogWriter::append`] with the engine's
    /// current end position. Returns the number of address-space bytes
    /// consumed by a newly reserved checksum record: the engine advances
    /// its end position by this amount before computing the record's
    /// instant.
    ///
    /// # Errors
    ///
    /// Returns an error if sealed buffers cannot be flushed to make room.
    pub fn reserve_space(
        &self,
        total_len: u64,
        file_number: u64,
        end_position: u64,
    ) -> LogResult<u64> {
        let checksum_at = LogInstant::make(file_number, end_position);

        if total_len + CHECKSUM_RECORD_SIZE > self.buffer_size as u64 {
            // too big to buffer; seal what we have and go direct
            self.switch_current()?;
            self.pool.lock().pending_direct = Some(checksum_at);
            return Ok(CHECKSUM_RECORD_SIZE);
        }

        {
            let mut pool = self.pool.lock();
            let current = pool.current;
            let cur = &mut pool.buffers[current];
            if cur.checksum_instant.is_invalid() {
                Self::reserve_checksum(cur, checksum_at);
                return Ok(CHECKSUM_RECORD_SIZE);
            }
            if cur.len as u64 + total_len <= self.buffer_size as u64 {
                return Ok(0);
            }
        }

        self.switch_current()?;
        let mut pool = self.pool.lock();
        let current = pool.current;
        let cur = &mut pool.buffers[current];
        debug_assert!(cur.checksum_instant.is_invalid());
        Self::reserve_checksum(cur, checksum_at);
        Ok(CHECKSUM_RECORD_SIZE)
    }

    /// Appends a record body at the address allocated for it.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ZeroLengthRecord`] for an empty body, or an
    /// error if a direct write to the file fails.
    pub fn append(&self, instant: LogInstant, body: &[u8]) -> LogResult<()> {
        if body.is_empty() {
            return Err(LogError::ZeroLengthRecord);
        }
        let pending = {
            let mut pool = self.pool.lock();
            pool.pending_direct.take()
        };
        if let Some(checksum_at) = pending {
            return self.write_direct(checksum_at, instant, body);
        }

        let wrapped = Self::wrap(instant, body);
        let mut pool = self.pool.lock();
        let current = pool.current;
        let cur = &mut pool.buffers[current];
        debug_assert!(cur.checksum_instant.is_valid());
        debug_assert!(cur.len + wrapped.len() <= self.buffer_size);
        cur.bytes[cur.len..cur.len + wrapped.len()].copy_from_slice(&wrapped);
        cur.len += wrapped.len();
        Ok(())
    }

    /// Seals the current buffer and writes every sealed buffer to the
    /// file. Does not sync.
    ///
    /// # Errors
    ///
    /// Returns an error if a file write fails.
    pub fn flush_all(&self) -> LogResult<()> {
        self.switch_current()?;
        self.flush_dirty_buffers()
    }

    /// Syncs the file to stable storage, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::LogFull`] when the sync keeps failing.
    pub fn sync(&self) -> LogResult<()> {
        if self.no_sync {
            return Ok(());
        }
        let file = self.file.lock();
        for attempt in 1..=SYNC_RETRIES {
            match file.backend.sync() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "log sync failed, retrying");
                    thread::sleep(SYNC_RETRY_DELAY);
                }
            }
        }
        Err(LogError::LogFull)
    }

    /// Writes the zero end marker at the current position.
    ///
    /// The marker is not counted in the engine's end position; the next
    /// append to this file overwrites it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_end_marker(&self) -> LogResult<()> {
        let marker = 0u32.to_le_bytes();
        self.write_to_file(&marker)?;
        // step back so a later append lands on the marker
        self.file.lock().position -= marker.len() as u64;
        Ok(())
    }

    fn reserve_checksum(buffer: &mut LogBuffer, at: LogInstant) {
        debug_assert_eq!(buffer.len, 0);
        buffer.checksum_instant = at;
        buffer.len = CHECKSUM_RECORD_SIZE as usize;
    }

    fn wrap(instant: LogInstant, body: &[u8]) -> Vec<u8> {
        let len = body.len() as u32;
        let mut buf = Vec::with_capacity(LOG_RECORD_OVERHEAD as usize + body.len());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&instant.as_u64().to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&len.to_le_bytes());
        buf
    }

    /// Seals the current buffer into the dirty queue and installs a fresh
    /// one. A buffer holding nothing beyond its checksum reservation is
    /// left in place.
    fn switch_current(&self) -> LogResult<()> {
        let mut pool = self.pool.lock();
        if !Self::seal_current(&mut pool)? {
            return Ok(());
        }
        self.pool_cond.notify_all();

        loop {
            if let Some(index) = pool.free.pop_front() {
                pool.current = index;
                return Ok(());
            }
            if pool.flush_in_progress {
                self.pool_cond.wait(&mut pool);
            } else {
                drop(pool);
                self.flush_dirty_buffers()?;
                pool = self.pool.lock();
            }
        }
    }

    fn seal_current(pool: &mut PoolState) -> LogResult<bool> {
        let current = pool.current;
        let buffer = &mut pool.buffers[current];
        if buffer.len <= CHECKSUM_RECORD_SIZE as usize {
            return Ok(false);
        }

        let covered = &buffer.bytes[CHECKSUM_RECORD_SIZE as usize..buffer.len];
        let record = LogRecord::checksum(compute_crc32(covered), covered.len() as u32);
        let wrapped = Self::wrap(buffer.checksum_instant, &record.encode()?);
        debug_assert_eq!(wrapped.len() as u64, CHECKSUM_RECORD_SIZE);
        buffer.bytes[..wrapped.len()].copy_from_slice(&wrapped);

        pool.dirty.push_back(current);
        Ok(true)
    }

    /// Drains the dirty queue to the file. Single flusher: a second
    /// caller waits for the first to finish. Buffers sealed while the
    /// drain runs are picked up too, at most one pool's worth.
    fn flush_dirty_buffers(&self) -> LogResult<()> {
        let mut pool = self.pool.lock();
        while pool.flush_in_progress {
            self.pool_cond.wait(&mut pool);
        }
        pool.flush_in_progress = true;
        let limit = pool.buffers.len();

        let mut flushed = 0;
        let result = loop {
            let Some(index) = pool.dirty.pop_front() else {
                break Ok(());
            };
            let len = pool.buffers[index].len;
            let bytes = std::mem::take(&mut pool.buffers[index].bytes);

            drop(pool);
            let write_result = self.write_to_file(&bytes[..len]);
            pool = self.pool.lock();

            let buffer = &mut pool.buffers[index];
            buffer.bytes = bytes;
            buffer.reset();
            pool.free.push_back(index);
            self.pool_cond.notify_all();

            if let Err(err) = write_result {
                break Err(err);
            }
            flushed += 1;
            if flushed >= limit {
                break Ok(());
            }
        };

        pool.flush_in_progress = false;
        self.pool_cond.notify_all();
        result
    }

    fn write_direct(
        &self,
        checksum_at: LogInstant,
        instant: LogInstant,
        body: &[u8],
    ) -> LogResult<()> {
        self.flush_dirty_buffers()?;

        let wrapped = Self::wrap(instant, body);
        let record = LogRecord::checksum(compute_crc32(&wrapped), wrapped.len() as u32);
        let checksum_bytes = Self::wrap(checksum_at, &record.encode()?);

        self.write_to_file(&checksum_bytes)?;
        self.write_to_file(&wrapped)
    }

    /// Writes bytes at the current file position, retrying transient
    /// failures. Overwrites zero-filled tail bytes in place and appends
    /// past the end of the file.
    fn write_to_file(&self, bytes: &[u8]) -> LogResult<()> {
        let mut file = self.file.lock();
        let mut attempt = 1;
        loop {
            match Self::write_at_position(file.backend.as_ref(), file.position, bytes) {
                Ok(()) => {
                    file.position += bytes.len() as u64;
                    return Ok(());
                }
                Err(err) if attempt < WRITE_RETRIES => {
                    tracing::warn!(attempt, error = %err, "log write failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn write_at_position(
        backend: &dyn StorageBackend,
        position: u64,
        bytes: &[u8],
    ) -> LogResult<()> {
        let size = backend.size()?;
        if position > size {
            return Err(LogError::corruption(
                "log write position beyond end of file",
            ));
        }
        let overlap = ((size - position) as usize).min(bytes.len());
        if overlap > 0 {
            backend.write_at(position, &bytes[..overlap])?;
        }
        if overlap < bytes.len() {
            backend.append(&bytes[overlap..])?;
        }
        Ok(())
    }
}
