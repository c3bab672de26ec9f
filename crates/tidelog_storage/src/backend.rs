//! Storage backend trait definition.

use crate::error::StorageResult;

/// Durability behavior of a backend's write path.
///
/// Log writers historically choose between opening the file in a
/// write-through mode, where every write reaches stable storage before the
/// call returns, and a buffered mode where durability requires an explicit
/// [`StorageBackend::sync`] call. Backends that cannot provide true
/// write-through degrade gracefully by syncing after each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Writes are buffered; durability requires an explicit `sync`.
    ExplicitSync,
    /// Every write is pushed to stable storage before returning.
    WriteSync,
}

/// A low-level storage backend for tidelog.
///
/// Storage backends are **opaque byte stores**. They provide simple
/// operations for reading, appending, overwriting, and flushing data. The
/// log engine owns all file format interpretation - backends do not
/// understand log records, file headers, or checkpoints.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` never extends the store; it only overwrites existing bytes
/// - `sync` ensures all previously written data is durable
/// - Backends must be `Send + Sync` for concurrent access; all methods take
///   `&self` and synchronize internally
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The offset is beyond the current size
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites `data.len()` bytes starting at `offset`.
    ///
    /// The write must lie entirely within the current size; `write_at`
    /// never grows the store. The log engine uses this to zero-fill a
    /// fuzzy log tail after a crash and to rewrite control data in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the write extends beyond the current size or an
    /// I/O error occurs.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes to the operating system.
    ///
    /// This pushes buffered bytes to the OS but does not guarantee they
    /// reached stable storage; call [`StorageBackend::sync`] for that.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;

    /// Syncs all data to durable storage.
    ///
    /// After this returns successfully, all previously written data is
    /// guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the storage to the given size.
    ///
    /// This removes all data after the specified offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails or `new_size` is greater
    /// than the current size.
    fn truncate(&self, new_size: u64) -> StorageResult<()>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        (**self).append(data)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        (**self).write_at(offset, data)
    }

    fn flush(&self) -> StorageResult<()> {
        (**self).flush()
    }

    fn sync(&self) -> StorageResult<()> {
        (**self).sync()
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        (**self).truncate(new_size)
    }
}
