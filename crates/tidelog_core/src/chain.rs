//! Log file chain: devices, file naming, and file headers.
//!
//! The log is a chain of numbered files, `log1.dat`, `log2.dat`, and so
//! on. Each starts with a fixed header linking back to the end of the
//! previous file so a backward scan can cross file boundaries. A
//! [`LogDevice`] abstracts where the files live; the engine and scans go
//! through a shared [`FileChain`] which also tracks which files still
//! exist and how far the log has been flushed.

use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::record::ByteReader;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidelog_storage::{DurabilityMode, FileBackend, InMemoryBackend, StorageBackend};

/// Size of the header at the start of every log file.
pub const LOG_FILE_HEADER_SIZE: u64 = 24;

/// Magic bytes at the start of every log file.
pub const LOG_FILE_MAGIC: u32 = u32::from_le_bytes(*b"TLOG");

/// Current log file format version.
pub const LOG_FILE_VERSION: u32 = 1;

/// Name of the lock file guarding exclusive access to a log directory.
pub const LOCK_FILE: &str = "log.lck";

/// A place log files live.
///
/// Files are named, flat, and opaque; the chain layers numbering and
/// headers on top.
pub trait LogDevice: Send + Sync {
    /// Opens an existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    fn open(&self, name: &str) -> LogResult<Box<dyn StorageBackend>>;

    /// Creates a file, truncating any existing file of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    fn create(&self, name: &str) -> LogResult<Box<dyn StorageBackend>>;

    /// Deletes a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be deleted.
    fn delete(&self, name: &str) -> LogResult<()>;

    /// Returns `true` if the file exists.
    fn exists(&self, name: &str) -> bool;

    /// Lists all file names on the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be listed.
    fn list(&self) -> LogResult<Vec<String>>;
}

/// A [`LogDevice`] backed by a directory on the file system.
///
/// Opening the device takes an advisory lock on a `log.lck` file so two
/// processes cannot write the same log.
#[derive(Debug)]
pub struct DirDevice {
    dir: PathBuf,
    durability: DurabilityMode,
    _lock: Option<fs::File>,
}

impl DirDevice {
    /// Opens (creating if needed) a log directory with exclusive access.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Locked`] if another process holds the lock, or
    /// an I/O error if the directory cannot be created.
    pub fn open(dir: &Path, durability: DurabilityMode) -> LogResult<Self> {
        fs::create_dir_all(dir)?;
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|_| LogError::Locked)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            durability,
            _lock: Some(lock),
        })
    }

    /// Opens an existing log directory without taking the lock.
    ///
    /// Intended for read-only access.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist.
    pub fn open_read_only(dir: &Path) -> LogResult<Self> {
        if !dir.is_dir() {
            return Err(LogError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("log directory {} not found", dir.display()),
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            durability: DurabilityMode::ExplicitSync,
            _lock: None,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LogDevice for DirDevice {
    fn open(&self, name: &str) -> LogResult<Box<dyn StorageBackend>> {
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(LogError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("log file {name} not found"),
            )));
        }
        let backend = FileBackend::open_with_mode(&path, self.durability)?;
        Ok(Box::new(backend))
    }

    fn create(&self, name: &str) -> LogResult<Box<dyn StorageBackend>> {
        let path = self.dir.join(name);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        let backend = FileBackend::open_with_mode(&path, self.durability)?;
        Ok(Box::new(backend))
    }

    fn delete(&self, name: &str) -> LogResult<()> {
        let path = self.dir.join(name);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.dir.join(name).is_file()
    }

    fn list(&self) -> LogResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

/// An in-memory [`LogDevice`] for tests.
///
/// All opens of the same name share one backing store, so a writer and a
/// scanner observe each other's bytes just as they would through a file
/// system.
#[derive(Debug, Default)]
pub struct MemDevice {
    files: Mutex<HashMap<String, Arc<InMemoryBackend>>>,
}

impl MemDevice {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogDevice for MemDevice {
    fn open(&self, name: &str) -> LogResult<Box<dyn StorageBackend>> {
        let files = self.files.lock();
        match files.get(name) {
            Some(backend) => Ok(Box::new(Arc::clone(backend))),
            None => Err(LogError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("log file {name} not found"),
            ))),
        }
    }

    fn create(&self, name: &str) -> LogResult<Box<dyn StorageBackend>> {
        let backend = Arc::new(InMemoryBackend::new());
        self.files
            .lock()
            .insert(name.to_string(), Arc::clone(&backend));
        Ok(Box::new(backend))
    }

    fn delete(&self, name: &str) -> LogResult<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn list(&self) -> LogResult<Vec<String>> {
        Ok(self.files.lock().keys().cloned().collect())
    }
}

/// Decoded log file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFileHeader {
    /// Number of this log file.
    pub file_number: u64,
    /// End of the previous log file, or invalid for the first file.
    pub prev_end: LogInstant,
}

impl LogFileHeader {
    fn encode(&self) -> [u8; LOG_FILE_HEADER_SIZE as usize] {
        let mut buf = [0u8; LOG_FILE_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&LOG_FILE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&LOG_FILE_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.file_number.to_le_bytes());
        buf[16..24].copy_from_slice(&self.prev_end.as_u64().to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> LogResult<Self> {
        let mut r = ByteReader::new(bytes);
        let magic = r.read_u32()?;
        if magic != LOG_FILE_MAGIC {
            return Err(LogError::corruption("bad log file magic"));
        }
        let version = r.read_u32()?;
        if version != LOG_FILE_VERSION {
            return Err(LogError::unsupported(format!(
                "log file format version {version}"
            )));
        }
        let file_number = r.read_u64()?;
        let prev_end = LogInstant::from_u64(r.read_u64()?);
        Ok(Self {
            file_number,
            prev_end,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ChainInfo {
    first_file: u64,
    last_file: u64,
    flushed: LogInstant,
}

/// Shared view of the log file chain.
pub struct FileChain {
    device: Arc<dyn LogDevice>,
    info: Mutex<ChainInfo>,
}

impl FileChain {
    /// Creates a chain over the given device. The engine sets the file
    /// range and flushed mark during boot.
    #[must_use]
    pub fn new(device: Arc<dyn LogDevice>) -> Self {
        Self {
            device,
            info: Mutex::new(ChainInfo {
                first_file: 0,
                last_file: 0,
                flushed: LogInstant::INVALID,
            }),
        }
    }

    /// Returns the underlying device.
    #[must_use]
    pub fn device(&self) -> &dyn LogDevice {
        self.device.as_ref()
    }

    /// Returns the on-device name of a log file.
    #[must_use]
    pub fn log_file_name(file_number: u64) -> String {
        format!("log{file_number}.dat")
    }

    /// Parses a log file name back into its number.
    #[must_use]
    pub fn parse_log_file_name(name: &str) -> Option<u64> {
        let stem = name.strip_prefix("log")?.strip_suffix(".dat")?;
        stem.parse().ok().filter(|&n| n > 0)
    }

    /// Lists the numbers of all log files on the device, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be listed.
    pub fn list_log_files(&self) -> LogResult<Vec<u64>> {
        let mut numbers: Vec<u64> = self
            .device
            .list()?
            .iter()
            .filter_map(|name| Self::parse_log_file_name(name))
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Returns `true` if the given log file exists.
    #[must_use]
    pub fn file_exists(&self, file_number: u64) -> bool {
        self.device.exists(&Self::log_file_name(file_number))
    }

    /// Creates a new log file with its header written and synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn create_log_file(
        &self,
        file_number: u64,
        prev_end: LogInstant,
    ) -> LogResult<Box<dyn StorageBackend>> {
        let backend = self.device.create(&Self::log_file_name(file_number))?;
        let header = LogFileHeader {
            file_number,
            prev_end,
        };
        backend.append(&header.encode())?;
        backend.sync()?;

        let mut info = self.info.lock();
        if info.first_file == 0 {
            info.first_file = file_number;
        }
        info.last_file = info.last_file.max(file_number);
        Ok(backend)
    }

    /// Opens an existing log file and validates its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is below the first retained file, is
    /// missing, or has an invalid header.
    pub fn open_log_file(&self, file_number: u64) -> LogResult<Box<dyn StorageBackend>> {
        {
            let info = self.info.lock();
            if file_number < info.first_file {
                return Err(LogError::unsupported(format!(
                    "log file {file_number} has been truncated away (first retained is {})",
                    info.first_file
                )));
            }
        }
        let backend = self.device.open(&Self::log_file_name(file_number))?;
        let header = Self::read_header(backend.as_ref())?;
        if header.file_number != file_number {
            return Err(LogError::corruption(format!(
                "log file {file_number} claims to be file {}",
                header.file_number
            )));
        }
        Ok(backend)
    }

    /// Reads and validates a log file header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is short or malformed.
    pub fn read_header(backend: &dyn StorageBackend) -> LogResult<LogFileHeader> {
        if backend.size()? < LOG_FILE_HEADER_SIZE {
            return Err(LogError::corruption("log file shorter than its header"));
        }
        let bytes = backend.read_at(0, LOG_FILE_HEADER_SIZE as usize)?;
        LogFileHeader::decode(&bytes)
    }

    /// Deletes all log files numbered below `file_number`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be deleted.
    pub fn delete_files_below(&self, file_number: u64) -> LogResult<()> {
        let mut info = self.info.lock();
        while info.first_file != 0 && info.first_file < file_number {
            let name = Self::log_file_name(info.first_file);
            self.device.delete(&name)?;
            tracing::debug!(file = %name, "deleted log file");
            info.first_file += 1;
        }
        Ok(())
    }

    /// Sets the range of files present on the device.
    pub fn set_range(&self, first_file: u64, last_file: u64) {
        let mut info = self.info.lock();
        info.first_file = first_file;
        info.last_file = last_file;
    }

    /// Lowest numbered log file still on the device.
    #[must_use]
    pub fn first_file_number(&self) -> u64 {
        self.info.lock().first_file
    }

    /// Highest numbered log file on the device.
    #[must_use]
    pub fn last_file_number(&self) -> u64 {
        self.info.lock().last_file
    }

    /// Records how far the log is known to be flushed.
    pub fn set_flushed(&self, instant: LogInstant) {
        let mut info = self.info.lock();
        if instant > info.flushed {
            info.flushed = instant;
        }
    }

    /// Returns the flushed high-water mark.
    #[must_use]
    pub fn flushed_end(&self) -> LogInstant {
        self.info.lock().flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_name_roundtrip() {
        assert_eq!(FileChain::log_file_name(7), "log7.dat");
        assert_eq!(FileChain::parse_log_file_name("log7.dat"), Some(7));
        assert_eq!(FileChain::parse_log_file_name("log.ctrl"), None);
        assert_eq!(FileChain::parse_log_file_name("log0.dat"), None);
        assert_eq!(FileChain::parse_log_file_name("logx.dat"), None);
    }

    #[test]
    fn create_and_reopen_log_file() {
        let chain = FileChain::new(Arc::new(MemDevice::new()));
        let prev = LogInstant::make(1, 4000);
        chain.create_log_file(2, prev).unwrap();

        let backend = chain.open_log_file(2).unwrap();
        let header = FileChain::read_header(backend.as_ref()).unwrap();
        assert_eq!(header.file_number, 2);
        assert_eq!(header.prev_end, prev);
    }

    #[test]
    fn header_mismatch_rejected() {
        let device = Arc::new(MemDevice::new());
        let chain = FileChain::new(Arc::clone(&device) as Arc<dyn LogDevice>);
        chain.create_log_file(2, LogInstant::INVALID).unwrap();

        // rename file 2 to file 3 by copying its bytes
        let original = device.open("log2.dat").unwrap();
        let bytes = original.read_at(0, original.size().unwrap() as usize).unwrap();
        let copy = device.create("log3.dat").unwrap();
        copy.append(&bytes).unwrap();

        assert!(matches!(
            chain.open_log_file(3),
            Err(LogError::Corruption { .. })
        ));
    }

    #[test]
    fn list_and_delete_below() {
        let chain = FileChain::new(Arc::new(MemDevice::new()));
        for n in 1..=4 {
            chain.create_log_file(n, LogInstant::INVALID).unwrap();
        }
        assert_eq!(chain.list_log_files().unwrap(), vec![1, 2, 3, 4]);

        chain.delete_files_below(3).unwrap();
        assert_eq!(chain.list_log_files().unwrap(), vec![3, 4]);
        assert_eq!(chain.first_file_number(), 3);

        assert!(matches!(
            chain.open_log_file(2),
            Err(LogError::Unsupported { .. })
        ));
    }

    #[test]
    fn flushed_mark_is_monotonic() {
        let chain = FileChain::new(Arc::new(MemDevice::new()));
        chain.set_flushed(LogInstant::make(1, 100));
        chain.set_flushed(LogInstant::make(1, 50));
        assert_eq!(chain.flushed_end(), LogInstant::make(1, 100));
    }

    #[test]
    fn dir_device_locks_directory() {
        let dir = tempdir().unwrap();
        let first = DirDevice::open(dir.path(), DurabilityMode::ExplicitSync).unwrap();
        assert!(matches!(
            DirDevice::open(dir.path(), DurabilityMode::ExplicitSync),
            Err(LogError::Locked)
        ));
        drop(first);
    }

    #[test]
    fn dir_device_file_operations() {
        let dir = tempdir().unwrap();
        let device = DirDevice::open(dir.path(), DurabilityMode::ExplicitSync).unwrap();

        let backend = device.create("log1.dat").unwrap();
        backend.append(b"abc").unwrap();
        assert!(device.exists("log1.dat"));

        let reopened = device.open("log1.dat").unwrap();
        assert_eq!(reopened.read_at(0, 3).unwrap(), b"abc");

        device.delete("log1.dat").unwrap();
        assert!(!device.exists("log1.dat"));
        assert!(device.open("log1.dat").is_err());
    }
}
