//! Log engine configuration.

use std::path::PathBuf;
use tidelog_storage::DurabilityMode;

/// Default log switch interval: 1 MiB.
pub const DEFAULT_LOG_SWITCH_INTERVAL: u64 = 1024 * 1024;

/// Default checkpoint interval: 10 MiB.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10 * 1024 * 1024;

/// Lower clamp for the switch and checkpoint intervals: 100 KB.
pub const MIN_INTERVAL: u64 = 100_000;

/// Upper clamp for the switch and checkpoint intervals: 128 MiB.
pub const MAX_INTERVAL: u64 = 128 * 1024 * 1024;

/// Default write buffer size: 32 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Lower clamp for the write buffer size: 8 KiB.
pub const MIN_BUFFER_SIZE: usize = 8 * 1024;

/// Upper clamp for the write buffer size: 128 MiB.
pub const MAX_BUFFER_SIZE: usize = 128 * 1024 * 1024;

/// Default number of write buffers.
pub const DEFAULT_BUFFER_COUNT: usize = 3;

/// Configuration for the log engine.
///
/// # Example
///
/// ```rust
/// use tidelog_core::LogConfig;
///
/// let config = LogConfig::new()
///     .with_log_switch_interval(4 * 1024 * 1024)
///     .with_buffer_size(64 * 1024)
///     .with_keep_all_logs(true);
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log file size at which a checkpoint rotates to a new file.
    pub log_switch_interval: u64,

    /// Bytes written to the log between automatic checkpoints.
    pub checkpoint_interval: u64,

    /// Size of each write buffer in bytes.
    pub buffer_size: usize,

    /// Number of write buffers. At least one.
    pub buffer_count: usize,

    /// Never delete old log files, even after a checkpoint.
    pub keep_all_logs: bool,

    /// Skip syncing log writes to disk. Faster, but a crash may lose
    /// committed transactions; only safe when the store is disposable.
    pub no_sync: bool,

    /// Durability mode for log file writes.
    ///
    /// [`DurabilityMode::WriteSync`] makes every log write durable as it
    /// happens; [`DurabilityMode::ExplicitSync`] defers durability to the
    /// flush path's explicit sync.
    pub durability: DurabilityMode,

    /// Directory to keep log files in, overriding the default location
    /// under the store directory.
    pub log_device: Option<PathBuf>,

    /// Open the log read-only. Recovery must not be needed.
    pub read_only: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_switch_interval: DEFAULT_LOG_SWITCH_INTERVAL,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_count: DEFAULT_BUFFER_COUNT,
            keep_all_logs: false,
            no_sync: false,
            durability: DurabilityMode::ExplicitSync,
            log_device: None,
            read_only: false,
        }
    }
}

impl LogConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log switch interval, clamped to `[100 KB, 128 MiB]`.
    #[must_use]
    pub fn with_log_switch_interval(mut self, bytes: u64) -> Self {
        self.log_switch_interval = bytes.clamp(MIN_INTERVAL, MAX_INTERVAL);
        self
    }

    /// Sets the checkpoint interval, clamped to `[100 KB, 128 MiB]`.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, bytes: u64) -> Self {
        self.checkpoint_interval = bytes.clamp(MIN_INTERVAL, MAX_INTERVAL);
        self
    }

    /// Sets the write buffer size, clamped to `[8 KiB, 128 MiB]`.
    #[must_use]
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self
    }

    /// Sets the number of write buffers, at least one.
    #[must_use]
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count.max(1);
        self
    }

    /// Keeps every log file instead of truncating at checkpoints.
    #[must_use]
    pub fn with_keep_all_logs(mut self, keep: bool) -> Self {
        self.keep_all_logs = keep;
        self
    }

    /// Disables syncing of log writes.
    #[must_use]
    pub fn with_no_sync(mut self, no_sync: bool) -> Self {
        self.no_sync = no_sync;
        self
    }

    /// Sets the durability mode for log file writes.
    #[must_use]
    pub fn with_durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Places log files in the given directory.
    #[must_use]
    pub fn with_log_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_device = Some(path.into());
        self
    }

    /// Opens the log read-only.
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}
