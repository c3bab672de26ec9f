//! Control file.
//!
//! A small fixed-size file recording where the most recent checkpoint
//! lives, so boot can find it without scanning. It is written twice, as
//! `log.ctrl` and `logmirror.ctrl`, in that order; a crash can tear at
//! most one copy, and reading prefers whichever copy validates.

use crate::chain::LogDevice;
use crate::error::{LogError, LogResult};
use crate::instant::LogInstant;
use crate::record::ByteReader;
use crate::types::compute_crc32;

/// Name of the primary control file.
pub const CONTROL_FILE: &str = "log.ctrl";

/// Name of the mirror control file.
pub const CONTROL_MIRROR_FILE: &str = "logmirror.ctrl";

/// Size of the control file payload.
pub const CONTROL_FILE_SIZE: usize = 48;

/// Magic bytes at the start of a control file.
pub const CONTROL_MAGIC: u32 = u32::from_le_bytes(*b"TLCF");

/// Current control file format version.
pub const CONTROL_VERSION: u32 = 1;

/// Flag bit: the writing engine was a pre-release build.
pub const FLAG_BETA: u8 = 0x1;

/// Flag bit: the log was running with sync disabled.
pub const FLAG_NO_SYNC: u8 = 0x2;

const ENGINE_MAJOR: u32 = 0;
const ENGINE_MINOR: u32 = 3;
const ENGINE_BUILD: u32 = 0;

/// Decoded control file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlData {
    /// Address of the most recent completed checkpoint record.
    pub last_checkpoint: LogInstant,
    /// Engine version that wrote the file: (major, minor, build).
    pub version: (u32, u32, u32),
    /// Flag bits.
    pub flags: u8,
}

impl ControlData {
    /// Creates control data for the current engine version.
    #[must_use]
    pub fn new(last_checkpoint: LogInstant, no_sync: bool) -> Self {
        let mut flags = 0;
        if no_sync {
            flags |= FLAG_NO_SYNC;
        }
        Self {
            last_checkpoint,
            version: (ENGINE_MAJOR, ENGINE_MINOR, ENGINE_BUILD),
            flags,
        }
    }

    /// Encodes the control file payload.
    #[must_use]
    pub fn encode(&self) -> [u8; CONTROL_FILE_SIZE] {
        let mut buf = [0u8; CONTROL_FILE_SIZE];
        buf[0..4].copy_from_slice(&CONTROL_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&CONTROL_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.last_checkpoint.as_u64().to_le_bytes());
        buf[16..20].copy_from_slice(&self.version.0.to_le_bytes());
        buf[20..24].copy_from_slice(&self.version.1.to_le_bytes());
        buf[24..28].copy_from_slice(&self.version.2.to_le_bytes());
        buf[28] = self.flags;
        // bytes 29..40 are spare
        let checksum = u64::from(compute_crc32(&buf[0..40]));
        buf[40..48].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decodes and validates a control file payload.
    ///
    /// A zero stored checksum is accepted for files written by engines
    /// that predate the checksum field.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is short, the magic or version is
    /// wrong, or the checksum does not verify.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        if bytes.len() < CONTROL_FILE_SIZE {
            return Err(LogError::corruption("control file too short"));
        }

        let mut r = ByteReader::new(&bytes[..CONTROL_FILE_SIZE]);
        let magic = r.read_u32()?;
        if magic != CONTROL_MAGIC {
            return Err(LogError::corruption("bad control file magic"));
        }
        let version = r.read_u32()?;
        if version != CONTROL_VERSION {
            return Err(LogError::unsupported(format!(
                "control file format version {version}"
            )));
        }
        let last_checkpoint = LogInstant::from_u64(r.read_u64()?);
        let major = r.read_u32()?;
        let minor = r.read_u32()?;
        let build = r.read_u32()?;
        let flags = r.read_u8()?;
        r.read_bytes(3)?;
        r.read_u64()?;
        let stored = r.read_u64()?;

        if stored != 0 {
            let computed = u64::from(compute_crc32(&bytes[0..40]));
            if stored != computed {
                return Err(LogError::corruption("control file checksum mismatch"));
            }
        }

        Ok(Self {
            last_checkpoint,
            version: (major, minor, build),
            flags,
        })
    }
}

/// Writes both control file copies, primary first, each synced.
///
/// # Errors
///
/// Returns an error if either copy cannot be written.
pub(crate) fn write_control_files(device: &dyn LogDevice, data: &ControlData) -> LogResult<()> {
    let bytes = data.encode();
    for name in [CONTROL_FILE, CONTROL_MIRROR_FILE] {
        let backend = device.create(name)?;
        backend.append(&bytes)?;
        backend.sync()?;
    }
    Ok(())
}

/// Reads the control data, preferring the primary copy and falling back
/// to the mirror if the primary is missing or invalid.
///
/// Returns `None` when neither copy exists, which means the log has never
/// been created.
///
/// # Errors
///
/// Returns an error if copies exist but neither validates.
pub(crate) fn read_control_files(device: &dyn LogDevice) -> LogResult<Option<ControlData>> {
    let mut any_present = false;
    let mut first_error = None;

    for name in [CONTROL_FILE, CONTROL_MIRROR_FILE] {
        if !device.exists(name) {
            continue;
        }
        any_present = true;
        match read_one(device, name) {
            Ok(data) => return Ok(Some(data)),
            Err(err) => {
                tracing::warn!(file = name, error = %err, "control file copy invalid");
                first_error.get_or_insert(err);
            }
        }
    }

    if !any_present {
        return Ok(None);
    }
    Err(first_error.unwrap_or_else(|| LogError::corruption("no valid control file")))
}

fn read_one(device: &dyn LogDevice, name: &str) -> LogResult<ControlData> {
    let backend = device.open(name)?;
    let size = backend.size()? as usize;
    if size < CONTROL_FILE_SIZE {
        return Err(LogError::corruption("control file too short"));
    }
    let bytes = backend.read_at(0, CONTROL_FILE_SIZE)?;
    ControlData::decode(&bytes)
}
