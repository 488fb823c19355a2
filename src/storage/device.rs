//! Storage device boundary
//!
//! A `StorageDevice` is the removable card as seen by the session: it can be
//! brought up and down, probed for presence, and offers a flat path-based file
//! API. Paths handed to a device are always absolute and normalized
//! (`/dir/file`, root is `/`).

use std::io;
use thiserror::Error;

/// Errors reported by a storage device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No card in the slot (or the card stopped answering)
    #[error("no card present")]
    NoCard,
    /// Device has not been started with `begin`
    #[error("device not started")]
    NotStarted,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    /// Not enough free space for the write
    #[error("card full")]
    Full,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Kind of card reported by the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    None,
    Mmc,
    Sd,
    Sdhc,
    Unknown,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Mmc => "MMC",
            Self::Sd => "SD",
            Self::Sdhc => "SDHC",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// One entry returned by a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name without its parent path
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

/// How `write` treats an existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace existing content
    Truncate,
    /// Add to the end of existing content
    Append,
}

/// A block storage device with a hierarchical file API
pub trait StorageDevice: Send {
    /// Bring the card up under `mount_point`
    fn begin(&mut self, mount_point: &str, one_bit_mode: bool) -> Result<(), DeviceError>;

    /// Release the card
    fn end(&mut self);

    /// Probe the slot for a card without changing the started state
    fn detect_card(&mut self) -> bool;

    /// Card type while started, `CardType::None` otherwise
    fn card_type(&self) -> CardType;

    fn total_bytes(&self) -> u64;

    fn used_bytes(&self) -> u64;

    fn exists(&self, path: &str) -> bool;

    fn is_dir(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> Result<Vec<u8>, DeviceError>;

    /// Length of a file in bytes
    fn file_len(&self, path: &str) -> Result<u64, DeviceError>;

    /// Read into `buf` starting `offset` bytes into the file.
    ///
    /// Returns the number of bytes read, 0 at or past the end.
    fn read_at(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Write `data` to `path`, creating the file if needed.
    ///
    /// Returns the number of bytes written.
    fn write(&mut self, path: &str, data: &[u8], mode: WriteMode) -> Result<usize, DeviceError>;

    fn remove(&mut self, path: &str) -> Result<(), DeviceError>;

    fn rename(&mut self, from: &str, to: &str) -> Result<(), DeviceError>;

    fn mkdir(&mut self, path: &str) -> Result<(), DeviceError>;

    /// Remove an empty directory
    fn rmdir(&mut self, path: &str) -> Result<(), DeviceError>;

    fn list(&self, path: &str) -> Result<Vec<DirEntry>, DeviceError>;
}

/// Parent directory of a normalized absolute path (`/` for top-level entries)
pub(crate) fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Join a normalized directory path and an entry name
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}
