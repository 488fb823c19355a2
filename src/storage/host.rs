//! Host directory acting as a card
//!
//! The card root is a directory on the host filesystem; the card counts as
//! inserted while that directory exists. Useful for running scripts from a
//! USB stick or any folder on a development machine.

use super::device::{CardType, DeviceError, DirEntry, StorageDevice, WriteMode};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Reported capacity when the host cannot tell us: 4 GiB
pub const DEFAULT_CAPACITY: u64 = 4 * 1024 * 1024 * 1024;

/// A card backed by a host directory
#[derive(Debug, Clone)]
pub struct HostDirCard {
    root: PathBuf,
    capacity: u64,
    started: bool,
}

impl HostDirCard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity: DEFAULT_CAPACITY,
            started: false,
        }
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn ready(&self) -> Result<(), DeviceError> {
        if !self.root.is_dir() {
            Err(DeviceError::NoCard)
        } else if !self.started {
            Err(DeviceError::NotStarted)
        } else {
            Ok(())
        }
    }

    fn map_io(path: &str, e: io::Error) -> DeviceError {
        match e.kind() {
            io::ErrorKind::NotFound => DeviceError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => DeviceError::AlreadyExists(path.to_string()),
            _ => DeviceError::Io(e),
        }
    }
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => dir_size(&entry.path()),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}

impl StorageDevice for HostDirCard {
    fn begin(&mut self, _mount_point: &str, _one_bit_mode: bool) -> Result<(), DeviceError> {
        if !self.root.is_dir() {
            return Err(DeviceError::NoCard);
        }
        self.started = true;
        Ok(())
    }

    fn end(&mut self) {
        self.started = false;
    }

    fn detect_card(&mut self) -> bool {
        self.root.is_dir()
    }

    fn card_type(&self) -> CardType {
        if self.ready().is_ok() {
            CardType::Sd
        } else {
            CardType::None
        }
    }

    fn total_bytes(&self) -> u64 {
        self.capacity
    }

    fn used_bytes(&self) -> u64 {
        dir_size(&self.root)
    }

    fn exists(&self, path: &str) -> bool {
        self.ready().is_ok() && self.host_path(path).exists()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.ready().is_ok() && self.host_path(path).is_dir()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
        self.ready()?;
        let host = self.host_path(path);
        if host.is_dir() {
            return Err(DeviceError::IsADirectory(path.to_string()));
        }
        fs::read(host).map_err(|e| Self::map_io(path, e))
    }

    fn file_len(&self, path: &str) -> Result<u64, DeviceError> {
        self.ready()?;
        let meta = fs::metadata(self.host_path(path)).map_err(|e| Self::map_io(path, e))?;
        if meta.is_dir() {
            return Err(DeviceError::IsADirectory(path.to_string()));
        }
        Ok(meta.len())
    }

    fn read_at(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        self.ready()?;
        let host = self.host_path(path);
        if host.is_dir() {
            return Err(DeviceError::IsADirectory(path.to_string()));
        }
        let mut file = File::open(&host).map_err(|e| Self::map_io(path, e))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    fn write(&mut self, path: &str, data: &[u8], mode: WriteMode) -> Result<usize, DeviceError> {
        self.ready()?;
        let host = self.host_path(path);
        if host.is_dir() {
            return Err(DeviceError::IsADirectory(path.to_string()));
        }
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            WriteMode::Truncate => options.write(true).truncate(true),
            WriteMode::Append => options.append(true),
        };
        let mut file = options.open(&host).map_err(|e| Self::map_io(path, e))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn remove(&mut self, path: &str) -> Result<(), DeviceError> {
        self.ready()?;
        let host = self.host_path(path);
        if host.is_dir() {
            return Err(DeviceError::IsADirectory(path.to_string()));
        }
        fs::remove_file(host).map_err(|e| Self::map_io(path, e))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), DeviceError> {
        self.ready()?;
        let target = self.host_path(to);
        if target.exists() {
            return Err(DeviceError::AlreadyExists(to.to_string()));
        }
        fs::rename(self.host_path(from), target).map_err(|e| Self::map_io(from, e))
    }

    fn mkdir(&mut self, path: &str) -> Result<(), DeviceError> {
        self.ready()?;
        fs::create_dir(self.host_path(path)).map_err(|e| Self::map_io(path, e))
    }

    fn rmdir(&mut self, path: &str) -> Result<(), DeviceError> {
        self.ready()?;
        let host = self.host_path(path);
        if !host.is_dir() {
            return if host.exists() {
                Err(DeviceError::NotADirectory(path.to_string()))
            } else {
                Err(DeviceError::NotFound(path.to_string()))
            };
        }
        if fs::read_dir(&host)?.next().is_some() {
            return Err(DeviceError::DirectoryNotEmpty(path.to_string()));
        }
        fs::remove_dir(host).map_err(|e| Self::map_io(path, e))
    }

    fn list(&self, path: &str) -> Result<Vec<DirEntry>, DeviceError> {
        self.ready()?;
        let host = self.host_path(path);
        if !host.is_dir() {
            return if host.exists() {
                Err(DeviceError::NotADirectory(path.to_string()))
            } else {
                Err(DeviceError::NotFound(path.to_string()))
            };
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&host)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
