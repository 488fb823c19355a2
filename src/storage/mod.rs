//! Removable storage session
//!
//! `StorageSession` owns the mount lifecycle of one removable card: mounting
//! and unmounting, a current working directory, the last error, and hot-plug
//! detection with optional auto-mount. File and directory operations resolve
//! relative paths against the current directory and fail with a numbered
//! error while the card is not mounted.
//!
//! ## Example
//!
//! ```
//! use duckydeck::clock::ManualClock;
//! use duckydeck::storage::{MemoryCard, StorageSession};
//!
//! let card = MemoryCard::new();
//! let mut session = StorageSession::new(Box::new(card.clone()), Box::new(ManualClock::new()));
//!
//! assert!(session.mount(false, "/sdcard", true));
//! session.write_file("hello.txt", b"hi").unwrap();
//! assert_eq!(session.read_file("/hello.txt").unwrap(), b"hi");
//! ```

pub mod device;
pub mod diagnostics;
mod handle;
pub mod host;
pub mod memory;

pub use device::{CardType, DeviceError, DirEntry, StorageDevice, WriteMode};
pub use handle::FileHandle;
pub use host::HostDirCard;
pub use memory::MemoryCard;

use crate::clock::Clock;
use crate::config::StorageConfig;
use device::join;
use handle::HandleTable;
use log::{debug, error, info, warn};
use thiserror::Error;

/// Minimum time between two hot-swap probes
pub const HOT_SWAP_INTERVAL_MS: u64 = 200;
/// Wait after an insertion before auto-mounting
pub const INSERT_SETTLE_MS: u64 = 200;
/// Pause between unmount and mount in `remount`
pub const REMOUNT_PAUSE_MS: u64 = 100;
/// Sector size reported for every card
pub const BLOCK_SIZE: u32 = 512;
/// Root enumeration cap used by `check`
const CHECK_ENTRY_LIMIT: usize = 10_000;

/// Numbered error codes recorded by the session
pub mod codes {
    pub const MOUNT_FAILED: i32 = 4;
    pub const UNMOUNT_NOT_MOUNTED: i32 = 5;
    pub const FORMAT_NOT_MOUNTED: i32 = 6;
    pub const FORMAT_ROOT_FAILED: i32 = 7;
    pub const CHECK_NOT_MOUNTED: i32 = 8;
    pub const CHECK_ROOT_FAILED: i32 = 9;
    pub const CHECK_ROOT_NOT_DIR: i32 = 10;
    pub const OPEN_NOT_MOUNTED: i32 = 11;
    pub const OPEN_FAILED: i32 = 12;
    /// Close, read or directory walk on a handle that is not open
    pub const CLOSE_INVALID: i32 = 13;
    pub const WRITE_FAILED: i32 = 14;
    pub const APPEND_FAILED: i32 = 15;
    pub const DELETE_NOT_MOUNTED: i32 = 16;
    pub const DELETE_FAILED: i32 = 17;
    pub const RENAME_NOT_MOUNTED: i32 = 18;
    pub const RENAME_FAILED: i32 = 19;
    pub const COPY_FAILED: i32 = 20;
    pub const MKDIR_NOT_MOUNTED: i32 = 21;
    pub const MKDIR_FAILED: i32 = 22;
    pub const RMDIR_NOT_MOUNTED: i32 = 23;
    pub const RMDIR_FAILED: i32 = 24;
    pub const RMDIR_RECURSIVE_NOT_MOUNTED: i32 = 25;
    pub const LIST_NOT_MOUNTED: i32 = 26;
    pub const LIST_NOT_DIR: i32 = 27;
    pub const NAMES_NOT_MOUNTED: i32 = 28;
    pub const NAMES_NOT_DIR: i32 = 29;
    pub const DIR_NOT_MOUNTED: i32 = 30;
    pub const DIR_NOT_DIR: i32 = 31;
    pub const CHDIR_NOT_MOUNTED: i32 = 32;
    pub const CHDIR_NOT_DIR: i32 = 33;
    pub const SEEK_INVALID: i32 = 34;
    pub const SEEK_FAILED: i32 = 35;
    pub const TELL_INVALID: i32 = 36;
    pub const TRUNCATE_NOT_MOUNTED: i32 = 37;
    pub const TRUNCATE_OPEN_FAILED: i32 = 38;
    pub const TRUNCATE_WRITE_FAILED: i32 = 39;
}

/// Category of a session error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No mounted card, including a card that vanished mid-operation
    NotMounted,
    MountFailed,
    NotFound,
    NotADirectory,
    /// Any other failure reported by the device
    Device,
}

/// An error recorded by the session: numbered code plus message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error {code}: {message}")]
pub struct SessionError {
    pub code: i32,
    pub kind: ErrorKind,
    pub message: String,
}

/// Event hook fired by the session
pub type Callback = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct Callbacks {
    on_mount: Option<Callback>,
    on_unmount: Option<Callback>,
    on_card_inserted: Option<Callback>,
    on_card_removed: Option<Callback>,
}

fn fire(callback: &mut Option<Callback>) {
    if let Some(cb) = callback.as_mut() {
        cb();
    }
}

/// Resolve `path` against `current_dir` and normalize it.
///
/// Absolute paths ignore `current_dir`. Empty and `.` segments are dropped and
/// `..` climbs one level (never above root). The result has no trailing slash
/// except for the root itself.
pub fn resolve_path(current_dir: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}{}", current_dir, path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Mount and file session over one removable card
pub struct StorageSession {
    device: Box<dyn StorageDevice>,
    clock: Box<dyn Clock>,
    mounted: bool,
    mount_point: String,
    one_bit_mode: bool,
    current_dir: String,
    last_error: Option<SessionError>,
    auto_mount_enabled: bool,
    hot_swap_enabled: bool,
    debug_mode: bool,
    last_card_present: bool,
    last_hot_swap_check: Option<u64>,
    callbacks: Callbacks,
    handles: HandleTable,
}

impl StorageSession {
    /// Create an unmounted session over `device`
    pub fn new(device: Box<dyn StorageDevice>, clock: Box<dyn Clock>) -> Self {
        Self {
            device,
            clock,
            mounted: false,
            mount_point: "/sdcard".to_string(),
            one_bit_mode: true,
            current_dir: "/".to_string(),
            last_error: None,
            auto_mount_enabled: false,
            hot_swap_enabled: false,
            debug_mode: false,
            last_card_present: false,
            last_hot_swap_check: None,
            callbacks: Callbacks::default(),
            handles: HandleTable::default(),
        }
    }

    /// Create a session with mount settings and flags taken from `config`
    pub fn from_config(
        device: Box<dyn StorageDevice>,
        clock: Box<dyn Clock>,
        config: &StorageConfig,
    ) -> Self {
        let mut session = Self::new(device, clock);
        session.mount_point = config.mount_point.clone();
        session.one_bit_mode = config.one_bit_mode;
        session.auto_mount_enabled = config.auto_mount;
        session.hot_swap_enabled = config.hot_swap;
        session.debug_mode = config.debug;
        session
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Mount the card. Returns true immediately if already mounted.
    pub fn mount(&mut self, format_if_failed: bool, mount_point: &str, one_bit_mode: bool) -> bool {
        if self.mounted {
            debug!("mount requested while already mounted at {}", self.mount_point);
            self.clear_error();
            return true;
        }

        self.clear_error();
        self.mount_point = mount_point.to_string();
        self.one_bit_mode = one_bit_mode;

        info!("Initializing SD card at {} (1-bit: {})", mount_point, one_bit_mode);
        if let Err(e) = self.device.begin(mount_point, one_bit_mode) {
            let message = if format_if_failed {
                format!(
                    "SD card mount failed, format not attempted (card may be unformatted): {}",
                    e
                )
            } else {
                format!("SD card mount failed: {}", e)
            };
            self.set_error(codes::MOUNT_FAILED, ErrorKind::MountFailed, message);
            return false;
        }

        self.mounted = true;
        self.current_dir = "/".to_string();
        self.last_card_present = true;
        info!(
            "SD card mounted. Total: {:.2} MB, Used: {:.2} MB",
            self.total_bytes() as f64 / 1_048_576.0,
            self.used_bytes() as f64 / 1_048_576.0
        );

        fire(&mut self.callbacks.on_mount);
        true
    }

    /// Unmount the card. Fails when nothing is mounted.
    pub fn unmount(&mut self) -> bool {
        if !self.mounted {
            self.set_error(
                codes::UNMOUNT_NOT_MOUNTED,
                ErrorKind::NotMounted,
                "SD card not mounted".to_string(),
            );
            return false;
        }

        self.clear_error();
        self.close_all_handles();
        self.device.end();
        self.mounted = false;
        self.current_dir = "/".to_string();
        info!("SD card unmounted");

        fire(&mut self.callbacks.on_unmount);
        true
    }

    /// Unmount (if mounted), pause, and mount again with the last settings
    pub fn remount(&mut self) -> bool {
        info!("Remounting SD card");
        if self.mounted {
            self.unmount();
            self.clock.sleep_ms(REMOUNT_PAUSE_MS);
        }
        let mount_point = self.mount_point.clone();
        self.mount(false, &mount_point, self.one_bit_mode)
    }

    /// Mount with the remembered settings if auto-mount is enabled
    pub fn auto_mount(&mut self) {
        if self.auto_mount_enabled && !self.mounted {
            info!("Auto-mounting SD card");
            let mount_point = self.mount_point.clone();
            self.mount(false, &mount_point, self.one_bit_mode);
        }
    }

    /// Delete every file and directory on the card
    pub fn format(&mut self) -> bool {
        if !self.mounted {
            self.set_error(
                codes::FORMAT_NOT_MOUNTED,
                ErrorKind::NotMounted,
                "SD card must be mounted to format".to_string(),
            );
            return false;
        }

        warn!("Formatting SD card (deleting all files)");
        let entries = match self.device.list("/") {
            Ok(entries) => entries,
            Err(e) => {
                let err = self.device_error(codes::FORMAT_ROOT_FAILED, "Failed to open root directory", e);
                self.record(err);
                return false;
            }
        };

        for entry in entries {
            let path = join("/", &entry.name);
            let result = if entry.is_dir {
                self.delete_tree(&path)
            } else {
                self.device.remove(&path)
            };
            if let Err(e) = result {
                warn!("Failed to delete {}: {}", path, e);
            }
        }

        self.current_dir = "/".to_string();
        self.clear_error();
        info!("Format complete");
        true
    }

    /// Enumerate the root directory as a basic integrity check
    pub fn check(&mut self) -> bool {
        if !self.mounted {
            self.set_error(
                codes::CHECK_NOT_MOUNTED,
                ErrorKind::NotMounted,
                "SD card not mounted".to_string(),
            );
            return false;
        }
        if !self.device.is_dir("/") {
            let (code, msg) = if self.device.exists("/") {
                (codes::CHECK_ROOT_NOT_DIR, "Root is not a directory")
            } else {
                (codes::CHECK_ROOT_FAILED, "Failed to open root directory")
            };
            self.set_error(code, ErrorKind::Device, msg.to_string());
            return false;
        }
        match self.device.list("/") {
            Ok(entries) => {
                let count = entries.len().min(CHECK_ENTRY_LIMIT);
                info!("Check passed - {} items in root", count);
                self.clear_error();
                true
            }
            Err(e) => {
                let err = self.device_error(codes::CHECK_ROOT_FAILED, "Failed to open root directory", e);
                self.record(err);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Hot-plug
    // ------------------------------------------------------------------

    /// Poll for card insertion/removal. Call this every tick.
    ///
    /// Probes at most once per `HOT_SWAP_INTERVAL_MS`. A removal while mounted
    /// forces an unmount; an insertion fires the inserted callback and, with
    /// auto-mount enabled, makes one mount attempt after a settle delay.
    pub fn check_hot_swap(&mut self) {
        if !self.hot_swap_enabled {
            return;
        }

        let now = self.clock.now_ms();
        if let Some(last) = self.last_hot_swap_check {
            if now.saturating_sub(last) < HOT_SWAP_INTERVAL_MS {
                return;
            }
        }
        self.last_hot_swap_check = Some(now);

        let present = self.card_present();
        if self.debug_mode {
            debug!(
                "hot-swap probe: present={} last={} mounted={}",
                present, self.last_card_present, self.mounted
            );
        }

        match (self.last_card_present, present) {
            (true, false) => {
                warn!("SD card removed");
                if self.mounted {
                    self.close_all_handles();
                    self.device.end();
                    self.mounted = false;
                    self.current_dir = "/".to_string();
                    fire(&mut self.callbacks.on_unmount);
                }
                self.last_card_present = false;
                fire(&mut self.callbacks.on_card_removed);
            }
            (false, true) => {
                info!("SD card inserted");
                self.last_card_present = true;
                fire(&mut self.callbacks.on_card_inserted);
                if self.auto_mount_enabled && !self.mounted {
                    self.clock.sleep_ms(INSERT_SETTLE_MS);
                    info!("Auto-mounting inserted card");
                    let mount_point = self.mount_point.clone();
                    if !self.mount(false, &mount_point, self.one_bit_mode) {
                        error!("Auto-mount after insertion failed");
                    }
                }
            }
            _ => {}
        }
    }

    fn close_all_handles(&mut self) {
        let dropped = self.handles.invalidate_all();
        if dropped > 0 {
            warn!("{} open handle(s) invalidated", dropped);
        }
    }

    fn card_present(&mut self) -> bool {
        if self.mounted {
            self.device.card_type() != CardType::None && self.device.is_dir("/")
        } else {
            self.device.detect_card()
        }
    }

    pub fn is_inserted(&mut self) -> bool {
        self.card_present()
    }

    pub fn is_removed(&mut self) -> bool {
        !self.card_present()
    }

    pub fn on_mount(&mut self, callback: impl FnMut() + Send + 'static) {
        self.callbacks.on_mount = Some(Box::new(callback));
    }

    pub fn on_unmount(&mut self, callback: impl FnMut() + Send + 'static) {
        self.callbacks.on_unmount = Some(Box::new(callback));
    }

    pub fn on_card_inserted(&mut self, callback: impl FnMut() + Send + 'static) {
        self.callbacks.on_card_inserted = Some(Box::new(callback));
    }

    pub fn on_card_removed(&mut self, callback: impl FnMut() + Send + 'static) {
        self.callbacks.on_card_removed = Some(Box::new(callback));
    }

    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn one_bit_mode(&self) -> bool {
        self.one_bit_mode
    }

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    /// Code of the last error, 0 after a successful operation
    pub fn error_code(&self) -> i32 {
        self.last_error.as_ref().map_or(0, |e| e.code)
    }

    /// Message of the last error, empty after a successful operation
    pub fn last_error_message(&self) -> &str {
        self.last_error.as_ref().map_or("", |e| e.message.as_str())
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn enable_auto_mount(&mut self, enable: bool) {
        self.auto_mount_enabled = enable;
    }

    pub fn is_auto_mount_enabled(&self) -> bool {
        self.auto_mount_enabled
    }

    pub fn enable_hot_swap_detection(&mut self, enable: bool) {
        self.hot_swap_enabled = enable;
    }

    pub fn is_hot_swap_enabled(&self) -> bool {
        self.hot_swap_enabled
    }

    pub fn set_debug_mode(&mut self, enable: bool) {
        self.debug_mode = enable;
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ------------------------------------------------------------------
    // Filesystem info
    // ------------------------------------------------------------------

    pub fn fs_type(&self) -> &'static str {
        if !self.mounted {
            return CardType::None.as_str();
        }
        self.device.card_type().as_str()
    }

    pub fn fs_label(&self) -> &str {
        if self.mounted {
            &self.mount_point
        } else {
            ""
        }
    }

    pub fn block_size(&self) -> u32 {
        if self.mounted {
            BLOCK_SIZE
        } else {
            0
        }
    }

    pub fn sector_count(&self) -> u64 {
        self.total_bytes() / BLOCK_SIZE as u64
    }

    pub fn total_bytes(&self) -> u64 {
        if self.mounted {
            self.device.total_bytes()
        } else {
            0
        }
    }

    pub fn used_bytes(&self) -> u64 {
        if self.mounted {
            self.device.used_bytes()
        } else {
            0
        }
    }

    pub fn free_bytes(&self) -> u64 {
        self.total_bytes().saturating_sub(self.used_bytes())
    }

    // ------------------------------------------------------------------
    // File operations
    // ------------------------------------------------------------------

    /// Absolute, normalized form of `path` relative to the current directory
    pub fn full_path(&self, path: &str) -> String {
        resolve_path(&self.current_dir, path)
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, SessionError> {
        self.require_mounted(codes::OPEN_NOT_MOUNTED)?;
        let full = self.full_path(path);
        let result = self.device.read(&full);
        match result {
            Ok(data) => {
                self.clear_error();
                Ok(data)
            }
            Err(e) => self.fail_device(codes::OPEN_FAILED, &format!("Failed to open file: {}", full), e),
        }
    }

    /// Read a file as UTF-8 text (invalid sequences are replaced)
    pub fn read_to_string(&mut self, path: &str) -> Result<String, SessionError> {
        self.read_file(path)
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    /// Read up to `buf.len()` bytes from the start of a file
    pub fn read_into(&mut self, path: &str, buf: &mut [u8]) -> Result<usize, SessionError> {
        let handle = self.open_file(path)?;
        let result = self.read(handle, buf);
        self.release(handle);
        result
    }

    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), SessionError> {
        self.write_with(path, data, WriteMode::Truncate, codes::WRITE_FAILED)
    }

    pub fn append_file(&mut self, path: &str, data: &[u8]) -> Result<(), SessionError> {
        self.write_with(path, data, WriteMode::Append, codes::APPEND_FAILED)
    }

    fn write_with(
        &mut self,
        path: &str,
        data: &[u8],
        mode: WriteMode,
        code: i32,
    ) -> Result<(), SessionError> {
        self.require_mounted(codes::OPEN_NOT_MOUNTED)?;
        let full = self.full_path(path);
        let result = self.device.write(&full, data, mode);
        match result {
            Ok(written) if written == data.len() => {
                self.clear_error();
                Ok(())
            }
            Ok(written) => self.fail(
                code,
                ErrorKind::Device,
                format!("Write size mismatch: {} of {} bytes", written, data.len()),
            ),
            Err(e) => self.fail_device(code, &format!("Failed to write {}", full), e),
        }
    }

    /// Shrink a file to `size` bytes. Files already that small are untouched.
    pub fn truncate_file(&mut self, path: &str, size: usize) -> Result<(), SessionError> {
        self.require_mounted(codes::TRUNCATE_NOT_MOUNTED)?;
        let full = self.full_path(path);
        let data = match self.device.read(&full) {
            Ok(data) => data,
            Err(e) => {
                return self.fail_device(
                    codes::TRUNCATE_OPEN_FAILED,
                    "Failed to open source file for truncate",
                    e,
                )
            }
        };
        if data.len() > size {
            if let Err(e) = self.device.write(&full, &data[..size], WriteMode::Truncate) {
                return self.fail_device(codes::TRUNCATE_WRITE_FAILED, "Failed to rewrite truncated file", e);
            }
        }
        self.clear_error();
        Ok(())
    }

    pub fn delete_file(&mut self, path: &str) -> Result<(), SessionError> {
        self.require_mounted(codes::DELETE_NOT_MOUNTED)?;
        let full = self.full_path(path);
        match self.device.remove(&full) {
            Ok(()) => {
                self.clear_error();
                Ok(())
            }
            Err(e) => self.fail_device(codes::DELETE_FAILED, &format!("Failed to delete: {}", full), e),
        }
    }

    pub fn rename_file(&mut self, old_path: &str, new_path: &str) -> Result<(), SessionError> {
        self.require_mounted(codes::RENAME_NOT_MOUNTED)?;
        let from = self.full_path(old_path);
        let to = self.full_path(new_path);
        match self.device.rename(&from, &to) {
            Ok(()) => {
                self.clear_error();
                Ok(())
            }
            Err(e) => self.fail_device(codes::RENAME_FAILED, "Rename failed", e),
        }
    }

    pub fn copy_file(&mut self, src: &str, dst: &str) -> Result<(), SessionError> {
        let data = self.read_file(src)?;
        let full = self.full_path(dst);
        match self.device.write(&full, &data, WriteMode::Truncate) {
            Ok(written) if written == data.len() => {
                self.clear_error();
                Ok(())
            }
            Ok(_) => self.fail(codes::COPY_FAILED, ErrorKind::Device, "Copy incomplete".to_string()),
            Err(e) => self.fail_device(codes::COPY_FAILED, "Copy failed", e),
        }
    }

    pub fn move_file(&mut self, src: &str, dst: &str) -> Result<(), SessionError> {
        self.copy_file(src, dst)?;
        self.delete_file(src)
    }

    /// Whether `path` exists. Records a not-mounted error while unmounted.
    pub fn exists(&mut self, path: &str) -> bool {
        if self.require_mounted(codes::OPEN_NOT_MOUNTED).is_err() {
            return false;
        }
        let full = self.full_path(path);
        self.clear_error();
        self.device.exists(&full)
    }

    pub fn file_size(&mut self, path: &str) -> Result<u64, SessionError> {
        let handle = self.open_file(path)?;
        let result = self.size(handle);
        self.release(handle);
        result
    }

    // ------------------------------------------------------------------
    // Directory operations
    // ------------------------------------------------------------------

    pub fn mkdir(&mut self, path: &str) -> Result<(), SessionError> {
        self.require_mounted(codes::MKDIR_NOT_MOUNTED)?;
        let full = self.full_path(path);
        match self.device.mkdir(&full) {
            Ok(()) => {
                self.clear_error();
                Ok(())
            }
            Err(e) => self.fail_device(
                codes::MKDIR_FAILED,
                &format!("Failed to create directory: {}", full),
                e,
            ),
        }
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), SessionError> {
        self.require_mounted(codes::RMDIR_NOT_MOUNTED)?;
        let full = self.full_path(path);
        match self.device.rmdir(&full) {
            Ok(()) => {
                self.clear_error();
                Ok(())
            }
            Err(e) => self.fail_device(
                codes::RMDIR_FAILED,
                &format!("Failed to remove directory: {}", full),
                e,
            ),
        }
    }

    /// Remove a directory and everything below it
    pub fn rmdir_recursive(&mut self, path: &str) -> Result<(), SessionError> {
        self.require_mounted(codes::RMDIR_RECURSIVE_NOT_MOUNTED)?;
        let full = self.full_path(path);
        match self.delete_tree(&full) {
            Ok(()) => {
                self.clear_error();
                Ok(())
            }
            Err(e) => self.fail_device(
                codes::RMDIR_FAILED,
                &format!("Failed to remove directory: {}", full),
                e,
            ),
        }
    }

    fn delete_tree(&mut self, dir: &str) -> Result<(), DeviceError> {
        for entry in self.device.list(dir)? {
            let path = join(dir, &entry.name);
            if entry.is_dir {
                self.delete_tree(&path)?;
            } else {
                self.device.remove(&path)?;
            }
        }
        self.device.rmdir(dir)
    }

    /// Human-readable listing: `DIR : name` and `FILE: name (N bytes)` lines.
    ///
    /// Recursive listings name nested entries relative to `path`.
    pub fn list_dir(&mut self, path: &str, recursive: bool) -> Result<String, SessionError> {
        self.require_mounted(codes::LIST_NOT_MOUNTED)?;
        let full = self.full_path(path);
        if !self.device.is_dir(&full) {
            return self.fail(
                codes::LIST_NOT_DIR,
                ErrorKind::NotADirectory,
                format!("Not a directory: {}", full),
            );
        }
        let mut listing = String::new();
        if let Err(e) = self.collect_listing(&full, "", recursive, &mut listing) {
            return self.fail_device(codes::LIST_NOT_DIR, &format!("Failed to list: {}", full), e);
        }
        self.clear_error();
        Ok(listing)
    }

    fn collect_listing(
        &self,
        dir: &str,
        prefix: &str,
        recursive: bool,
        out: &mut String,
    ) -> Result<(), DeviceError> {
        for entry in self.device.list(dir)? {
            let shown = format!("{}{}", prefix, entry.name);
            if entry.is_dir {
                out.push_str(&format!("DIR : {}\n", shown));
                if recursive {
                    self.collect_listing(
                        &join(dir, &entry.name),
                        &format!("{}/", shown),
                        true,
                        out,
                    )?;
                }
            } else {
                out.push_str(&format!("FILE: {} ({} bytes)\n", shown, entry.size));
            }
        }
        Ok(())
    }

    /// Names of the direct children of a directory
    pub fn list_dir_names(&mut self, path: &str) -> Result<Vec<String>, SessionError> {
        Ok(self
            .list_entries(path)?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// Direct children of a directory with type and size
    pub fn list_entries(&mut self, path: &str) -> Result<Vec<DirEntry>, SessionError> {
        self.require_mounted(codes::NAMES_NOT_MOUNTED)?;
        let full = self.full_path(path);
        match self.device.list(&full) {
            Ok(entries) => {
                self.clear_error();
                Ok(entries)
            }
            Err(e) => self.fail_device(codes::NAMES_NOT_DIR, &format!("Not a directory: {}", full), e),
        }
    }

    pub fn change_dir(&mut self, path: &str) -> Result<(), SessionError> {
        self.require_mounted(codes::CHDIR_NOT_MOUNTED)?;
        let full = self.full_path(path);
        if !self.device.is_dir(&full) {
            return self.fail(
                codes::CHDIR_NOT_DIR,
                ErrorKind::NotADirectory,
                format!("Not a directory: {}", full),
            );
        }
        self.current_dir = if full.ends_with('/') {
            full
        } else {
            format!("{}/", full)
        };
        self.clear_error();
        debug!("Changed directory to {}", self.current_dir);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Error bookkeeping
    // ------------------------------------------------------------------

    fn clear_error(&mut self) {
        self.last_error = None;
    }

    fn set_error(&mut self, code: i32, kind: ErrorKind, message: String) {
        self.record(SessionError {
            code,
            kind,
            message,
        });
    }

    fn record(&mut self, err: SessionError) {
        warn!("Storage error {}: {}", err.code, err.message);
        self.last_error = Some(err);
    }

    fn fail<T>(&mut self, code: i32, kind: ErrorKind, message: String) -> Result<T, SessionError> {
        let err = SessionError {
            code,
            kind,
            message,
        };
        self.record(err.clone());
        Err(err)
    }

    fn fail_device<T>(&mut self, code: i32, context: &str, e: DeviceError) -> Result<T, SessionError> {
        let err = self.device_error(code, context, e);
        self.record(err.clone());
        Err(err)
    }

    fn device_error(&self, code: i32, context: &str, e: DeviceError) -> SessionError {
        let kind = match e {
            DeviceError::NoCard | DeviceError::NotStarted => ErrorKind::NotMounted,
            DeviceError::NotFound(_) => ErrorKind::NotFound,
            DeviceError::NotADirectory(_) => ErrorKind::NotADirectory,
            _ => ErrorKind::Device,
        };
        let message = match kind {
            ErrorKind::NotMounted => format!("SD card not mounted ({}: {})", context, e),
            _ => format!("{}: {}", context, e),
        };
        SessionError {
            code,
            kind,
            message,
        }
    }

    fn require_mounted(&mut self, code: i32) -> Result<(), SessionError> {
        if self.mounted {
            Ok(())
        } else {
            self.fail(code, ErrorKind::NotMounted, "SD card not mounted".to_string())
        }
    }
}

impl Drop for StorageSession {
    fn drop(&mut self) {
        if self.mounted {
            self.unmount();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn session_with(card: &MemoryCard, clock: &ManualClock) -> StorageSession {
        StorageSession::new(Box::new(card.clone()), Box::new(clock.clone()))
    }

    fn mounted_session() -> (MemoryCard, ManualClock, StorageSession) {
        let card = MemoryCard::new();
        let clock = ManualClock::new();
        let mut session = session_with(&card, &clock);
        assert!(session.mount(false, "/sdcard", true));
        (card, clock, session)
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn resolve_path_relative_and_absolute() {
        assert_eq!(resolve_path("/", "a.txt"), "/a.txt");
        assert_eq!(resolve_path("/dir/", "a.txt"), "/dir/a.txt");
        assert_eq!(resolve_path("/dir/", "/a.txt"), "/a.txt");
        assert_eq!(resolve_path("/dir/sub/", "../x"), "/dir/x");
        assert_eq!(resolve_path("/", "../../x"), "/x");
        assert_eq!(resolve_path("/dir/", "."), "/dir");
        assert_eq!(resolve_path("/", ""), "/");
    }

    #[test]
    fn mount_is_idempotent() {
        let (_card, _clock, mut session) = mounted_session();
        session.write_file("/x.txt", b"1").unwrap();
        session.mkdir("/dir").unwrap();
        session.change_dir("/dir").unwrap();
        assert!(session.read_file("/missing").is_err());
        assert_eq!(session.error_code(), codes::OPEN_FAILED);

        assert!(session.mount(false, "/sdcard", true));
        assert!(session.is_mounted());
        assert_eq!(session.current_dir(), "/dir/");
        assert_eq!(session.error_code(), 0);
        assert_eq!(session.last_error(), None);
    }

    #[test]
    fn mount_fires_callback_and_resets_dir() {
        let card = MemoryCard::new();
        let clock = ManualClock::new();
        let mut session = session_with(&card, &clock);
        let (mounts, cb) = counter();
        session.on_mount(cb);

        assert!(session.mount(false, "/sdcard", true));
        assert_eq!(session.current_dir(), "/");
        assert_eq!(mounts.load(Ordering::SeqCst), 1);
        assert_eq!(session.fs_type(), "SDHC");
        assert_eq!(session.block_size(), 512);
    }

    #[test]
    fn mount_failure_sets_error() {
        let card = MemoryCard::new();
        card.eject();
        let clock = ManualClock::new();
        let mut session = session_with(&card, &clock);

        assert!(!session.mount(false, "/sdcard", true));
        assert!(!session.is_mounted());
        assert_eq!(session.error_code(), codes::MOUNT_FAILED);
        assert!(!session.last_error_message().is_empty());
    }

    #[test]
    fn unmount_requires_mount() {
        let card = MemoryCard::new();
        let clock = ManualClock::new();
        let mut session = session_with(&card, &clock);
        assert!(!session.unmount());
        assert_eq!(session.error_code(), codes::UNMOUNT_NOT_MOUNTED);
    }

    #[test]
    fn unmount_fires_callback_and_releases_card() {
        let (card, _clock, mut session) = mounted_session();
        let (unmounts, cb) = counter();
        session.on_unmount(cb);

        assert!(session.unmount());
        assert!(!card.is_started());
        assert_eq!(unmounts.load(Ordering::SeqCst), 1);
        assert_eq!(session.total_bytes(), 0);
    }

    #[test]
    fn ops_rejected_while_unmounted() {
        let card = MemoryCard::new();
        let clock = ManualClock::new();
        let mut session = session_with(&card, &clock);

        let err = session.read_file("/a").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotMounted);
        assert_eq!(err.code, codes::OPEN_NOT_MOUNTED);
        assert_eq!(session.error_code(), codes::OPEN_NOT_MOUNTED);

        assert_eq!(session.mkdir("/d").unwrap_err().code, codes::MKDIR_NOT_MOUNTED);
        assert_eq!(session.delete_file("/a").unwrap_err().code, codes::DELETE_NOT_MOUNTED);
        assert!(!session.exists("/a"));
        assert_eq!(session.error_code(), codes::OPEN_NOT_MOUNTED);
    }

    #[test]
    fn write_read_roundtrip_binary() {
        let (_card, _clock, mut session) = mounted_session();
        let data: Vec<u8> = (0..=255u8).cycle().take(2000).collect();
        session.write_file("blob.bin", &data).unwrap();
        assert_eq!(session.read_file("/blob.bin").unwrap(), data);
        assert_eq!(session.file_size("blob.bin").unwrap(), 2000);
        assert_eq!(session.error_code(), 0);
    }

    #[test]
    fn success_clears_previous_error() {
        let (_card, _clock, mut session) = mounted_session();
        assert!(session.read_file("/missing").is_err());
        assert_eq!(session.error_code(), codes::OPEN_FAILED);
        assert_eq!(session.last_error().unwrap().kind, ErrorKind::NotFound);

        session.write_file("/present", b"x").unwrap();
        assert_eq!(session.error_code(), 0);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn append_and_truncate() {
        let (_card, _clock, mut session) = mounted_session();
        session.write_file("log.txt", b"abc").unwrap();
        session.append_file("log.txt", b"def").unwrap();
        assert_eq!(session.read_to_string("log.txt").unwrap(), "abcdef");

        session.truncate_file("log.txt", 2).unwrap();
        assert_eq!(session.read_to_string("log.txt").unwrap(), "ab");

        // Larger than the file: untouched
        session.truncate_file("log.txt", 100).unwrap();
        assert_eq!(session.read_to_string("log.txt").unwrap(), "ab");
    }

    #[test]
    fn read_into_limits_to_buffer() {
        let (_card, _clock, mut session) = mounted_session();
        session.write_file("a", b"0123456789").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(session.read_into("a", &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(session.file_size("a").unwrap(), 10);
        assert_eq!(session.open_handles(), 0);

        let err = session.read_into("missing", &mut buf).unwrap_err();
        assert_eq!(err.code, codes::OPEN_FAILED);
        assert_eq!(session.open_handles(), 0);
    }

    #[test]
    fn card_removal_invalidates_open_handles() {
        let (card, clock, mut session) = mounted_session();
        session.enable_hot_swap_detection(true);
        session.write_file("a", b"abc").unwrap();
        let handle = session.open_file("a").unwrap();
        session.check_hot_swap();

        card.eject();
        clock.advance(HOT_SWAP_INTERVAL_MS);
        session.check_hot_swap();
        assert!(!session.is_mounted());
        assert_eq!(session.open_handles(), 0);
        assert_eq!(session.tell(handle).unwrap_err().code, codes::TELL_INVALID);
    }

    #[test]
    fn rename_copy_move_delete() {
        let (_card, _clock, mut session) = mounted_session();
        session.write_file("a.txt", b"payload").unwrap();

        session.copy_file("a.txt", "b.txt").unwrap();
        assert_eq!(session.read_file("b.txt").unwrap(), b"payload");

        session.rename_file("b.txt", "c.txt").unwrap();
        assert!(!session.exists("b.txt"));
        assert!(session.exists("c.txt"));

        session.mkdir("archive").unwrap();
        session.move_file("c.txt", "archive/c.txt").unwrap();
        assert!(!session.exists("c.txt"));
        assert!(session.exists("/archive/c.txt"));

        session.delete_file("a.txt").unwrap();
        assert!(!session.exists("a.txt"));

        let err = session.delete_file("a.txt").unwrap_err();
        assert_eq!(err.code, codes::DELETE_FAILED);
    }

    #[test]
    fn change_dir_resolves_relative_paths() {
        let (_card, _clock, mut session) = mounted_session();
        session.mkdir("/scripts").unwrap();
        session.change_dir("scripts").unwrap();
        assert_eq!(session.current_dir(), "/scripts/");

        session.write_file("run.txt", b"ENTER").unwrap();
        assert!(session.exists("/scripts/run.txt"));

        session.change_dir("..").unwrap();
        assert_eq!(session.current_dir(), "/");

        let err = session.change_dir("/scripts/run.txt").unwrap_err();
        assert_eq!(err.code, codes::CHDIR_NOT_DIR);
        assert_eq!(session.current_dir(), "/");
    }

    #[test]
    fn list_dir_formats_entries() {
        let (card, _clock, mut session) = mounted_session();
        card.put_file("/a.txt", "abc");
        card.put_file("/sub/b.txt", "12345");

        let flat = session.list_dir("/", false).unwrap();
        assert_eq!(flat, "FILE: a.txt (3 bytes)\nDIR : sub\n");

        let deep = session.list_dir("/", true).unwrap();
        assert!(deep.contains("FILE: sub/b.txt (5 bytes)"));

        let err = session.list_dir("/a.txt", false).unwrap_err();
        assert_eq!(err.code, codes::LIST_NOT_DIR);

        let names = session.list_dir_names("/").unwrap();
        assert_eq!(names, vec!["a.txt".to_string(), "sub".to_string()]);
    }

    #[test]
    fn rmdir_and_recursive_rmdir() {
        let (card, _clock, mut session) = mounted_session();
        card.put_file("/tree/a/b/c.txt", "x");
        card.put_file("/tree/d.txt", "y");

        let err = session.rmdir("/tree").unwrap_err();
        assert_eq!(err.code, codes::RMDIR_FAILED);

        session.rmdir_recursive("/tree").unwrap();
        assert!(!session.exists("/tree"));
        assert!(card.get_file("/tree/d.txt").is_none());
    }

    #[test]
    fn format_removes_everything() {
        let (card, _clock, mut session) = mounted_session();
        card.put_file("/a", "1");
        card.put_file("/dir/b", "2");
        assert!(session.format());
        assert!(session.list_dir_names("/").unwrap().is_empty());
        assert_eq!(session.used_bytes(), 0);
    }

    #[test]
    fn check_and_remount() {
        let (_card, clock, mut session) = mounted_session();
        assert!(session.check());
        let before = clock.now_ms();
        assert!(session.remount());
        assert!(session.is_mounted());
        assert_eq!(clock.now_ms() - before, REMOUNT_PAUSE_MS);
    }

    #[test]
    fn auto_mount_only_when_enabled() {
        let card = MemoryCard::new();
        let clock = ManualClock::new();
        let mut session = session_with(&card, &clock);
        session.auto_mount();
        assert!(!session.is_mounted());
        session.enable_auto_mount(true);
        session.auto_mount();
        assert!(session.is_mounted());
    }

    #[test]
    fn hot_swap_disabled_does_nothing() {
        let (card, clock, mut session) = mounted_session();
        card.eject();
        clock.advance(1000);
        session.check_hot_swap();
        assert!(session.is_mounted());
    }

    #[test]
    fn hot_swap_removal_unmounts_once() {
        let (card, clock, mut session) = mounted_session();
        session.enable_hot_swap_detection(true);
        let (removed, cb) = counter();
        session.on_card_removed(cb);

        session.check_hot_swap();
        assert!(session.is_mounted());

        card.eject();
        clock.advance(HOT_SWAP_INTERVAL_MS);
        session.check_hot_swap();
        assert!(!session.is_mounted());
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        // Further polls with the card still out change nothing
        for _ in 0..5 {
            clock.advance(HOT_SWAP_INTERVAL_MS);
            session.check_hot_swap();
        }
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        let err = session.read_file("/anything").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotMounted);
    }

    #[test]
    fn hot_swap_is_rate_limited() {
        let (card, clock, mut session) = mounted_session();
        session.enable_hot_swap_detection(true);
        session.check_hot_swap();

        card.eject();
        clock.advance(HOT_SWAP_INTERVAL_MS - 1);
        session.check_hot_swap();
        assert!(session.is_mounted(), "probe ran before the interval elapsed");

        clock.advance(1);
        session.check_hot_swap();
        assert!(!session.is_mounted());
    }

    #[test]
    fn hot_swap_insertion_auto_mounts_after_settle() {
        let (card, clock, mut session) = mounted_session();
        session.enable_hot_swap_detection(true);
        session.enable_auto_mount(true);
        let (inserted, cb) = counter();
        session.on_card_inserted(cb);

        card.eject();
        session.check_hot_swap();
        assert!(!session.is_mounted());

        card.insert();
        clock.advance(HOT_SWAP_INTERVAL_MS);
        let before = clock.now_ms();
        session.check_hot_swap();
        assert_eq!(inserted.load(Ordering::SeqCst), 1);
        assert!(session.is_mounted());
        assert_eq!(clock.now_ms() - before, INSERT_SETTLE_MS);
    }

    #[test]
    fn failed_auto_mount_is_attempted_once_per_insertion() {
        let (card, clock, mut session) = mounted_session();
        session.enable_hot_swap_detection(true);
        session.enable_auto_mount(true);
        card.eject();
        session.check_hot_swap();
        let baseline = card.begin_attempts();

        card.fail_next_begin();
        card.insert();
        clock.advance(HOT_SWAP_INTERVAL_MS);
        session.check_hot_swap();
        assert_eq!(card.begin_attempts(), baseline + 1);
        assert!(!session.is_mounted());
        assert_eq!(session.error_code(), codes::MOUNT_FAILED);

        for _ in 0..5 {
            clock.advance(HOT_SWAP_INTERVAL_MS);
            session.check_hot_swap();
        }
        assert_eq!(card.begin_attempts(), baseline + 1, "retried without a new insertion");
        assert!(!session.is_mounted());

        card.eject();
        clock.advance(HOT_SWAP_INTERVAL_MS);
        session.check_hot_swap();
        card.insert();
        clock.advance(HOT_SWAP_INTERVAL_MS);
        session.check_hot_swap();
        assert_eq!(card.begin_attempts(), baseline + 2);
        assert!(session.is_mounted());
    }

    #[test]
    fn hot_swap_insertion_without_auto_mount_stays_unmounted() {
        let card = MemoryCard::new();
        let clock = ManualClock::new();
        let mut session = session_with(&card, &clock);
        session.enable_hot_swap_detection(true);
        let (inserted, cb) = counter();
        session.on_card_inserted(cb);

        session.check_hot_swap();
        assert_eq!(inserted.load(Ordering::SeqCst), 1);
        assert!(!session.is_mounted());

        clock.advance(HOT_SWAP_INTERVAL_MS);
        session.check_hot_swap();
        assert_eq!(inserted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn vanished_card_reports_not_mounted_kind() {
        let (card, _clock, mut session) = mounted_session();
        card.eject();
        let err = session.read_file("/a").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotMounted);
        assert_eq!(err.code, codes::OPEN_FAILED);
    }

    #[test]
    fn drop_unmounts_card() {
        let (card, _clock, session) = mounted_session();
        assert!(card.is_started());
        drop(session);
        assert!(!card.is_started());
    }
}
