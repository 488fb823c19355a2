//! Open file and directory handles
//!
//! A handle names an open file (with a read position) or an open directory
//! (with an entry cursor) on the mounted card. Handles live in the session
//! and are all invalidated when the card is unmounted or pulled.

use super::device::DirEntry;
use super::{codes, ErrorKind, SessionError, StorageSession};
use log::debug;
use std::collections::HashMap;

/// Handle to a file or directory opened through a `StorageSession`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(u32);

#[derive(Debug)]
enum Open {
    File { path: String, position: u64 },
    Dir { entries: Vec<DirEntry>, next: usize },
}

#[derive(Debug, Default)]
pub(super) struct HandleTable {
    next_id: u32,
    open: HashMap<u32, Open>,
}

impl HandleTable {
    fn insert(&mut self, open: Open) -> FileHandle {
        self.next_id = self.next_id.wrapping_add(1);
        self.open.insert(self.next_id, open);
        FileHandle(self.next_id)
    }

    fn file(&self, handle: FileHandle) -> Option<(String, u64)> {
        match self.open.get(&handle.0) {
            Some(Open::File { path, position }) => Some((path.clone(), *position)),
            _ => None,
        }
    }

    fn set_position(&mut self, handle: FileHandle, to: u64) {
        if let Some(Open::File { position, .. }) = self.open.get_mut(&handle.0) {
            *position = to;
        }
    }

    fn release(&mut self, handle: FileHandle) -> bool {
        self.open.remove(&handle.0).is_some()
    }

    pub(super) fn len(&self) -> usize {
        self.open.len()
    }

    /// Drop every handle, returning how many were open
    pub(super) fn invalidate_all(&mut self) -> usize {
        let count = self.open.len();
        self.open.clear();
        count
    }
}

impl StorageSession {
    /// Open a file for reading, positioned at its start
    pub fn open_file(&mut self, path: &str) -> Result<FileHandle, SessionError> {
        self.require_mounted(codes::OPEN_NOT_MOUNTED)?;
        let full = self.full_path(path);
        if let Err(e) = self.device.file_len(&full) {
            return self.fail_device(codes::OPEN_FAILED, &format!("Failed to open file: {}", full), e);
        }
        self.clear_error();
        debug!("Opened {}", full);
        Ok(self.handles.insert(Open::File {
            path: full,
            position: 0,
        }))
    }

    /// Read from the handle's position, advancing it by the bytes read.
    ///
    /// Returns 0 at end of file.
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize, SessionError> {
        let Some((path, position)) = self.handles.file(handle) else {
            return self.invalid_handle(codes::CLOSE_INVALID, "Invalid file handle");
        };
        match self.device.read_at(&path, position, buf) {
            Ok(n) => {
                self.handles.set_position(handle, position + n as u64);
                self.clear_error();
                Ok(n)
            }
            Err(e) => self.fail_device(codes::OPEN_FAILED, &format!("Failed to read file: {}", path), e),
        }
    }

    /// Move the read position. Positions past the end of the file fail.
    pub fn seek(&mut self, handle: FileHandle, position: u64) -> Result<(), SessionError> {
        let Some((path, _)) = self.handles.file(handle) else {
            return self.invalid_handle(codes::SEEK_INVALID, "Invalid file handle for seek");
        };
        match self.device.file_len(&path) {
            Ok(len) if position <= len => {
                self.handles.set_position(handle, position);
                self.clear_error();
                Ok(())
            }
            Ok(_) => self.fail(codes::SEEK_FAILED, ErrorKind::Device, "Seek operation failed".to_string()),
            Err(e) => self.fail_device(codes::SEEK_FAILED, "Seek operation failed", e),
        }
    }

    /// Current read position of a file handle
    pub fn tell(&mut self, handle: FileHandle) -> Result<u64, SessionError> {
        match self.handles.file(handle) {
            Some((_, position)) => {
                self.clear_error();
                Ok(position)
            }
            None => self.invalid_handle(codes::TELL_INVALID, "Invalid file handle for tell"),
        }
    }

    /// Current length of the file behind a handle
    pub fn size(&mut self, handle: FileHandle) -> Result<u64, SessionError> {
        let Some((path, _)) = self.handles.file(handle) else {
            return self.invalid_handle(codes::CLOSE_INVALID, "Invalid file handle");
        };
        match self.device.file_len(&path) {
            Ok(len) => {
                self.clear_error();
                Ok(len)
            }
            Err(e) => self.fail_device(codes::OPEN_FAILED, &format!("Failed to open file: {}", path), e),
        }
    }

    /// Close a file or directory handle
    pub fn close(&mut self, handle: FileHandle) -> Result<(), SessionError> {
        if self.handles.release(handle) {
            self.clear_error();
            Ok(())
        } else {
            self.invalid_handle(codes::CLOSE_INVALID, "Invalid file handle")
        }
    }

    /// Open a directory for iteration with `next_entry`
    pub fn open_dir(&mut self, path: &str) -> Result<FileHandle, SessionError> {
        self.require_mounted(codes::DIR_NOT_MOUNTED)?;
        let full = self.full_path(path);
        if !self.device.is_dir(&full) {
            return self.fail(
                codes::DIR_NOT_DIR,
                ErrorKind::NotADirectory,
                format!("Not a directory: {}", full),
            );
        }
        match self.device.list(&full) {
            Ok(entries) => {
                self.clear_error();
                Ok(self.handles.insert(Open::Dir { entries, next: 0 }))
            }
            Err(e) => self.fail_device(codes::DIR_NOT_DIR, &format!("Not a directory: {}", full), e),
        }
    }

    /// Next entry of an open directory, `None` once all were returned
    pub fn next_entry(&mut self, handle: FileHandle) -> Result<Option<DirEntry>, SessionError> {
        match self.handles.open.get_mut(&handle.0) {
            Some(Open::Dir { entries, next }) => {
                let entry = entries.get(*next).cloned();
                if entry.is_some() {
                    *next += 1;
                }
                self.clear_error();
                Ok(entry)
            }
            _ => self.invalid_handle(codes::CLOSE_INVALID, "Invalid file handle"),
        }
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Close a handle used internally, keeping the last error as it is
    pub(super) fn release(&mut self, handle: FileHandle) {
        self.handles.release(handle);
    }

    fn invalid_handle<T>(&mut self, code: i32, message: &str) -> Result<T, SessionError> {
        self.fail(code, ErrorKind::Device, message.to_string())
    }
}
